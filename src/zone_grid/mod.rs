/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The spatial partition of the world and the assignment of superpeers to its regions.
//!
//! # The Zone Grid
//!
//! The world is a rectangle. The zone grid divides it into a binary tree of rectangular
//! [zones](types::Zone): the root spans the whole world, and every internal zone is cut in half,
//! either side by side ([`Horizontal`](types::SplitOrientation::Horizontal)) or stacked
//! ([`Vertical`](types::SplitOrientation::Vertical)), into exactly two children. The leaves of the
//! tree partition the world: every point inside the root lies in exactly one current leaf, which
//! [`lookup`](implementation::ZoneGrid::lookup) finds by descending from the root.
//!
//! Only current leaves carry a live population count and a bounded list of
//! [superpeer slots](types::SuperpeerSlot).
//!
//! # Splitting and merging
//!
//! Once per tick the master calls [`evaluate`](implementation::ZoneGrid::evaluate):
//! 1. Every leaf whose population is at or above the overpopulation threshold is split along its longer
//!    side, or along the other side if halving the longer one would produce a zone below the minimum
//!    dimensions. A leaf that cannot be halved either way stays as it is. The parent's superpeers are
//!    dealt round-robin to the two children.
//! 2. Every pair of sibling leaves that are both at or below the underpopulation threshold is merged
//!    back into the parent.
//!    The children are kept in the arena but marked retired, never to become current again.
//!
//! # Replication
//!
//! Zones live in an arena indexed by [`ZoneId`](crate::types::data_types::ZoneId). Every structural
//! change or superpeer change bumps a modification counter. The master stores a
//! [snapshot](types::ZoneGridSnapshot) of the arena whenever the counter moves, and slaves reload it
//! when the stored counter differs from theirs.

pub mod implementation;

pub mod types;
