/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types specific to the zone grid.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::data_types::{Address, ClientId, Point, SuperpeerId, ZoneId};

/// An axis-aligned rectangle in world coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether `point` lies in this rectangle. The left and top edges are inclusive and the right and
    /// bottom edges exclusive, so the two halves of a split never both contain a point.
    pub fn contains(&self, point: Point) -> bool {
        let (left, top) = (self.x as f64, self.y as f64);
        let (right, bottom) = (left + self.width as f64, top + self.height as f64);
        point.x >= left && point.x < right && point.y >= top && point.y < bottom
    }

    /// Cut this rectangle in two along `orientation`. The first half gets the floor of the halved length.
    ///
    /// Returns `None` for [`SplitOrientation::None`].
    pub fn halves(&self, orientation: SplitOrientation) -> Option<(Rect, Rect)> {
        match orientation {
            SplitOrientation::None => None,
            SplitOrientation::Horizontal => {
                let first = self.width / 2;
                Some((
                    Rect::new(self.x, self.y, first, self.height),
                    Rect::new(self.x + first, self.y, self.width - first, self.height),
                ))
            }
            SplitOrientation::Vertical => {
                let first = self.height / 2;
                Some((
                    Rect::new(self.x, self.y, self.width, first),
                    Rect::new(self.x, self.y + first, self.width, self.height - first),
                ))
            }
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl Display for Rect {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@({},{})", self.width, self.height, self.x, self.y)
    }
}

/// The axis along which a zone was subdivided.
///
/// `Horizontal` halves the width, placing the two children side by side. `Vertical` halves the
/// height, stacking them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum SplitOrientation {
    None,
    Horizontal,
    Vertical,
}

impl SplitOrientation {
    pub fn other(&self) -> SplitOrientation {
        match self {
            SplitOrientation::None => SplitOrientation::None,
            SplitOrientation::Horizontal => SplitOrientation::Vertical,
            SplitOrientation::Vertical => SplitOrientation::Horizontal,
        }
    }
}

/// A client granted authority to simulate a zone.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SuperpeerSlot {
    pub id: SuperpeerId,
    pub client: ClientId,
    pub address: Address,
}

/// A node in the spatial partition tree.
///
/// A zone is a leaf exactly when `children` is `None`. Only *current* leaves, leaves that are not
/// `retired`, carry population and superpeers.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub parent: Option<ZoneId>,
    pub children: Option<(ZoneId, ZoneId)>,
    pub rect: Rect,
    pub orientation: SplitOrientation,
    pub population: u32,
    pub superpeers: Vec<SuperpeerSlot>,
    /// Set on both children when they are merged back into their parent. Retired zones stay in the
    /// arena for history but never become current again.
    pub retired: bool,
}

impl Zone {
    pub(crate) fn leaf(id: ZoneId, parent: Option<ZoneId>, rect: Rect) -> Self {
        Self {
            id,
            parent,
            children: None,
            rect,
            orientation: SplitOrientation::None,
            population: 0,
            superpeers: Vec::new(),
            retired: false,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn is_current_leaf(&self) -> bool {
        self.is_leaf() && !self.retired
    }

    pub fn superpeer(&self, superpeer: SuperpeerId) -> Option<&SuperpeerSlot> {
        self.superpeers.iter().find(|slot| slot.id == superpeer)
    }
}

/// A structural change made by [`ZoneGrid::evaluate`](super::implementation::ZoneGrid::evaluate).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridChange {
    Split {
        parent: ZoneId,
        children: (ZoneId, ZoneId),
    },
    Merge {
        parent: ZoneId,
        retired: (ZoneId, ZoneId),
    },
}

/// A serializable copy of an entire zone grid, used to replicate the master's grid to slaves.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct ZoneGridSnapshot {
    pub zones: Vec<Zone>,
    pub next_superpeer_id: u64,
    pub zone_info_last_modified: u64,
}

/// The part of a zone grid that clients see: the current leaves.
#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct ZoneGridView {
    pub zone_info_last_modified: u64,
    pub leaves: Vec<LeafView>,
}

#[derive(Clone, Debug, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct LeafView {
    pub id: ZoneId,
    pub rect: Rect,
    pub superpeers: Vec<SuperpeerSlot>,
}

/// Parameters of a zone grid. The thresholds, minimum dimensions and superpeer count can change at
/// runtime through replicated settings. The world dimensions are fixed when the grid is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZoneGridConfiguration {
    pub world_width: u32,
    pub world_height: u32,
    pub minimum_zone_width: u32,
    pub minimum_zone_height: u32,
    pub overpopulation_threshold: u32,
    pub underpopulation_threshold: u32,
    pub zone_superpeer_count: u32,
}

/// Errors returned by zone grid operations. All of them are caller errors: the grid is unchanged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ZoneGridError {
    /// The zone does not exist or is not a current leaf.
    UnknownZone { zone: ZoneId },
    /// The zone already holds the configured number of superpeers.
    ZoneFull { zone: ZoneId },
    /// The point lies outside the world.
    OutOfBounds { point: Point },
    /// Neither axis can be halved without violating the minimum zone dimensions.
    ZoneTooSmall { zone: ZoneId },
    /// The two zones are not the two children of one parent.
    NotSiblings { a: ZoneId, b: ZoneId },
    /// The superpeer id, or the client behind it, already holds a slot in the zone.
    DuplicateSuperpeer { zone: ZoneId, superpeer: SuperpeerId },
}

impl Display for ZoneGridError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ZoneGridError::UnknownZone { zone } => write!(f, "zone {} is not a current leaf", zone),
            ZoneGridError::ZoneFull { zone } => write!(f, "zone {} has no free superpeer slot", zone),
            ZoneGridError::OutOfBounds { point } => {
                write!(f, "point ({}, {}) lies outside the world", point.x, point.y)
            }
            ZoneGridError::ZoneTooSmall { zone } => write!(f, "zone {} is too small to split", zone),
            ZoneGridError::NotSiblings { a, b } => write!(f, "zones {} and {} are not siblings", a, b),
            ZoneGridError::DuplicateSuperpeer { zone, superpeer } => {
                write!(f, "superpeer {} is already assigned to zone {}", superpeer, zone)
            }
        }
    }
}

impl std::error::Error for ZoneGridError {}
