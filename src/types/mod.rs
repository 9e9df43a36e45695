//! Types that are used across multiple subsystems of the arbitrator.
//!
//! Types specific to a single subsystem, for example [`Zone`](crate::zone_grid::types::Zone) or
//! [`StoreAccountRequest`](crate::account_store::types::StoreAccountRequest), live in the "types"
//! submodule of that subsystem.

pub mod data_types;
