//! The payload module contains the components responsible for scaling raw
//! CoE wire integers through the unit-dependent fixed-point table.

pub mod unit_maps;
pub mod units;

pub use unit_maps::*;
pub use units::*;

/// Scaling information for one CoE unit id.
pub use units::UnitInfo;
