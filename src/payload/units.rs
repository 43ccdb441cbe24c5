//! Unit-dependent fixed-point scaling.
//!
//! Raw CoE wire values are signed integers interpreted through the decimal
//! scale of their unit id: a raw `105` with unit 1 (temperature, one
//! decimal digit) reads as `10.5`. This module resolves unit ids against
//! the static table in [`unit_maps`](crate::payload::unit_maps), applies
//! the revision-2 override layer, and converts between raw wire integers
//! and decimal values.
//!
//! Unknown unit ids are not an error: they fall back to zero-decimal
//! scaling so that decode/encode never fail solely on an unrecognized id.

use crate::coe::frame::ProtocolRevision;
use crate::payload::unit_maps::lookup_v2_override;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Scaling information for one CoE unit id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitInfo {
    pub id: u8,
    pub name: &'static str,
    pub symbol: &'static str,
    /// Number of decimal digits carried in the raw wire integer.
    pub decimals: u8,
}

/// Fallback entry for unknown unit ids (lenient policy, not an error).
const UNKNOWN_UNIT: UnitInfo = UnitInfo {
    id: 0,
    name: "Unknown",
    symbol: "",
    decimals: 0,
};

/// Index over the base table, built once on first access.
static UNIT_INDEX: Lazy<HashMap<u8, UnitInfo>> = Lazy::new(|| {
    crate::payload::unit_maps::UNIT_CODES
        .iter()
        .map(|(id, name, symbol, decimals)| {
            (
                *id,
                UnitInfo {
                    id: *id,
                    name,
                    symbol,
                    decimals: *decimals,
                },
            )
        })
        .collect()
});

/// Resolves a unit id for the given protocol revision.
///
/// Returns the base entry with the revision-2 decimal override applied
/// when one exists (partial override: only the decimal count changes).
/// Unknown ids yield a zero-decimal fallback carrying the requested id.
pub fn unit_info(unit_id: u8, revision: ProtocolRevision) -> UnitInfo {
    let mut info = UNIT_INDEX
        .get(&unit_id)
        .copied()
        .unwrap_or(UnitInfo { id: unit_id, ..UNKNOWN_UNIT });

    if revision == ProtocolRevision::V2 {
        if let Some(decimals) = lookup_v2_override(unit_id) {
            info.decimals = decimals;
        }
    }

    info
}

/// Converts a raw wire integer to its decimal value.
pub fn to_scaled(raw: i64, unit_id: u8, revision: ProtocolRevision) -> f64 {
    let decimals = unit_info(unit_id, revision).decimals;
    raw as f64 / 10f64.powi(i32::from(decimals))
}

/// Converts a decimal value to its raw wire integer, rounding half away
/// from zero at the unit's precision.
pub fn to_raw(value: f64, unit_id: u8, revision: ProtocolRevision) -> i64 {
    let decimals = unit_info(unit_id, revision).decimals;
    (value * 10f64.powi(i32::from(decimals))).round() as i64
}
