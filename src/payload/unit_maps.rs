//! Unit Mapping Tables and Lookup Functions
//!
//! This module provides lookups for the CoE unit ids defined in the TA
//! specification. Each unit selects the fixed-point decimal scale applied
//! to raw wire integers, plus a static display name and symbol.

use crate::payload::units::UnitInfo;

/// Known CoE unit ids as defined in the TA specification.
/// Validated against the CMI reference configuration for correctness.
///
/// Tuple layout: (id, name, symbol, decimal digits).
pub const UNIT_CODES: &[(u8, &str, &str, u8)] = &[
    (0, "Dimensionless", "", 0),
    (1, "Temperature", "°C", 1),
    (2, "Solar radiation", "W/m²", 0),
    (3, "Flow rate", "l/h", 0),
    (4, "Seconds", "s", 0),
    (5, "Minutes", "min", 0),
    (6, "Flow rate", "l/Imp", 0),
    (7, "Temperature", "K", 1),
    (8, "Percent", "%", 1),
    (10, "Power", "kW", 1),
    (11, "Energy", "kWh", 1),
    (12, "Energy", "MWh", 0),
    (13, "Voltage", "V", 2),
    (14, "Current", "mA", 1),
    (15, "Hours", "h", 0),
    (16, "Days", "d", 0),
    (17, "Pulses", "Imp", 0),
    (18, "Resistance", "kΩ", 2),
    (19, "Volume", "l", 0),
    (20, "Speed", "km/h", 0),
    (21, "Frequency", "Hz", 2),
    (22, "Flow rate", "l/min", 0),
    (23, "Pressure", "bar", 2),
    (24, "Performance factor", "", 2),
    (26, "Length", "m", 1),
    (27, "Length", "mm", 1),
    (28, "Volume", "m³", 0),
    (35, "Flow rate", "l/d", 0),
    (36, "Speed", "m/s", 0),
    (37, "Flow rate", "m³/min", 0),
    (38, "Flow rate", "m³/h", 0),
    (39, "Flow rate", "m³/d", 0),
    (40, "Speed", "mm/min", 0),
    (41, "Speed", "mm/h", 0),
    (42, "Speed", "mm/d", 0),
    (50, "Euro", "€", 2),
    (51, "Dollar", "$", 2),
    (52, "Absolute humidity", "g/m³", 1),
    (53, "Dimensionless", "", 5),
    (54, "Angle", "°", 1),
    (58, "Dimensionless", "", 1),
    (59, "Percent", "%", 0),
    (60, "Time of day", "min since 00:00", 0),
    (63, "Current", "A", 1),
    (65, "Pressure", "mbar", 1),
    (66, "Pressure", "Pa", 0),
    (67, "CO2 content", "ppm", 0),
    (69, "Power", "W", 0),
    (70, "Mass", "t", 2),
    (71, "Mass", "kg", 1),
    (72, "Mass", "g", 1),
    (73, "Length", "cm", 1),
];

/// Revision-2 decimal overrides. V2 widens some units to more decimal
/// digits than the V1 wire can carry; the override replaces only the
/// decimal count, the base entry keeps its name and symbol.
///
/// Tuple layout: (id, decimal digits under V2).
pub const V2_DECIMAL_OVERRIDES: &[(u8, u8)] = &[
    // Power kW: V1 = 1 decimal, V2 = 2 decimals
    (10, 2),
];

/// Looks up a unit id in the base table.
pub fn lookup_unit(code: u8) -> Option<UnitInfo> {
    UNIT_CODES
        .iter()
        .find(|(c, _, _, _)| *c == code)
        .map(|(_, name, symbol, decimals)| UnitInfo {
            id: code,
            name,
            symbol,
            decimals: *decimals,
        })
}

/// Looks up the revision-2 decimal override for a unit id.
pub fn lookup_v2_override(code: u8) -> Option<u8> {
    V2_DECIMAL_OVERRIDES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, decimals)| *decimals)
}
