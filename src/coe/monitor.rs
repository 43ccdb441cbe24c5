//! Inbound dispatch: per-channel extraction and block monitoring.
//!
//! Consumers rarely want whole blocks. An input binding watches one
//! output number of one CAN node and yields its value whenever a matching
//! block arrives; a monitor watches everything (optionally filtered by
//! node or data kind) and renders per-channel detail rows.

use crate::coe::addressing::{
    analog_output_number, analog_position, digital_output_number, digital_position,
};
use crate::coe::frame::{BlockData, BlockReading, DataKind, ProtocolRevision};
use crate::coe::udp::InboundReading;
use crate::error::CoeError;
use crate::payload::units::unit_info;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;

/// Selects one channel: a CAN node (0 matches any node), a data kind and
/// an output number 1..=32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFilter {
    pub node: u8,
    pub kind: DataKind,
    pub output: u8,
}

/// One extracted channel value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelValue {
    pub node: u8,
    pub block: u8,
    pub output: u8,
    #[serde(flatten)]
    pub state: ChannelState,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChannelState {
    Analog { value: f64, unit: u8 },
    Digital { on: bool },
}

impl ChannelFilter {
    pub fn new(node: u8, kind: DataKind, output: u8) -> Result<Self, CoeError> {
        // Validate the output number up front so extraction can't fail later
        match kind {
            DataKind::Analog => analog_position(output)?,
            DataKind::Digital => digital_position(output)?,
        };
        Ok(ChannelFilter { node, kind, output })
    }

    /// Extracts this filter's channel from a block reading, if the
    /// reading covers it.
    pub fn extract(&self, reading: &BlockReading) -> Option<ChannelValue> {
        if self.node > 0 && reading.node != self.node {
            return None;
        }
        match (self.kind, &reading.data) {
            (DataKind::Analog, BlockData::Analog { values, units }) => {
                let pos = analog_position(self.output).ok()?;
                if reading.block != pos.block {
                    return None;
                }
                Some(ChannelValue {
                    node: reading.node,
                    block: reading.block,
                    output: self.output,
                    state: ChannelState::Analog {
                        value: values[pos.position],
                        unit: units[pos.position],
                    },
                })
            }
            (DataKind::Digital, BlockData::Digital { states }) => {
                let pos = digital_position(self.output).ok()?;
                if reading.block != pos.block {
                    return None;
                }
                Some(ChannelValue {
                    node: reading.node,
                    block: reading.block,
                    output: self.output,
                    state: ChannelState::Digital {
                        on: states[pos.position],
                    },
                })
            }
            _ => None,
        }
    }
}

/// Block-level monitor filter: node 0 matches any node, kind `None`
/// matches both data kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorFilter {
    pub node: u8,
    pub kind: Option<DataKind>,
}

impl MonitorFilter {
    pub fn matches(&self, reading: &BlockReading) -> bool {
        if self.node > 0 && reading.node != self.node {
            return false;
        }
        match self.kind {
            Some(kind) => reading.kind() == kind,
            None => true,
        }
    }
}

/// Per-channel detail row of a monitored block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChannelDetail {
    Analog {
        output: u8,
        value: f64,
        unit: u8,
        unit_name: &'static str,
        unit_symbol: &'static str,
    },
    Digital {
        output: u8,
        on: bool,
        state: &'static str,
    },
}

/// One monitored block with its detail rows and origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorEvent {
    pub node: u8,
    pub block: u8,
    pub kind: DataKind,
    pub version: u8,
    pub channels: Vec<ChannelDetail>,
    pub source: SocketAddr,
    pub timestamp: DateTime<Utc>,
}

/// Expands a block reading into per-channel detail rows, resolving unit
/// labels for analog channels and ON/OFF state text for digital ones.
pub fn detail_rows(reading: &BlockReading, revision: ProtocolRevision) -> Vec<ChannelDetail> {
    match &reading.data {
        BlockData::Analog { values, units } => values
            .iter()
            .enumerate()
            .filter_map(|(position, value)| {
                let output = analog_output_number(reading.block, position).ok()?;
                let info = unit_info(units[position], revision);
                Some(ChannelDetail::Analog {
                    output,
                    value: *value,
                    unit: units[position],
                    unit_name: info.name,
                    unit_symbol: info.symbol,
                })
            })
            .collect(),
        BlockData::Digital { states } => states
            .iter()
            .enumerate()
            .filter_map(|(position, on)| {
                let output = digital_output_number(reading.block, position).ok()?;
                Some(ChannelDetail::Digital {
                    output,
                    on: *on,
                    state: if *on { "ON" } else { "OFF" },
                })
            })
            .collect(),
    }
}

/// Builds the monitor event for one inbound reading.
pub fn monitor_event(inbound: &InboundReading) -> MonitorEvent {
    MonitorEvent {
        node: inbound.reading.node,
        block: inbound.reading.block,
        kind: inbound.reading.kind(),
        version: inbound.revision.number(),
        channels: detail_rows(&inbound.reading, inbound.revision),
        source: inbound.source,
        timestamp: inbound.received_at,
    }
}
