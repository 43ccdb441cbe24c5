//! # CoE Protocol Codec
//!
//! This module provides functionality to decode and encode CoE (CAN over
//! Ethernet) datagrams, the UDP protocol spoken by TA CMI building
//! controllers. It leverages the `nom` crate for efficient and reliable
//! parsing of binary data.
//!
//! ## Features
//! - Parse both wire revisions: the fixed 14-byte V1 framing and the
//!   variable-length V2 entry framing.
//! - Pack typed block payloads into wire-correct datagrams, including
//!   sparse V2 writes (undefined channels are omitted from the wire).
//! - Unit-dependent fixed-point scaling on every analog channel.
//! - V1 range clamping with caller-visible warnings, never silent wraps.
//!
//! ## Wire format
//!
//! V1 datagrams are always 14 bytes: node id, block id, then either a
//! 16-bit little-endian bitfield (digital blocks 0 and 9) or four
//! little-endian i16 values at offsets 2,4,6,8 plus four unit ids at
//! offsets 10..14 (analog blocks 1-8).
//!
//! V2 datagrams start with the version word `0x02 0x00`, a message length
//! byte and an entry count `n`, followed by `n` 8-byte entries: CAN node,
//! 16-bit little-endian output number, unit id, 32-bit little-endian
//! value. Output numbers above 254 denote analog outputs (wire value
//! minus 255); lower values are digital output numbers 1:1. Digital
//! blocks keep the 14-byte framing under both revisions.

use crate::coe::addressing::{analog_output_number, analog_position, digital_position};
use crate::constants::{
    is_analog_block, is_digital_block, ANALOG_CHANNELS, COE_V1_PACKET_SIZE,
    COE_V2_ANALOG_OUTPUT_OFFSET, COE_V2_ENTRY_SIZE, COE_V2_HEADER_SIZE, COE_V2_VERSION_HI,
    COE_V2_VERSION_LO, DIGITAL_CHANNELS, MAX_OUTPUT_NUMBER,
};
use crate::error::CoeError;
use crate::payload::units::{to_raw, to_scaled};
use bytes::{BufMut, BytesMut};
use nom::bytes::complete::take;
use nom::number::complete::{be_u8, le_i16, le_i32, le_u16};
use nom::Err as NomErr;
use nom::IResult;
use serde::{Deserialize, Serialize};

/// The two incompatible CoE wire revisions.
///
/// The revision is selected once (per transport / scheduler construction)
/// and dispatched here; every decode and encode path branches on this tag
/// exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolRevision {
    V1,
    V2,
}

impl ProtocolRevision {
    /// Well-known UDP port for this revision.
    pub fn port(self) -> u16 {
        match self {
            ProtocolRevision::V1 => crate::constants::COE_PORT_V1,
            ProtocolRevision::V2 => crate::constants::COE_PORT_V2,
        }
    }

    /// Numeric revision as carried in configuration and reports.
    pub fn number(self) -> u8 {
        match self {
            ProtocolRevision::V1 => 1,
            ProtocolRevision::V2 => 2,
        }
    }

    /// Parses a numeric revision from configuration.
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(ProtocolRevision::V1),
            2 => Some(ProtocolRevision::V2),
            _ => None,
        }
    }
}

/// The two kinds of addressable data a block can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Analog,
    Digital,
}

impl DataKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::Analog => "analog",
            DataKind::Digital => "digital",
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full contents of one block: four scaled analog channels with their
/// unit ids, or sixteen digital states.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockData {
    Analog { values: [f64; 4], units: [u8; 4] },
    Digital { states: [bool; 16] },
}

impl BlockData {
    /// Zero-initialized contents for the given kind.
    pub fn zeroed(kind: DataKind) -> Self {
        match kind {
            DataKind::Analog => BlockData::Analog {
                values: [0.0; ANALOG_CHANNELS],
                units: [0; ANALOG_CHANNELS],
            },
            DataKind::Digital => BlockData::Digital {
                states: [false; DIGITAL_CHANNELS],
            },
        }
    }

    pub fn kind(&self) -> DataKind {
        match self {
            BlockData::Analog { .. } => DataKind::Analog,
            BlockData::Digital { .. } => DataKind::Digital,
        }
    }

    /// Converts full block contents into an encode payload with every
    /// channel defined.
    pub fn to_payload(&self) -> BlockPayload {
        match self {
            BlockData::Analog { values, units } => BlockPayload::Analog {
                values: values.map(Some),
                units: *units,
            },
            BlockData::Digital { states } => BlockPayload::Digital { states: *states },
        }
    }
}

/// One decoded block reading: the unit of wire transfer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockReading {
    pub node: u8,
    pub block: u8,
    pub data: BlockData,
}

impl BlockReading {
    pub fn kind(&self) -> DataKind {
        self.data.kind()
    }
}

/// Encode input for one block. Analog channels are per-channel optional:
/// undefined channels encode as zero under V1 (no sparse representation)
/// and are omitted entirely under V2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockPayload {
    Analog {
        values: [Option<f64>; 4],
        units: [u8; 4],
    },
    Digital {
        states: [bool; 16],
    },
}

impl BlockPayload {
    pub fn kind(&self) -> DataKind {
        match self {
            BlockPayload::Analog { .. } => DataKind::Analog,
            BlockPayload::Digital { .. } => DataKind::Digital,
        }
    }
}

/// A value that exceeded the V1 16-bit range and was clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RangeWarning {
    /// Channel position within the block (0..=3).
    pub channel: usize,
    /// Raw value the caller asked for.
    pub requested: i64,
    /// Raw value actually written to the wire.
    pub clamped: i16,
}

/// An encoded datagram plus any non-fatal range annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedFrame {
    pub bytes: Vec<u8>,
    pub warnings: Vec<RangeWarning>,
}

/// Uses the `nom` crate to parse a CoE datagram into block readings.
///
/// V1 datagrams always yield exactly one reading; V2 datagrams yield one
/// reading per distinct `(node, block)` its entries project onto.
pub fn parse_frame(input: &[u8], revision: ProtocolRevision) -> IResult<&[u8], Vec<BlockReading>> {
    match revision {
        ProtocolRevision::V1 => {
            let (remaining, reading) = parse_v1_frame(input)?;
            Ok((remaining, vec![reading]))
        }
        ProtocolRevision::V2 => parse_v2_frame(input),
    }
}

/// Parses one fixed-size V1 datagram.
fn parse_v1_frame(input: &[u8]) -> IResult<&[u8], BlockReading> {
    let (i, node) = be_u8(input)?;
    let (i, block) = be_u8(i)?;

    if is_digital_block(block) {
        let (i, bits) = le_u16(i)?;
        let (i, _pad) = take(COE_V1_PACKET_SIZE - 4)(i)?;
        let states = std::array::from_fn(|channel| (bits >> channel) & 1 == 1);
        Ok((
            i,
            BlockReading {
                node,
                block,
                data: BlockData::Digital { states },
            },
        ))
    } else {
        let mut raws = [0i16; ANALOG_CHANNELS];
        let mut remaining = i;
        for raw in raws.iter_mut() {
            let (r, value) = le_i16(remaining)?;
            *raw = value;
            remaining = r;
        }
        let mut units = [0u8; ANALOG_CHANNELS];
        for unit in units.iter_mut() {
            let (r, id) = be_u8(remaining)?;
            *unit = id;
            remaining = r;
        }
        let values = std::array::from_fn(|channel| {
            to_scaled(i64::from(raws[channel]), units[channel], ProtocolRevision::V1)
        });
        Ok((
            remaining,
            BlockReading {
                node,
                block,
                data: BlockData::Analog { values, units },
            },
        ))
    }
}

/// One raw V2 output entry before projection onto the legacy address space.
#[derive(Debug, Clone, Copy)]
struct V2Entry {
    node: u8,
    output: u16,
    unit: u8,
    raw: i32,
}

fn parse_v2_entry(input: &[u8]) -> IResult<&[u8], V2Entry> {
    let (i, node) = be_u8(input)?;
    let (i, output) = le_u16(i)?;
    let (i, unit) = be_u8(i)?;
    let (i, raw) = le_i32(i)?;
    Ok((i, V2Entry { node, output, unit, raw }))
}

/// Parses one variable-length V2 datagram.
///
/// Digital datagrams keep the 14-byte V1 framing under both revisions, so
/// a buffer that fails the version check but matches the digital layout is
/// parsed as a V1 digital frame instead of being rejected.
fn parse_v2_frame(input: &[u8]) -> IResult<&[u8], Vec<BlockReading>> {
    let (i, version_hi) = be_u8(input)?;
    let (i, version_lo) = be_u8(i)?;

    if version_hi != COE_V2_VERSION_HI || version_lo != COE_V2_VERSION_LO {
        if input.len() >= COE_V1_PACKET_SIZE && is_digital_block(input[1]) {
            let (remaining, reading) = parse_v1_frame(input)?;
            return Ok((remaining, vec![reading]));
        }
        return Err(NomErr::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }

    let (i, _message_length) = be_u8(i)?;
    let (i, count) = be_u8(i)?;

    let mut remaining = i;
    let mut readings: Vec<BlockReading> = Vec::new();
    for _ in 0..count {
        let (r, entry) = parse_v2_entry(remaining)?;
        remaining = r;
        project_v2_entry(&mut readings, entry);
    }

    Ok((remaining, readings))
}

/// Re-projects one V2 entry onto the legacy `(node, block, position)`
/// address space and merges it into the synthesized readings, grouping
/// entries that share a `(node, block)` pair in first-seen order.
///
/// Entries outside the addressable output range are skipped; the wire
/// allows them, the legacy address space does not.
fn project_v2_entry(readings: &mut Vec<BlockReading>, entry: V2Entry) {
    if entry.output > COE_V2_ANALOG_OUTPUT_OFFSET {
        let output = entry.output - COE_V2_ANALOG_OUTPUT_OFFSET;
        if output < 1 || output > u16::from(MAX_OUTPUT_NUMBER) {
            log::debug!("skipping V2 analog entry with output {output}");
            return;
        }
        // Range-checked above, mapping cannot fail
        let Ok(pos) = analog_position(output as u8) else {
            return;
        };
        let value = to_scaled(i64::from(entry.raw), entry.unit, ProtocolRevision::V2);
        let data = group_slot(readings, entry.node, pos.block, DataKind::Analog);
        if let BlockData::Analog { values, units } = data {
            values[pos.position] = value;
            units[pos.position] = entry.unit;
        }
    } else {
        if entry.output < 1 || entry.output > u16::from(MAX_OUTPUT_NUMBER) {
            log::debug!("skipping V2 digital entry with output {}", entry.output);
            return;
        }
        let Ok(pos) = digital_position(entry.output as u8) else {
            return;
        };
        let data = group_slot(readings, entry.node, pos.block, DataKind::Digital);
        if let BlockData::Digital { states } = data {
            states[pos.position] = entry.raw != 0;
        }
    }
}

/// Finds or creates the synthesized reading for a `(node, block)` pair.
fn group_slot<'a>(
    readings: &'a mut Vec<BlockReading>,
    node: u8,
    block: u8,
    kind: DataKind,
) -> &'a mut BlockData {
    if let Some(index) = readings
        .iter()
        .position(|r| r.node == node && r.block == block)
    {
        return &mut readings[index].data;
    }
    readings.push(BlockReading {
        node,
        block,
        data: BlockData::zeroed(kind),
    });
    &mut readings
        .last_mut()
        .expect("just pushed a reading")
        .data
}

/// Decodes one UDP payload into block readings.
///
/// Returns [`CoeError::MalformedPacket`] for buffers too short for their
/// framing or with unrecognized V2 version bytes; callers treat that as a
/// dropped datagram.
pub fn decode_datagram(
    input: &[u8],
    revision: ProtocolRevision,
) -> Result<Vec<BlockReading>, CoeError> {
    match parse_frame(input, revision) {
        Ok((_, readings)) => Ok(readings),
        Err(_) => Err(CoeError::MalformedPacket(format!(
            "{} byte datagram rejected as CoE V{}",
            input.len(),
            revision.number()
        ))),
    }
}

/// Packs one block payload into a wire-correct datagram.
///
/// Block id and payload kind must agree (digital payloads go to blocks 0
/// and 9, analog payloads to blocks 1-8). V1 analog values outside the
/// 16-bit raw range are clamped and annotated on the returned frame;
/// encoding never fails for range reasons.
pub fn pack_frame(
    node: u8,
    block: u8,
    payload: &BlockPayload,
    revision: ProtocolRevision,
) -> Result<PackedFrame, CoeError> {
    match payload {
        BlockPayload::Digital { states } => {
            if !is_digital_block(block) {
                return Err(CoeError::InvalidBlockNumber(block));
            }
            Ok(pack_digital(node, block, states))
        }
        BlockPayload::Analog { values, units } => {
            if !is_analog_block(block) {
                return Err(CoeError::InvalidBlockNumber(block));
            }
            match revision {
                ProtocolRevision::V1 => Ok(pack_analog_v1(node, block, values, units)),
                ProtocolRevision::V2 => pack_analog_v2(node, block, values, units),
            }
        }
    }
}

/// Digital framing is identical under both revisions: a 14-byte datagram
/// with the packed bitfield at offsets 2-3 and zero fill after.
fn pack_digital(node: u8, block: u8, states: &[bool; DIGITAL_CHANNELS]) -> PackedFrame {
    let mut buf = BytesMut::with_capacity(COE_V1_PACKET_SIZE);
    buf.put_u8(node);
    buf.put_u8(block);
    let mut bits = 0u16;
    for (channel, on) in states.iter().enumerate() {
        if *on {
            bits |= 1 << channel;
        }
    }
    buf.put_u16_le(bits);
    buf.put_bytes(0, COE_V1_PACKET_SIZE - 4);
    PackedFrame {
        bytes: buf.to_vec(),
        warnings: Vec::new(),
    }
}

fn pack_analog_v1(
    node: u8,
    block: u8,
    values: &[Option<f64>; ANALOG_CHANNELS],
    units: &[u8; ANALOG_CHANNELS],
) -> PackedFrame {
    let mut buf = BytesMut::with_capacity(COE_V1_PACKET_SIZE);
    buf.put_u8(node);
    buf.put_u8(block);

    let mut warnings = Vec::new();
    for channel in 0..ANALOG_CHANNELS {
        let value = values[channel].unwrap_or(0.0);
        let raw = to_raw(value, units[channel], ProtocolRevision::V1);
        let clamped = raw.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16;
        if i64::from(clamped) != raw {
            log::warn!(
                "value {value} exceeds V1 limits for unit {}, clamping to {clamped}; consider V2",
                units[channel]
            );
            warnings.push(RangeWarning {
                channel,
                requested: raw,
                clamped,
            });
        }
        buf.put_i16_le(clamped);
    }
    for unit in units {
        buf.put_u8(*unit);
    }

    PackedFrame {
        bytes: buf.to_vec(),
        warnings,
    }
}

/// V2 analog framing supports sparse writes: one entry per defined
/// channel, undefined channels omitted from the wire entirely.
fn pack_analog_v2(
    node: u8,
    block: u8,
    values: &[Option<f64>; ANALOG_CHANNELS],
    units: &[u8; ANALOG_CHANNELS],
) -> Result<PackedFrame, CoeError> {
    let defined: Vec<usize> = (0..ANALOG_CHANNELS)
        .filter(|channel| values[*channel].is_some())
        .collect();

    let mut buf =
        BytesMut::with_capacity(COE_V2_HEADER_SIZE + COE_V2_ENTRY_SIZE * defined.len());
    buf.put_u8(COE_V2_VERSION_HI);
    buf.put_u8(COE_V2_VERSION_LO);
    buf.put_u8((COE_V2_HEADER_SIZE + COE_V2_ENTRY_SIZE * defined.len()) as u8);
    buf.put_u8(defined.len() as u8);

    for channel in defined {
        let value = values[channel].unwrap_or(0.0);
        let output = analog_output_number(block, channel)?;
        buf.put_u8(node);
        buf.put_u16_le(u16::from(output) + COE_V2_ANALOG_OUTPUT_OFFSET);
        buf.put_u8(units[channel]);
        let raw = to_raw(value, units[channel], ProtocolRevision::V2)
            .clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        buf.put_i32_le(raw);
    }

    Ok(PackedFrame {
        bytes: buf.to_vec(),
        warnings: Vec::new(),
    })
}
