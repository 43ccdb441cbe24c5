//! Output-number addressing.
//!
//! CAN network outputs are numbered 1..=32 per data kind, but the wire
//! transfers whole blocks: analog blocks 1..=8 carry four channels each,
//! digital outputs ride in two 16-bit blocks (0 for outputs 1-16, 9 for
//! outputs 17-32). The mapping here is the single source of truth for both
//! the encode and the decode path; it is a bijection over its domain.

use crate::constants::{
    ANALOG_CHANNELS, DIGITAL_BLOCK_HIGH, DIGITAL_BLOCK_LOW, DIGITAL_CHANNELS, MAX_OUTPUT_NUMBER,
};
use crate::error::CoeError;

/// Block id and zero-based position of one output within its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPosition {
    pub block: u8,
    pub position: usize,
}

/// Maps an analog output number (1..=32) to its block (1..=8) and position (0..=3).
pub fn analog_position(output: u8) -> Result<BlockPosition, CoeError> {
    if output < 1 || output > MAX_OUTPUT_NUMBER {
        return Err(CoeError::InvalidOutputNumber(output));
    }
    let index = usize::from(output - 1);
    Ok(BlockPosition {
        block: (index / ANALOG_CHANNELS) as u8 + 1,
        position: index % ANALOG_CHANNELS,
    })
}

/// Maps a digital output number (1..=32) to block 0 or 9 and position (0..=15).
pub fn digital_position(output: u8) -> Result<BlockPosition, CoeError> {
    if output < 1 || output > MAX_OUTPUT_NUMBER {
        return Err(CoeError::InvalidOutputNumber(output));
    }
    if output <= DIGITAL_CHANNELS as u8 {
        Ok(BlockPosition {
            block: DIGITAL_BLOCK_LOW,
            position: usize::from(output - 1),
        })
    } else {
        Ok(BlockPosition {
            block: DIGITAL_BLOCK_HIGH,
            position: usize::from(output - 17),
        })
    }
}

/// Inverse of [`analog_position`]: output number for a block/position pair.
pub fn analog_output_number(block: u8, position: usize) -> Result<u8, CoeError> {
    if !crate::constants::is_analog_block(block) {
        return Err(CoeError::InvalidBlockNumber(block));
    }
    if position >= ANALOG_CHANNELS {
        return Err(CoeError::InvalidOutputNumber(position as u8));
    }
    Ok((block - 1) * ANALOG_CHANNELS as u8 + position as u8 + 1)
}

/// Inverse of [`digital_position`]: output number for a block/position pair.
pub fn digital_output_number(block: u8, position: usize) -> Result<u8, CoeError> {
    if position >= DIGITAL_CHANNELS {
        return Err(CoeError::InvalidOutputNumber(position as u8));
    }
    match block {
        DIGITAL_BLOCK_LOW => Ok(position as u8 + 1),
        DIGITAL_BLOCK_HIGH => Ok(position as u8 + 17),
        other => Err(CoeError::InvalidBlockNumber(other)),
    }
}

/// Maps a grouped digital output group (1..=8, four bits per group) to its
/// CoE block and bit offset. Groups 1-4 land in block 0, groups 5-8 in
/// block 9, at offsets 0, 4, 8 and 12 within the 16-bit field.
pub fn digital_group_position(group: u8) -> Result<BlockPosition, CoeError> {
    if group < 1 || group > 8 {
        return Err(CoeError::InvalidBlockNumber(group));
    }
    let index = group - 1;
    Ok(BlockPosition {
        block: if index < 4 {
            DIGITAL_BLOCK_LOW
        } else {
            DIGITAL_BLOCK_HIGH
        },
        position: usize::from(index % 4) * 4,
    })
}
