//! CoE Protocol Constants
//!
//! This module defines constants used in the CoE (CAN over Ethernet)
//! protocol implementation, based on the TA CMI wire specification.

use std::time::Duration;

/// UDP port used by CoE protocol revision V1
pub const COE_PORT_V1: u16 = 5441;

/// UDP port used by CoE protocol revision V2
pub const COE_PORT_V2: u16 = 5442;

/// Fixed size of every V1 datagram (and of digital datagrams under both revisions)
pub const COE_V1_PACKET_SIZE: usize = 14;

/// Size of the V2 datagram header (version word, message length, block count)
pub const COE_V2_HEADER_SIZE: usize = 4;

/// Size of one V2 output entry
pub const COE_V2_ENTRY_SIZE: usize = 8;

/// Maximum number of entries in one V2 datagram
pub const COE_V2_MAX_ENTRIES: usize = 16;

/// First version byte of a V2 datagram header
pub const COE_V2_VERSION_HI: u8 = 0x02;

/// Second version byte of a V2 datagram header
pub const COE_V2_VERSION_LO: u8 = 0x00;

/// Block id carrying digital outputs 1-16
pub const DIGITAL_BLOCK_LOW: u8 = 0;

/// Block id carrying digital outputs 17-32
pub const DIGITAL_BLOCK_HIGH: u8 = 9;

/// First analog block id
pub const ANALOG_BLOCK_MIN: u8 = 1;

/// Last analog block id
pub const ANALOG_BLOCK_MAX: u8 = 8;

/// Channels per analog block
pub const ANALOG_CHANNELS: usize = 4;

/// Channels per digital block
pub const DIGITAL_CHANNELS: usize = 16;

/// Highest addressable output number per data kind
pub const MAX_OUTPUT_NUMBER: u8 = 32;

/// Offset added to analog output numbers on the V2 wire.
/// Output-number fields above this value denote analog outputs.
pub const COE_V2_ANALOG_OUTPUT_OFFSET: u16 = 255;

/// Debounce window for single-channel output writes (time slot for message collection)
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(50);

/// Debounce window for grouped 4-channel block writes
pub const DEBOUNCE_DELAY_GROUPED: Duration = Duration::from_millis(100);

/// Returns true for the two digital block ids.
pub const fn is_digital_block(block: u8) -> bool {
    block == DIGITAL_BLOCK_LOW || block == DIGITAL_BLOCK_HIGH
}

/// Returns true for the analog block id range.
pub const fn is_analog_block(block: u8) -> bool {
    block >= ANALOG_BLOCK_MIN && block <= ANALOG_BLOCK_MAX
}
