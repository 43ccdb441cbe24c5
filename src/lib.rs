//! # coe-rs - A Rust Crate for CoE (CAN over Ethernet) Communication
//!
//! The coe-rs crate provides a Rust-based implementation of the CoE
//! protocol, the UDP-based telemetry/control protocol spoken by TA CMI
//! building-automation controllers to exchange analog and digital
//! readings and commands.
//!
//! ## Features
//!
//! - Decode inbound CoE datagrams of both wire revisions (V1 and V2)
//!   into typed block readings
//! - Encode outbound writes into wire-correct datagrams, including
//!   sparse V2 writes and clamped-with-warning V1 analog values
//! - Unit-dependent fixed-point scaling with a revision-2 override layer
//!   and a lenient fallback for unknown unit ids
//! - Merge single-channel writes into full protocol blocks against a
//!   per-destination block-state store
//! - Debounce bursts of writes into one outbound packet per block
//! - Shared UDP transport with per-revision ports and subscriber fan-out
//! - Support for logging and error handling
//!
//! ## Usage
//!
//! To use the coe-rs crate in your Rust project, add the following to
//! your Cargo.toml file:
//!
//! ```toml
//! [dependencies]
//! coe-rs = "1.0.0"
//! ```
//!
//! Then, in your Rust code, you can import the necessary modules and
//! functions:
//!
//! ```rust
//! use coe_rs::{
//!     decode_datagram, pack_frame, BlockReading, BlockScheduler,
//!     CmiClient, CoeError, DataKind, ProtocolRevision, init_logger,
//! };
//! ```

pub mod cmi_client;
pub mod coe;
pub mod constants;
pub mod error;
pub mod logging;
pub mod payload;

pub use crate::error::CoeError;
pub use crate::logging::{init_logger, log_info};

// Core CoE types
pub use cmi_client::{CmiClient, CmiClientConfig};
pub use coe::addressing::{analog_position, digital_position, BlockPosition};
pub use coe::frame::{
    decode_datagram, pack_frame, BlockData, BlockPayload, BlockReading, DataKind, PackedFrame,
    ProtocolRevision, RangeWarning,
};
pub use coe::monitor::{ChannelFilter, ChannelValue, MonitorEvent, MonitorFilter};
pub use coe::scheduler::{
    BlockScheduler, BlockWrite, FlushObserver, FlushReport, PacketSink, SchedulerConfig,
};
pub use coe::state::{BlockStateStore, CacheKey};
pub use coe::udp::{CoeUdpTransport, InboundReading};
pub use payload::{to_raw, to_scaled, unit_info, UnitInfo};

/// Connect to a CMI at the given address.
///
/// # Arguments
/// * `host` - IP address of the CMI (e.g., "192.168.0.100")
/// * `revision` - Wire revision to speak; also selects the UDP port
///
/// # Returns
/// * `Ok(CmiClient)` - Connected client handle for communication
/// * `Err(CoeError)` - Bind failed
pub async fn connect(
    host: std::net::IpAddr,
    revision: ProtocolRevision,
) -> Result<CmiClient, CoeError> {
    CmiClient::connect(host, revision).await
}
