//! The coe module contains the components responsible for the core CoE
//! protocol implementation: datagram parsing and packing, output-number
//! addressing, block-state caching, the merge/debounce scheduler and the
//! UDP transport.

pub mod addressing;
pub mod frame;
pub mod monitor;
pub mod scheduler;
pub mod state;
pub mod udp;

pub use addressing::*;
pub use frame::*;
pub use monitor::*;
pub use scheduler::*;
pub use state::*;
pub use udp::*;

/// One decoded block reading: the unit of wire transfer.
pub use frame::BlockReading;

/// The two incompatible CoE wire revisions.
pub use frame::ProtocolRevision;
