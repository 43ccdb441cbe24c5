//! # Merge/Debounce Scheduler
//!
//! Upstream producers address channels individually (one value per
//! message) but the wire transmits whole 4-channel or 16-channel blocks.
//! Without merge-and-debounce, every single-channel update would either
//! require callers to know all sibling values or would race and overwrite
//! them. This scheduler reads the last-known block state, overlays the
//! partial write, buffers the merged block per `(node, block, kind)` key
//! and flushes exactly one encoded packet per key after a quiet period.
//! The debounce window trades a small fixed latency for batching
//! correctness: near-simultaneous single-channel writes collapse into one
//! packet reflecting all of them.
//!
//! State machine per key: `Idle -> Pending -> Idle`. The pending entry is
//! created on the first write to an idle key, merged in place by
//! subsequent writes before the timer fires, and destroyed the instant
//! the flush completes. Each key owns one cancellable timer task; timer
//! replacement and pending-merge happen atomically under the scheduler
//! lock. Tearing the scheduler down silently drops not-yet-flushed
//! entries.

use crate::coe::frame::{
    pack_frame, BlockData, BlockReading, DataKind, ProtocolRevision,
};
use crate::coe::state::{BlockStateStore, CacheKey};
use crate::constants::{
    is_analog_block, is_digital_block, ANALOG_CHANNELS, DEBOUNCE_DELAY, DIGITAL_CHANNELS,
};
use crate::error::CoeError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Transport collaborator invoked once per flush. Sends are
/// fire-and-forget: a failure is surfaced to the log/caller and never
/// retried, and the merge and cache update have already completed by the
/// time the send is attempted.
#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn send_packet(&self, packet: &[u8]) -> Result<(), CoeError>;
}

/// A partial block write. `None` entries leave the corresponding cached
/// channel untouched; this is what lets a single-channel write avoid
/// clobbering its siblings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockWrite {
    Analog {
        values: [Option<f64>; ANALOG_CHANNELS],
        units: [Option<u8>; ANALOG_CHANNELS],
    },
    Digital {
        states: [Option<bool>; DIGITAL_CHANNELS],
    },
}

impl BlockWrite {
    pub fn kind(&self) -> DataKind {
        match self {
            BlockWrite::Analog { .. } => DataKind::Analog,
            BlockWrite::Digital { .. } => DataKind::Digital,
        }
    }

    /// A write of one analog channel (position 0..=3) with its unit.
    pub fn analog_channel(position: usize, value: f64, unit: u8) -> Self {
        let mut values = [None; ANALOG_CHANNELS];
        let mut units = [None; ANALOG_CHANNELS];
        values[position] = Some(value);
        units[position] = Some(unit);
        BlockWrite::Analog { values, units }
    }

    /// A write of all four analog channels at once.
    pub fn analog_block(values: [f64; ANALOG_CHANNELS], units: [u8; ANALOG_CHANNELS]) -> Self {
        BlockWrite::Analog {
            values: values.map(Some),
            units: units.map(Some),
        }
    }

    /// A write of one digital channel (position 0..=15).
    pub fn digital_channel(position: usize, on: bool) -> Self {
        let mut states = [None; DIGITAL_CHANNELS];
        states[position] = Some(on);
        BlockWrite::Digital { states }
    }

    /// A write of all sixteen digital channels at once.
    pub fn digital_block(states: [bool; DIGITAL_CHANNELS]) -> Self {
        BlockWrite::Digital {
            states: states.map(Some),
        }
    }

    /// A write of one 4-bit digital group at the given bit offset
    /// (0, 4, 8 or 12), leaving the other twelve bits untouched.
    pub fn digital_group(offset: usize, bits: [bool; 4]) -> Self {
        let mut states = [None; DIGITAL_CHANNELS];
        for (i, on) in bits.iter().enumerate() {
            states[offset + i] = Some(*on);
        }
        BlockWrite::Digital { states }
    }
}

/// Overlays every defined index of a partial write onto full block
/// contents, last write wins per index.
fn apply_write(data: &mut BlockData, write: &BlockWrite) {
    match (data, write) {
        (
            BlockData::Analog { values, units },
            BlockWrite::Analog { values: new_values, units: new_units },
        ) => {
            for channel in 0..ANALOG_CHANNELS {
                if let Some(value) = new_values[channel] {
                    values[channel] = value;
                }
                if let Some(unit) = new_units[channel] {
                    units[channel] = unit;
                }
            }
        }
        (BlockData::Digital { states }, BlockWrite::Digital { states: new_states }) => {
            for channel in 0..DIGITAL_CHANNELS {
                if let Some(on) = new_states[channel] {
                    states[channel] = on;
                }
            }
        }
        // Kind agreement is checked at enqueue
        _ => debug_assert!(false, "write kind mismatch"),
    }
}

/// Debug descriptor emitted to the observer boundary on every flush.
#[derive(Debug, Clone, Serialize)]
pub struct FlushReport {
    /// Uppercase hex rendering of the datagram that was sent.
    pub hex: String,
    pub node: u8,
    pub block: u8,
    pub kind: DataKind,
    pub revision: u8,
    /// The merged block contents the datagram reflects.
    pub state: BlockData,
    /// Most recent passthrough payload recorded during the debounce
    /// window, forwarded alongside the debug output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<serde_json::Value>,
}

/// Observer callback for flush reports. Best-effort and isolated: a
/// failure here is logged and never prevents the transport send.
pub type FlushObserver = dyn Fn(&FlushReport) -> Result<(), CoeError> + Send + Sync;

/// Scheduler configuration.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub revision: ProtocolRevision,
    /// Quiet period after the last write before the merged block is
    /// flushed. Single-channel output nodes use the short default;
    /// grouped multi-channel writers pass a longer per-call window.
    pub debounce: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            revision: ProtocolRevision::V1,
            debounce: DEBOUNCE_DELAY,
        }
    }
}

struct PendingWrite {
    data: BlockData,
    sink: Arc<dyn PacketSink>,
    passthrough: Option<serde_json::Value>,
    queued_at: Instant,
    timer: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    store: BlockStateStore,
    pending: HashMap<CacheKey, PendingWrite>,
}

struct SchedulerShared {
    revision: ProtocolRevision,
    debounce: Duration,
    observer: Option<Box<FlushObserver>>,
    inner: Mutex<SchedulerInner>,
}

/// Per-destination merge/debounce scheduler.
///
/// Owns the block-state store it merges against; multiple independent
/// schedulers (per device, per test) never share state. Cloning yields
/// another handle onto the same scheduler. Must be used from within a
/// tokio runtime (debounce timers are spawned tasks).
#[derive(Clone)]
pub struct BlockScheduler {
    shared: Arc<SchedulerShared>,
}

impl BlockScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::build(config, None)
    }

    /// Creates a scheduler with a flush observer attached.
    pub fn with_observer(config: SchedulerConfig, observer: Box<FlushObserver>) -> Self {
        Self::build(config, Some(observer))
    }

    fn build(config: SchedulerConfig, observer: Option<Box<FlushObserver>>) -> Self {
        BlockScheduler {
            shared: Arc::new(SchedulerShared {
                revision: config.revision,
                debounce: config.debounce,
                observer,
                inner: Mutex::new(SchedulerInner {
                    store: BlockStateStore::new(),
                    pending: HashMap::new(),
                }),
            }),
        }
    }

    pub fn revision(&self) -> ProtocolRevision {
        self.shared.revision
    }

    /// Queues a partial write for the given key using the configured
    /// debounce window.
    pub fn enqueue(
        &self,
        key: CacheKey,
        write: BlockWrite,
        sink: Arc<dyn PacketSink>,
        passthrough: Option<serde_json::Value>,
    ) -> Result<(), CoeError> {
        self.enqueue_with_delay(key, write, sink, passthrough, self.shared.debounce)
    }

    /// Queues a partial write with an explicit debounce window.
    ///
    /// Merges the write into the last-known block state (defined indices
    /// only), creates or updates the key's pending entry, records the
    /// most recent sink and passthrough payload, and resets the key's
    /// debounce timer.
    pub fn enqueue_with_delay(
        &self,
        key: CacheKey,
        write: BlockWrite,
        sink: Arc<dyn PacketSink>,
        passthrough: Option<serde_json::Value>,
        delay: Duration,
    ) -> Result<(), CoeError> {
        if write.kind() != key.kind {
            return Err(CoeError::KindMismatch {
                block: key.block,
                expected: key.kind.as_str(),
            });
        }
        match key.kind {
            DataKind::Analog if !is_analog_block(key.block) => {
                return Err(CoeError::InvalidBlockNumber(key.block));
            }
            DataKind::Digital if !is_digital_block(key.block) => {
                return Err(CoeError::InvalidBlockNumber(key.block));
            }
            _ => {}
        }

        let mut guard = self.shared.inner.lock().unwrap();
        let inner = &mut *guard;
        match inner.pending.entry(key) {
            Entry::Occupied(mut entry) => {
                // Merge into the existing pending snapshot rather than
                // overwriting it wholesale: a burst of writes to different
                // channels must all survive into the final flush.
                let pending = entry.get_mut();
                apply_write(&mut pending.data, &write);
                pending.sink = sink;
                if passthrough.is_some() {
                    pending.passthrough = passthrough;
                }
                if let Some(timer) = pending.timer.take() {
                    timer.abort();
                }
                pending.timer = Some(self.spawn_timer(key, delay));
            }
            Entry::Vacant(slot) => {
                let mut data = inner.store.get(&key);
                apply_write(&mut data, &write);
                slot.insert(PendingWrite {
                    data,
                    sink,
                    passthrough,
                    queued_at: Instant::now(),
                    timer: Some(self.spawn_timer(key, delay)),
                });
            }
        }
        Ok(())
    }

    fn spawn_timer(&self, key: CacheKey, delay: Duration) -> JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            flush(shared, key);
        })
    }

    /// Records an inbound reading into the block-state store, so outbound
    /// merges for that key start from the device's last observed values.
    pub fn record_reading(&self, reading: &BlockReading) {
        let key = CacheKey::new(reading.node, reading.block, reading.kind());
        let mut guard = self.shared.inner.lock().unwrap();
        guard.store.set(&key, reading.data);
    }

    /// Returns the cached block contents for a key (zero-initialized if
    /// never written).
    pub fn cached(&self, key: &CacheKey) -> BlockData {
        self.shared.inner.lock().unwrap().store.get(key)
    }

    /// Number of keys with an active debounce window.
    pub fn pending_count(&self) -> usize {
        self.shared.inner.lock().unwrap().pending.len()
    }

    /// Cancels the pending write for one key, dropping its merged data.
    /// Returns true if a pending entry existed.
    pub fn cancel(&self, key: &CacheKey) -> bool {
        let mut guard = self.shared.inner.lock().unwrap();
        match guard.pending.remove(key) {
            Some(pending) => {
                if let Some(timer) = pending.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Drops every pending write and cancels its timer. Not-yet-flushed
    /// data is lost; accepted tradeoff on teardown.
    pub fn shutdown(&self) {
        let mut guard = self.shared.inner.lock().unwrap();
        for (_, pending) in guard.pending.drain() {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
        }
    }
}

/// Timer expiry: encode the merged snapshot, persist it so the next
/// partial write starts from flushed state, emit the flush report, then
/// invoke the sink exactly once and retire the pending entry.
///
/// The send itself runs as a detached task: it is fire-and-forget, never
/// awaited by the merge logic, and its outcome is only observable in the
/// log.
fn flush(shared: Arc<SchedulerShared>, key: CacheKey) {
    let (packed, data, sink, passthrough) = {
        let mut guard = shared.inner.lock().unwrap();
        let inner = &mut *guard;
        let Some(pending) = inner.pending.remove(&key) else {
            // Timer fired for a key that was flushed or cancelled already
            return;
        };
        let packed = match pack_frame(key.node, key.block, &pending.data.to_payload(), shared.revision)
        {
            Ok(packed) => packed,
            Err(err) => {
                log::error!("failed to encode block {key}: {err}");
                return;
            }
        };
        inner.store.set(&key, pending.data);
        log::debug!(
            "flushing {key} after {:?} in the queue",
            pending.queued_at.elapsed()
        );
        (packed, pending.data, pending.sink, pending.passthrough)
    };

    let report = FlushReport {
        hex: hex::encode_upper(&packed.bytes),
        node: key.node,
        block: key.block,
        kind: key.kind,
        revision: shared.revision.number(),
        state: data,
        passthrough,
    };
    if let Some(observer) = &shared.observer {
        // Debug emission is best-effort; it must never block the send
        if let Err(err) = observer(&report) {
            log::warn!("flush observer failed for {key}: {err}");
        }
    }

    tokio::spawn(async move {
        if let Err(err) = sink.send_packet(&packed.bytes).await {
            log::error!("failed to send block {key}: {err}");
        }
    });
}
