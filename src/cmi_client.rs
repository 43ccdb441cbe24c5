//! # CMI Client
//!
//! This module provides the CmiClient struct, which serves as the main
//! entry point for talking to one CMI destination: it owns the shared UDP
//! transport, the merge/debounce scheduler and the block-state store
//! behind it, and exposes per-output write calls plus a subscription to
//! decoded inbound readings.
//!
//! Inbound readings refresh the block-state store, so outbound merges for
//! a key start from the device's last observed values rather than zero.

use crate::coe::addressing::{analog_position, digital_group_position, digital_position};
use crate::coe::frame::{DataKind, ProtocolRevision};
use crate::coe::scheduler::{BlockScheduler, BlockWrite, FlushObserver, SchedulerConfig};
use crate::coe::state::CacheKey;
use crate::coe::udp::{CoeUdpTransport, InboundReading};
use crate::constants::{DEBOUNCE_DELAY, DEBOUNCE_DELAY_GROUPED};
use crate::error::CoeError;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Configuration for one CMI destination.
#[derive(Debug, Clone, Copy)]
pub struct CmiClientConfig {
    /// Address of the CMI.
    pub host: IpAddr,
    /// Wire revision; also selects the UDP port (5441/5442).
    pub revision: ProtocolRevision,
    /// Debounce window for single-output writes.
    pub debounce: Duration,
    /// Local bind port override; defaults to the revision port.
    pub local_port: Option<u16>,
    /// Target port override; defaults to the revision port.
    pub target_port: Option<u16>,
}

impl CmiClientConfig {
    pub fn new(host: IpAddr, revision: ProtocolRevision) -> Self {
        CmiClientConfig {
            host,
            revision,
            debounce: DEBOUNCE_DELAY,
            local_port: None,
            target_port: None,
        }
    }
}

/// Handle for one CMI destination.
pub struct CmiClient {
    transport: Arc<CoeUdpTransport>,
    scheduler: BlockScheduler,
    record_task: JoinHandle<()>,
}

impl CmiClient {
    /// Connects with default configuration.
    pub async fn connect(host: IpAddr, revision: ProtocolRevision) -> Result<Self, CoeError> {
        Self::connect_with_config(CmiClientConfig::new(host, revision)).await
    }

    pub async fn connect_with_config(config: CmiClientConfig) -> Result<Self, CoeError> {
        Self::build(config, None).await
    }

    /// Connects with a flush observer attached to the scheduler.
    pub async fn connect_with_observer(
        config: CmiClientConfig,
        observer: Box<FlushObserver>,
    ) -> Result<Self, CoeError> {
        Self::build(config, Some(observer)).await
    }

    async fn build(
        config: CmiClientConfig,
        observer: Option<Box<FlushObserver>>,
    ) -> Result<Self, CoeError> {
        let local_port = config.local_port.unwrap_or_else(|| config.revision.port());
        let target = std::net::SocketAddr::new(
            config.host,
            config.target_port.unwrap_or_else(|| config.revision.port()),
        );
        let transport =
            Arc::new(CoeUdpTransport::bind_with_port(target, config.revision, local_port).await?);

        let scheduler_config = SchedulerConfig {
            revision: config.revision,
            debounce: config.debounce,
        };
        let scheduler = match observer {
            Some(observer) => BlockScheduler::with_observer(scheduler_config, observer),
            None => BlockScheduler::new(scheduler_config),
        };

        // Read path: keep the block-state store fresh from the wire
        let mut readings = transport.subscribe();
        let record_scheduler = scheduler.clone();
        let record_task = tokio::spawn(async move {
            loop {
                match readings.recv().await {
                    Ok(inbound) => record_scheduler.record_reading(&inbound.reading),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::warn!("reading recorder lagged, {missed} readings skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(CmiClient {
            transport,
            scheduler,
            record_task,
        })
    }

    /// Writes one analog output (1..=32). Merged with its block siblings
    /// and debounced before hitting the wire.
    pub fn write_output(&self, node: u8, output: u8, value: f64, unit: u8) -> Result<(), CoeError> {
        let pos = analog_position(output)?;
        self.scheduler.enqueue(
            CacheKey::new(node, pos.block, DataKind::Analog),
            BlockWrite::analog_channel(pos.position, value, unit),
            self.transport.clone(),
            None,
        )
    }

    /// Writes one digital output (1..=32).
    pub fn write_digital_output(&self, node: u8, output: u8, on: bool) -> Result<(), CoeError> {
        let pos = digital_position(output)?;
        self.scheduler.enqueue(
            CacheKey::new(node, pos.block, DataKind::Digital),
            BlockWrite::digital_channel(pos.position, on),
            self.transport.clone(),
            None,
        )
    }

    /// Writes a whole analog block (1..=8) at once. Grouped writes use
    /// the longer debounce window.
    pub fn write_analog_block(
        &self,
        node: u8,
        block: u8,
        values: [f64; 4],
        units: [u8; 4],
    ) -> Result<(), CoeError> {
        self.scheduler.enqueue_with_delay(
            CacheKey::new(node, block, DataKind::Analog),
            BlockWrite::analog_block(values, units),
            self.transport.clone(),
            None,
            DEBOUNCE_DELAY_GROUPED,
        )
    }

    /// Writes a whole digital block (0 or 9) at once.
    pub fn write_digital_block(
        &self,
        node: u8,
        block: u8,
        states: [bool; 16],
    ) -> Result<(), CoeError> {
        self.scheduler.enqueue_with_delay(
            CacheKey::new(node, block, DataKind::Digital),
            BlockWrite::digital_block(states),
            self.transport.clone(),
            None,
            DEBOUNCE_DELAY_GROUPED,
        )
    }

    /// Writes one 4-bit digital group (1..=8, four bits per group).
    /// Groups 1-4 land in block 0, groups 5-8 in block 9; the other
    /// twelve bits of the block keep their cached state.
    pub fn write_digital_group(
        &self,
        node: u8,
        group: u8,
        bits: [bool; 4],
    ) -> Result<(), CoeError> {
        let pos = digital_group_position(group)?;
        self.scheduler.enqueue_with_delay(
            CacheKey::new(node, pos.block, DataKind::Digital),
            BlockWrite::digital_group(pos.position, bits),
            self.transport.clone(),
            None,
            DEBOUNCE_DELAY_GROUPED,
        )
    }

    /// Queues an arbitrary partial write with an optional passthrough
    /// payload forwarded on the flush report.
    pub fn enqueue(
        &self,
        key: CacheKey,
        write: BlockWrite,
        passthrough: Option<serde_json::Value>,
    ) -> Result<(), CoeError> {
        self.scheduler
            .enqueue(key, write, self.transport.clone(), passthrough)
    }

    /// Subscribes to decoded inbound readings.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundReading> {
        self.transport.subscribe()
    }

    pub fn scheduler(&self) -> &BlockScheduler {
        &self.scheduler
    }

    pub fn transport(&self) -> &Arc<CoeUdpTransport> {
        &self.transport
    }

    /// Tears the client down: cancels every pending debounce window
    /// (dropping not-yet-flushed writes) and stops the receive loop.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.transport.shutdown();
        self.record_task.abort();
    }
}

impl Drop for CmiClient {
    fn drop(&mut self) {
        self.record_task.abort();
    }
}
