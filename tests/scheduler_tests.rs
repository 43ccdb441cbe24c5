//! Tests for the merge/debounce scheduler: sibling preservation, burst
//! coalescing, flush-to-store persistence and the observer boundary.

use async_trait::async_trait;
use coe_rs::coe::frame::{decode_datagram, BlockData, BlockReading, DataKind, ProtocolRevision};
use coe_rs::coe::scheduler::{
    BlockScheduler, BlockWrite, FlushReport, PacketSink, SchedulerConfig,
};
use coe_rs::coe::state::CacheKey;
use coe_rs::CoeError;
use serde_json::json;
use tokio_test::assert_ok;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sink that records every packet it is asked to send.
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSink {
    fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PacketSink for RecordingSink {
    async fn send_packet(&self, packet: &[u8]) -> Result<(), CoeError> {
        self.sent.lock().unwrap().push(packet.to_vec());
        Ok(())
    }
}

/// Sink that always fails; the scheduler must surface this without
/// retrying or corrupting cached state.
struct FailingSink;

#[async_trait]
impl PacketSink for FailingSink {
    async fn send_packet(&self, _packet: &[u8]) -> Result<(), CoeError> {
        Err(CoeError::Transport("sink unavailable".into()))
    }
}

fn scheduler_v1() -> BlockScheduler {
    BlockScheduler::new(SchedulerConfig {
        revision: ProtocolRevision::V1,
        debounce: Duration::from_millis(50),
    })
}

/// Virtual-time sleep long enough for any pending debounce to fire.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_burst_into_one_packet() {
    let scheduler = scheduler_v1();
    let sink = Arc::new(RecordingSink::default());
    let key = CacheKey::new(1, 1, DataKind::Analog);

    for (channel, value) in [(0, 10.0), (1, 20.0), (2, 30.0)] {
        assert_ok!(scheduler.enqueue(
            key,
            BlockWrite::analog_channel(channel, value, 1),
            sink.clone(),
            None,
        ));
    }
    assert_eq!(scheduler.pending_count(), 1);

    settle().await;

    let sent = sink.sent();
    assert_eq!(sent.len(), 1, "burst must collapse into one packet");
    let readings = decode_datagram(&sent[0], ProtocolRevision::V1).unwrap();
    assert_eq!(
        readings[0].data,
        BlockData::Analog {
            values: [10.0, 20.0, 30.0, 0.0],
            units: [1, 1, 1, 0],
        }
    );
    assert_eq!(scheduler.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_merge_is_idempotent() {
    let key = CacheKey::new(2, 3, DataKind::Analog);
    let write = BlockWrite::analog_channel(1, 42.5, 1);

    let once = scheduler_v1();
    let once_sink = Arc::new(RecordingSink::default());
    once.enqueue(key, write, once_sink.clone(), None).unwrap();

    let twice = scheduler_v1();
    let twice_sink = Arc::new(RecordingSink::default());
    twice.enqueue(key, write, twice_sink.clone(), None).unwrap();
    twice.enqueue(key, write, twice_sink.clone(), None).unwrap();

    settle().await;

    assert_eq!(once_sink.sent().len(), 1);
    assert_eq!(twice_sink.sent().len(), 1);
    assert_eq!(once_sink.sent(), twice_sink.sent());
}

#[tokio::test(start_paused = true)]
async fn test_single_channel_write_preserves_siblings() {
    let scheduler = scheduler_v1();
    let sink = Arc::new(RecordingSink::default());
    let key = CacheKey::new(1, 1, DataKind::Analog);

    // Device previously reported values on all four channels
    scheduler.record_reading(&BlockReading {
        node: 1,
        block: 1,
        data: BlockData::Analog {
            values: [1.0, 2.0, 3.0, 4.0],
            units: [1, 1, 1, 1],
        },
    });

    scheduler
        .enqueue(key, BlockWrite::analog_channel(2, 99.0, 1), sink.clone(), None)
        .unwrap();
    settle().await;

    let sent = sink.sent();
    let readings = decode_datagram(&sent[0], ProtocolRevision::V1).unwrap();
    assert_eq!(
        readings[0].data,
        BlockData::Analog {
            values: [1.0, 2.0, 99.0, 4.0],
            units: [1, 1, 1, 1],
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_flush_persists_into_store() {
    let scheduler = scheduler_v1();
    let sink = Arc::new(RecordingSink::default());
    let key = CacheKey::new(4, 2, DataKind::Analog);

    scheduler
        .enqueue(key, BlockWrite::analog_channel(0, 11.0, 1), sink.clone(), None)
        .unwrap();
    settle().await;

    assert_eq!(
        scheduler.cached(&key),
        BlockData::Analog {
            values: [11.0, 0.0, 0.0, 0.0],
            units: [1, 0, 0, 0],
        }
    );

    // The next partial write starts from the flushed state
    scheduler
        .enqueue(key, BlockWrite::analog_channel(3, 44.0, 1), sink.clone(), None)
        .unwrap();
    settle().await;

    let sent = sink.sent();
    assert_eq!(sent.len(), 2);
    let readings = decode_datagram(&sent[1], ProtocolRevision::V1).unwrap();
    assert_eq!(
        readings[0].data,
        BlockData::Analog {
            values: [11.0, 0.0, 0.0, 44.0],
            units: [1, 0, 0, 1],
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_flush_independently() {
    let scheduler = scheduler_v1();
    let sink = Arc::new(RecordingSink::default());

    scheduler
        .enqueue(
            CacheKey::new(1, 1, DataKind::Analog),
            BlockWrite::analog_channel(0, 1.0, 0),
            sink.clone(),
            None,
        )
        .unwrap();
    scheduler
        .enqueue(
            CacheKey::new(1, 0, DataKind::Digital),
            BlockWrite::digital_channel(5, true),
            sink.clone(),
            None,
        )
        .unwrap();
    assert_eq!(scheduler.pending_count(), 2);

    settle().await;
    assert_eq!(sink.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_digital_group_write_merges_bits() {
    let scheduler = scheduler_v1();
    let sink = Arc::new(RecordingSink::default());
    let key = CacheKey::new(1, 0, DataKind::Digital);

    scheduler
        .enqueue(key, BlockWrite::digital_channel(0, true), sink.clone(), None)
        .unwrap();
    scheduler
        .enqueue(
            key,
            BlockWrite::digital_group(4, [true, false, true, false]),
            sink.clone(),
            None,
        )
        .unwrap();
    settle().await;

    let sent = sink.sent();
    assert_eq!(sent.len(), 1);
    let readings = decode_datagram(&sent[0], ProtocolRevision::V1).unwrap();
    let BlockData::Digital { states } = readings[0].data else {
        panic!("expected digital block");
    };
    assert!(states[0] && states[4] && states[6]);
    assert_eq!(states.iter().filter(|on| **on).count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_observer_sees_merged_flush_report() {
    let reports: Arc<Mutex<Vec<FlushReport>>> = Arc::new(Mutex::new(Vec::new()));
    let observer_reports = reports.clone();
    let scheduler = BlockScheduler::with_observer(
        SchedulerConfig {
            revision: ProtocolRevision::V1,
            debounce: Duration::from_millis(50),
        },
        Box::new(move |report| {
            observer_reports.lock().unwrap().push(report.clone());
            Ok(())
        }),
    );
    let sink = Arc::new(RecordingSink::default());
    let key = CacheKey::new(1, 3, DataKind::Analog);

    // Most recent passthrough wins; a later write without one keeps it
    scheduler
        .enqueue(
            key,
            BlockWrite::analog_channel(0, 10.0, 1),
            sink.clone(),
            Some(json!({"request": "first"})),
        )
        .unwrap();
    scheduler
        .enqueue(
            key,
            BlockWrite::analog_channel(1, 20.0, 1),
            sink.clone(),
            Some(json!({"request": "second"})),
        )
        .unwrap();
    scheduler
        .enqueue(key, BlockWrite::analog_channel(2, 30.0, 1), sink.clone(), None)
        .unwrap();
    settle().await;

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.node, 1);
    assert_eq!(report.block, 3);
    assert_eq!(report.kind, DataKind::Analog);
    assert_eq!(report.revision, 1);
    assert_eq!(report.passthrough, Some(json!({"request": "second"})));
    // Hex descriptor matches the sent datagram
    assert_eq!(report.hex, hex::encode_upper(&sink.sent()[0]));
}

#[tokio::test(start_paused = true)]
async fn test_observer_failure_does_not_block_send() {
    let scheduler = BlockScheduler::with_observer(
        SchedulerConfig {
            revision: ProtocolRevision::V1,
            debounce: Duration::from_millis(50),
        },
        Box::new(|_report| Err(CoeError::Observer("observer down".into()))),
    );
    let sink = Arc::new(RecordingSink::default());

    scheduler
        .enqueue(
            CacheKey::new(1, 1, DataKind::Analog),
            BlockWrite::analog_channel(0, 5.0, 0),
            sink.clone(),
            None,
        )
        .unwrap();
    settle().await;

    assert_eq!(sink.sent().len(), 1, "send must survive observer failure");
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_keeps_cache_intact() {
    let scheduler = scheduler_v1();
    let key = CacheKey::new(1, 1, DataKind::Analog);

    scheduler
        .enqueue(
            key,
            BlockWrite::analog_channel(0, 7.5, 1),
            Arc::new(FailingSink),
            None,
        )
        .unwrap();
    settle().await;

    // Merge and cache update completed before the send attempt
    assert_eq!(
        scheduler.cached(&key),
        BlockData::Analog {
            values: [7.5, 0.0, 0.0, 0.0],
            units: [1, 0, 0, 0],
        }
    );
    assert_eq!(scheduler.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_drops_pending_write() {
    let scheduler = scheduler_v1();
    let sink = Arc::new(RecordingSink::default());
    let key = CacheKey::new(1, 1, DataKind::Analog);

    scheduler
        .enqueue(key, BlockWrite::analog_channel(0, 1.0, 0), sink.clone(), None)
        .unwrap();
    assert!(scheduler.cancel(&key));
    assert!(!scheduler.cancel(&key));

    settle().await;
    assert!(sink.sent().is_empty());
    // The dropped write never reached the store
    assert_eq!(scheduler.cached(&key), BlockData::zeroed(DataKind::Analog));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drops_all_pending() {
    let scheduler = scheduler_v1();
    let sink = Arc::new(RecordingSink::default());

    for block in 1..=4 {
        scheduler
            .enqueue(
                CacheKey::new(1, block, DataKind::Analog),
                BlockWrite::analog_channel(0, f64::from(block), 0),
                sink.clone(),
                None,
            )
            .unwrap();
    }
    assert_eq!(scheduler.pending_count(), 4);
    scheduler.shutdown();
    assert_eq!(scheduler.pending_count(), 0);

    settle().await;
    assert!(sink.sent().is_empty());
}

#[tokio::test]
async fn test_enqueue_validates_key() {
    let scheduler = scheduler_v1();
    let sink = Arc::new(RecordingSink::default());

    // Analog write to a digital key
    let result = scheduler.enqueue(
        CacheKey::new(1, 0, DataKind::Digital),
        BlockWrite::analog_channel(0, 1.0, 0),
        sink.clone(),
        None,
    );
    assert!(matches!(result, Err(CoeError::KindMismatch { .. })));

    // Analog key with a digital block id
    let result = scheduler.enqueue(
        CacheKey::new(1, 9, DataKind::Analog),
        BlockWrite::analog_channel(0, 1.0, 0),
        sink.clone(),
        None,
    );
    assert!(matches!(result, Err(CoeError::InvalidBlockNumber(9))));

    // Digital key with an analog block id
    let result = scheduler.enqueue(
        CacheKey::new(1, 3, DataKind::Digital),
        BlockWrite::digital_channel(0, true),
        sink,
        None,
    );
    assert!(matches!(result, Err(CoeError::InvalidBlockNumber(3))));
}
