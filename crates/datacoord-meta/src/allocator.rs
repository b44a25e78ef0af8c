use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use datacoord_core::tso::{compose_ts, LOGICAL_MASK};
use datacoord_core::{Allocator, CoreResult, Timestamp, UniqueId};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Clock {
    physical_ms: i64,
    logical: u64,
}

/// Single-process timestamp oracle and id generator.
///
/// Timestamps never go backwards: when the wall clock stalls or regresses,
/// the logical counter advances instead, spilling into the next millisecond
/// once exhausted.
#[derive(Debug)]
pub struct LocalAllocator {
    clock: Mutex<Clock>,
    next_id: AtomicI64,
}

impl LocalAllocator {
    pub fn new() -> Self {
        Self::with_start_id(1)
    }

    /// Starts id issuance at `start`.
    pub fn with_start_id(start: UniqueId) -> Self {
        Self {
            clock: Mutex::new(Clock::default()),
            next_id: AtomicI64::new(start),
        }
    }

    fn next_timestamp(&self) -> Timestamp {
        let now_ms = Utc::now().timestamp_millis();
        let mut clock = self.clock.lock();
        if now_ms > clock.physical_ms {
            clock.physical_ms = now_ms;
            clock.logical = 0;
        } else if clock.logical >= LOGICAL_MASK {
            clock.physical_ms += 1;
            clock.logical = 0;
        } else {
            clock.logical += 1;
        }
        compose_ts(clock.physical_ms, clock.logical)
    }
}

impl Default for LocalAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Allocator for LocalAllocator {
    async fn alloc_timestamp(&self) -> CoreResult<Timestamp> {
        Ok(self.next_timestamp())
    }

    async fn alloc_id(&self) -> CoreResult<UniqueId> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}
