use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::error;

use crate::error::{FlowError, Result};

/// 2024-01-01T00:00:00Z
pub const ID_EPOCH_MILLIS: u64 = 1_704_067_200_000;
pub const MAX_WORKER_ID: u16 = (1 << WORKER_BITS) - 1;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// 毫秒时钟
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct IdState {
    last_millis: u64,
    sequence: u64,
}

/// 雪花算法 id：41 位时间戳、10 位 worker、12 位序列号
pub struct IdGenerator {
    worker_id: u16,
    clock: Arc<dyn Clock>,
    state: Mutex<IdState>,
}

impl IdGenerator {
    pub fn new(worker_id: u16) -> Result<Self> {
        Self::with_clock(worker_id, Arc::new(SystemClock))
    }

    pub fn with_clock(worker_id: u16, clock: Arc<dyn Clock>) -> Result<Self> {
        if worker_id > MAX_WORKER_ID {
            return Err(FlowError::Config(format!(
                "worker id {} exceeds {}",
                worker_id, MAX_WORKER_ID
            )));
        }
        Ok(Self {
            worker_id,
            clock,
            state: Mutex::new(IdState::default()),
        })
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// 时钟回拨时拒绝发号
    pub fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock();
        let mut now = self.clock.now_millis();

        if now < state.last_millis {
            error!(last = state.last_millis, now, "clock moved backwards, refusing to issue id");
            return Err(FlowError::ClockMovedBackwards {
                last: state.last_millis,
                now,
            });
        }

        if now == state.last_millis {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // 本毫秒序列号用尽，等到下一毫秒
                while now <= state.last_millis {
                    std::hint::spin_loop();
                    now = self.clock.now_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = now;

        let timestamp = now.saturating_sub(ID_EPOCH_MILLIS);
        Ok((timestamp << (WORKER_BITS + SEQUENCE_BITS))
            | ((self.worker_id as u64) << SEQUENCE_BITS)
            | state.sequence)
    }

    pub fn next_run_id(&self) -> Result<String> {
        Ok(format!("run-{}", self.next_id()?))
    }

    /// 拆分 id 为 (时间戳, worker, 序列号)
    pub fn decompose(id: u64) -> (u64, u16, u64) {
        let timestamp = (id >> (WORKER_BITS + SEQUENCE_BITS)) + ID_EPOCH_MILLIS;
        let worker = ((id >> SEQUENCE_BITS) & MAX_WORKER_ID as u64) as u16;
        (timestamp, worker, id & SEQUENCE_MASK)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            worker_id: 0,
            clock: Arc::new(SystemClock),
            state: Mutex::new(IdState::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ManualClock(AtomicU64);

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn ids_increase_within_one_millisecond() {
        let clock = Arc::new(ManualClock(AtomicU64::new(ID_EPOCH_MILLIS + 10)));
        let ids = IdGenerator::with_clock(3, clock).unwrap();
        let first = ids.next_id().unwrap();
        let second = ids.next_id().unwrap();
        assert!(second > first);
        assert_eq!(IdGenerator::decompose(second), (ID_EPOCH_MILLIS + 10, 3, 1));
    }

    #[test]
    fn backward_clock_aborts_issuance() {
        let clock = Arc::new(ManualClock(AtomicU64::new(ID_EPOCH_MILLIS + 100)));
        let ids = IdGenerator::with_clock(1, Arc::clone(&clock) as Arc<dyn Clock>).unwrap();
        ids.next_id().unwrap();

        clock.0.store(ID_EPOCH_MILLIS + 40, Ordering::SeqCst);
        let err = ids.next_id().unwrap_err();
        assert!(matches!(
            err,
            FlowError::ClockMovedBackwards { last, now } if last == ID_EPOCH_MILLIS + 100 && now == ID_EPOCH_MILLIS + 40
        ));

        clock.0.store(ID_EPOCH_MILLIS + 101, Ordering::SeqCst);
        assert!(ids.next_id().is_ok());
    }

    #[test]
    fn rejects_wide_worker_ids() {
        assert!(IdGenerator::new(MAX_WORKER_ID + 1).is_err());
    }
}
