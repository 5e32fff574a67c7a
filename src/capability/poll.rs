use std::future::Future;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use crate::error::{FlowError, Result};

/// 轮询远端状态的退避策略
#[derive(Clone, Debug)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2,
            max_attempts: 30,
        }
    }
}

impl PollPolicy {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// 第 `attempt` 次失败后的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// 单次探测的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollStatus<T> {
    Pending,
    Ready(T),
}

/// 把“探测-等待-重试”包装成只产出一个元素的流，次数用尽时产出超时错误
pub fn poll_until_ready<T, F, Fut>(
    name: impl Into<String>,
    policy: PollPolicy,
    mut poll_once: F,
) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: FnMut(u32) -> Fut + Send + 'static,
    Fut: Future<Output = Result<PollStatus<T>>> + Send + 'static,
{
    let name = name.into();
    stream::once(async move {
        let mut waited = Duration::ZERO;
        for attempt in 0..policy.max_attempts.max(1) {
            match poll_once(attempt).await? {
                PollStatus::Ready(value) => return Ok(value),
                PollStatus::Pending => {
                    let delay = policy.delay_for(attempt);
                    debug!(poll = %name, attempt, ?delay, "still pending, backing off");
                    tokio::time::sleep(delay).await;
                    waited += delay;
                }
            }
        }
        Err(FlowError::Timeout {
            node: name,
            millis: waited.as_millis() as u64,
        })
    })
    .boxed()
}
