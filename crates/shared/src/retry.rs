//! 指数退避重试
//!
//! 订单源分页拉取、返现发放、等级写入的并发冲突都走这里。
//! 哪些错误值得重试由调用方的 `is_retryable` 决定，业务错误应直接返回。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// 退避策略
///
/// 第 n 次重试前等待 `initial_delay * multiplier^n`，封顶 `max_delay`。
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 不含首次调用
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 只调用一次
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let delay = self.initial_delay.mul_f64(factor.min(u32::MAX as f64));
        delay.min(self.max_delay)
    }

    /// `failed` 为已失败次数
    pub fn should_retry(&self, failed: u32) -> bool {
        failed < self.max_retries
    }

    /// 全部重试的等待序列
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }
}

/// 按策略执行异步操作
///
/// 不可重试的错误与重试耗尽后的最后一个错误原样返回。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delays = policy.delays();
    let mut failed: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if failed > 0 {
                    debug!(operation = operation_name, failed, "重试后成功");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            return Err(err);
        }

        let Some(delay) = delays.next() else {
            warn!(operation = operation_name, failed = failed + 1, error = %err, "重试次数耗尽");
            return Err(err);
        };

        failed += 1;
        warn!(
            operation = operation_name,
            failed,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "调用失败，退避后重试"
        );
        tokio::time::sleep(delay).await;
    }
}
