//! 步骤重试策略：有上限的指数退避，无抖动
//!
//! 第 n 次失败后的等待 = base · 2^(n-1)，封顶 cap；总尝试次数不超过 max_attempts。

use std::time::Duration;

/// 默认最大尝试次数（含首次）
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_MS: u64 = 200;
const DEFAULT_CAP_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base: Duration::from_millis(DEFAULT_BASE_MS),
            cap: Duration::from_millis(DEFAULT_CAP_MS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            cap,
        }
    }

    /// 第 attempt 次（从 1 开始）失败后、下一次尝试前的等待时长
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// 该步骤允许的尝试次数：不可重试的步骤只有一次
    pub fn attempts_for(&self, retryable: bool) -> u32 {
        if retryable {
            self.max_attempts.max(1)
        } else {
            1
        }
    }
}
