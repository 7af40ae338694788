//! 有界指数退避

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// 实例创建轮询：从 `poll_interval` 开始，最多 8 倍
    pub fn polling(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: poll_interval,
            multiplier: 2,
            max_delay: poll_interval * 8,
        }
    }

    /// 重载命令：总等待 300ms
    pub fn reload() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2,
            max_delay: Duration::from_millis(400),
        }
    }

    /// `max_attempts` 次尝试之间的等待总和
    pub fn total_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay(attempt))
            .sum()
    }

    /// 第 `attempt` 次重试前的等待(从0开始)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = RetryPolicy::polling(Duration::from_secs(3), 10);
        assert_eq!(policy.delay(0), Duration::from_secs(3));
        assert_eq!(policy.delay(1), Duration::from_secs(6));
        assert_eq!(policy.delay(3), Duration::from_secs(24));
        assert_eq!(policy.delay(9), Duration::from_secs(24));
    }

    #[test]
    fn test_reload_wait_stays_below_survey_interval() {
        let policy = RetryPolicy::reload();
        assert_eq!(policy.total_delay(), Duration::from_millis(300));
        assert!(policy.total_delay() < Duration::from_secs(1));
        assert_eq!(RetryPolicy::polling(Duration::from_secs(1), 1).total_delay(), Duration::ZERO);
    }
}
