use std::time::Duration;

/// 重试退避策略
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    Fixed(Duration),
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
    Linear {
        initial: Duration,
        increment: Duration,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// 第 `attempt` 次重试前的等待时间（从 0 开始）
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = initial.as_secs_f64() * multiplier.powf(attempt as f64);
                if !delay.is_finite() || delay >= max_delay.as_secs_f64() {
                    return *max_delay;
                }
                Duration::from_secs_f64(delay)
            }
            RetryStrategy::Linear { initial, increment, max_delay } => {
                let delay = initial.saturating_add(increment.saturating_mul(attempt));
                std::cmp::min(delay, *max_delay)
            }
        }
    }
}

/// 分片重试策略：失败的分片最多发送几次，超出后任务标记为失败
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 每个分片的总尝试次数，包含首次发送
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    /// 固定间隔策略，测试和本地服务器用
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Fixed(delay),
        }
    }

    /// 连续失败 `failures` 次后的等待时间，次数用完时返回 `None`
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        if failures >= self.max_attempts.max(1) {
            return None;
        }

        Some(self.strategy.get_delay(failures.saturating_sub(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delay() {
        let strategy = RetryStrategy::Exponential {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        };

        assert_eq!(strategy.get_delay(0), Duration::from_secs(1));
        assert_eq!(strategy.get_delay(1), Duration::from_secs(2));
        assert_eq!(strategy.get_delay(2), Duration::from_secs(4));
        assert_eq!(strategy.get_delay(5), Duration::from_secs(10));
        assert_eq!(strategy.get_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_linear_delay() {
        let strategy = RetryStrategy::Linear {
            initial: Duration::from_millis(100),
            increment: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
        };

        assert_eq!(strategy.get_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.get_delay(1), Duration::from_millis(150));
        assert_eq!(strategy.get_delay(4), Duration::from_millis(200));
    }

    #[test]
    fn test_policy_exhaustion() {
        let policy = RetryPolicy {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential {
                initial: Duration::from_millis(10),
                multiplier: 2.0,
                max_delay: Duration::from_secs(1),
            },
        };

        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(20)));
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::fixed(1, Duration::from_millis(5));
        assert_eq!(policy.next_delay(1), None);

        let policy = RetryPolicy::fixed(0, Duration::from_millis(5));
        assert_eq!(policy.next_delay(1), None);
    }
}
