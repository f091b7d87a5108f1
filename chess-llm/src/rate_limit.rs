//! 固定窗口限流
//!
//! 按 (客户端标识, 模型) 统计窗口内的请求数与 token 数。
//! 这是建议性的准入控制：被拒绝时回合直接走随机兜底，不会阻塞等待。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::RateLimits;

/// 限流键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub client_id: String,
    pub model: String,
}

impl RateLimitKey {
    pub fn new(client_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            model: model.into(),
        }
    }
}

/// 超出的预算类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Requests,
    Tokens,
}

impl Budget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Budget::Requests => "requests",
            Budget::Tokens => "tokens",
        }
    }
}

/// 准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after: Duration, budget: Budget },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// 单个键的窗口计数
#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_start: Instant,
    requests: u32,
    tokens: u64,
}

/// 限流器
///
/// 每次准入在同一把锁内完成“窗口重置 + 计数”，不同键互不影响。
/// 条目在进程生命周期内不回收。
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<RateLimitKey, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级共享实例
    pub fn global() -> Arc<RateLimiter> {
        static GLOBAL: OnceLock<Arc<RateLimiter>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(RateLimiter::new())).clone()
    }

    /// 以当前时间进行准入检查
    pub fn admit(&self, key: &RateLimitKey, estimated_tokens: u64, limits: &RateLimits) -> Admission {
        self.admit_at(key, estimated_tokens, limits, Instant::now())
    }

    /// 以指定时间进行准入检查
    pub fn admit_at(
        &self,
        key: &RateLimitKey,
        estimated_tokens: u64,
        limits: &RateLimits,
        now: Instant,
    ) -> Admission {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        let bucket = buckets.entry(key.clone()).or_insert(Bucket {
            window_start: now,
            requests: 0,
            tokens: 0,
        });

        let elapsed = now.saturating_duration_since(bucket.window_start);
        if elapsed >= limits.window {
            *bucket = Bucket {
                window_start: now,
                requests: 0,
                tokens: 0,
            };
        }

        let retry_after = limits
            .window
            .saturating_sub(now.saturating_duration_since(bucket.window_start));

        let requests = bucket.requests.saturating_add(1);
        if requests > limits.max_requests.max(1) {
            debug!(
                "Rate limit denied for {}/{}: requests {}/{}",
                key.client_id, key.model, requests, limits.max_requests
            );
            return Admission::Denied {
                retry_after,
                budget: Budget::Requests,
            };
        }

        // 请求计数先提交，token 超限时也保留
        bucket.requests = requests;

        let tokens = bucket.tokens.saturating_add(estimated_tokens.max(1));
        if tokens > limits.max_tokens.max(1) {
            debug!(
                "Rate limit denied for {}/{}: tokens {}/{}",
                key.client_id, key.model, tokens, limits.max_tokens
            );
            return Admission::Denied {
                retry_after,
                budget: Budget::Tokens,
            };
        }

        bucket.tokens = tokens;
        Admission::Allowed
    }

    /// 查询某个键当前窗口的计数 (请求数, token 数)
    pub fn usage(&self, key: &RateLimitKey) -> Option<(u32, u64)> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.get(key).map(|b| (b.requests, b.tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_requests: u32, max_tokens: u64) -> RateLimits {
        RateLimits {
            max_requests,
            max_tokens,
            window: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_request_budget_denies_n_plus_one() {
        let limiter = RateLimiter::new();
        let key = RateLimitKey::new("client", "gpt-4o-mini");
        let limits = limits(3, 10_000);
        let start = Instant::now();

        for i in 0..3 {
            let at = start + Duration::from_secs(i);
            assert_eq!(limiter.admit_at(&key, 10, &limits, at), Admission::Allowed);
        }

        let denied = limiter.admit_at(&key, 10, &limits, start + Duration::from_secs(20));
        assert_eq!(
            denied,
            Admission::Denied {
                retry_after: Duration::from_secs(40),
                budget: Budget::Requests,
            }
        );
        // 被拒绝的请求不消耗 token
        assert_eq!(limiter.usage(&key), Some((3, 30)));
    }

    #[test]
    fn test_window_rollover_resets_counts() {
        let limiter = RateLimiter::new();
        let key = RateLimitKey::new("client", "model");
        let limits = limits(1, 10_000);
        let start = Instant::now();

        assert!(limiter.admit_at(&key, 5, &limits, start).is_allowed());
        assert!(!limiter.admit_at(&key, 5, &limits, start + Duration::from_secs(59)).is_allowed());

        let after = start + Duration::from_secs(60);
        assert!(limiter.admit_at(&key, 5, &limits, after).is_allowed());
        assert_eq!(limiter.usage(&key), Some((1, 5)));
    }

    #[test]
    fn test_token_budget_keeps_request_increment() {
        let limiter = RateLimiter::new();
        let key = RateLimitKey::new("client", "model");
        let limits = limits(10, 100);
        let start = Instant::now();

        assert!(limiter.admit_at(&key, 10, &limits, start).is_allowed());
        let denied = limiter.admit_at(&key, 150, &limits, start + Duration::from_secs(1));
        assert!(matches!(
            denied,
            Admission::Denied {
                budget: Budget::Tokens,
                ..
            }
        ));
        if let Admission::Denied { retry_after, .. } = denied {
            assert_eq!(retry_after, Duration::from_secs(59));
        }
        assert_eq!(limiter.usage(&key), Some((2, 10)));
    }

    #[test]
    fn test_zero_estimate_counts_as_one_token() {
        let limiter = RateLimiter::new();
        let key = RateLimitKey::new("client", "model");
        let start = Instant::now();

        assert!(limiter.admit_at(&key, 0, &limits(10, 10), start).is_allowed());
        assert_eq!(limiter.usage(&key), Some((1, 1)));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        let limits = limits(1, 1_000);
        let now = Instant::now();
        let a = RateLimitKey::new("client", "model-a");
        let b = RateLimitKey::new("client", "model-b");

        assert!(limiter.admit_at(&a, 1, &limits, now).is_allowed());
        assert!(!limiter.admit_at(&a, 1, &limits, now).is_allowed());
        assert!(limiter.admit_at(&b, 1, &limits, now).is_allowed());
    }

    #[test]
    fn test_concurrent_admissions_are_atomic() {
        let limiter = Arc::new(RateLimiter::new());
        let limits = limits(50, 1_000_000);
        let key = RateLimitKey::new("client", "model");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|_| limiter.admit(&key, 1, &limits).is_allowed())
                        .count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&RateLimiter::global(), &RateLimiter::global()));
    }
}
