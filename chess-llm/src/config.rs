//! 配置：限流档位、生成参数与回合编排设置
//!
//! 环境变量：
//! - `CHESS_RATE_LIMIT_PROFILE`：`smooth`（默认）或 `cost-controlled`
//! - `CHESS_RATE_LIMIT_RPM` / `CHESS_RATE_LIMIT_TPM`：每分钟请求数 / token 数覆盖值
//! - `CHESS_FAILURE_POLICY`：`degrade`（默认）或 `strict`

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// 限流窗口长度（秒）
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// 每回合最大尝试次数
pub const MAX_ATTEMPTS: u32 = 5;

pub const ENV_RATE_LIMIT_PROFILE: &str = "CHESS_RATE_LIMIT_PROFILE";
pub const ENV_RATE_LIMIT_RPM: &str = "CHESS_RATE_LIMIT_RPM";
pub const ENV_RATE_LIMIT_TPM: &str = "CHESS_RATE_LIMIT_TPM";
pub const ENV_FAILURE_POLICY: &str = "CHESS_FAILURE_POLICY";

/// 限流档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitProfile {
    /// 较高上限，对局流畅
    #[default]
    Smooth,
    /// 较低上限，控制费用
    CostControlled,
}

impl RateLimitProfile {
    /// 解析档位名，未知值回退到 Smooth
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "cost" | "cost-controlled" | "cost_controlled" | "costcontrolled" => Self::CostControlled,
            "smooth" => Self::Smooth,
            other => {
                if !other.is_empty() {
                    warn!("Unknown rate limit profile '{}', using smooth", other);
                }
                Self::Smooth
            }
        }
    }

    /// 档位默认每分钟请求数
    pub fn requests_per_minute(&self) -> u32 {
        match self {
            Self::Smooth => 30,
            Self::CostControlled => 8,
        }
    }

    /// 档位默认每分钟 token 数
    pub fn tokens_per_minute(&self) -> u64 {
        match self {
            Self::Smooth => 60_000,
            Self::CostControlled => 12_000,
        }
    }
}

/// 限流上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub max_requests: u32,
    pub max_tokens: u64,
    pub window: Duration,
}

impl RateLimits {
    /// 由档位生成
    pub fn from_profile(profile: RateLimitProfile) -> Self {
        Self {
            max_requests: profile.requests_per_minute(),
            max_tokens: profile.tokens_per_minute(),
            window: Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
        }
    }

    /// 档位 + 文本覆盖值，非法或非有限值回退到档位默认值，结果至少为 1
    pub fn resolve(profile: RateLimitProfile, rpm: Option<&str>, tpm: Option<&str>) -> Self {
        let base = Self::from_profile(profile);
        Self {
            max_requests: parse_limit(rpm, base.max_requests as u64) as u32,
            max_tokens: parse_limit(tpm, base.max_tokens),
            window: base.window,
        }
    }

    /// 从环境变量读取
    pub fn from_env() -> Self {
        let profile = std::env::var(ENV_RATE_LIMIT_PROFILE)
            .map(|v| RateLimitProfile::parse(&v))
            .unwrap_or_default();
        let rpm = std::env::var(ENV_RATE_LIMIT_RPM).ok();
        let tpm = std::env::var(ENV_RATE_LIMIT_TPM).ok();
        Self::resolve(profile, rpm.as_deref(), tpm.as_deref())
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::from_profile(RateLimitProfile::Smooth)
    }
}

/// 解析覆盖值：取整并至少为 1
fn parse_limit(value: Option<&str>, default: u64) -> u64 {
    let parsed = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite());

    match parsed {
        Some(v) => (v.floor().max(1.0)).min(u32::MAX as f64) as u64,
        None => {
            if let Some(raw) = value {
                if !raw.trim().is_empty() {
                    warn!("Invalid rate limit override '{}', using {}", raw, default);
                }
            }
            default.max(1)
        }
    }
}

/// 回合失败策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// 模型/配置错误直接返回给调用方
    Strict,
    /// 任何失败都退化为随机合法走法，对局不中断
    #[default]
    AlwaysDegrade,
}

impl FailurePolicy {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" | "surface" => Self::Strict,
            _ => Self::AlwaysDegrade,
        }
    }

    pub fn from_env() -> Self {
        std::env::var(ENV_FAILURE_POLICY)
            .map(|v| Self::parse(&v))
            .unwrap_or_default()
    }
}

/// 生成参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// 生成温度
    pub temperature: f32,
    /// 最大输出 token 数，同时作为准入估算的补全预留
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 512,
        }
    }
}

/// 回合编排配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub max_attempts: u32,
    pub policy: FailurePolicy,
    /// 限流键中的客户端标识
    pub client_id: String,
    pub generation: GenerationParams,
    pub rate_limits: RateLimits,
    /// HTTP 请求超时（秒）
    pub timeout_secs: u64,
    /// 提示中保留的历史条数
    pub history_limit: usize,
}

impl OrchestratorConfig {
    /// 从环境变量读取限流与策略，其余取默认值
    pub fn from_env() -> Self {
        Self {
            policy: FailurePolicy::from_env(),
            rate_limits: RateLimits::from_env(),
            ..Self::default()
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            policy: FailurePolicy::default(),
            client_id: "local".to_string(),
            generation: GenerationParams::default(),
            rate_limits: RateLimits::default(),
            timeout_secs: 60,
            history_limit: protocol::HISTORY_LIMIT,
        }
    }
}
