//! LLM 对弈走法引擎
//!
//! 包含:
//! - 固定窗口限流（按客户端与模型）
//! - 模型服务适配（请求构造与响应归一化）
//! - 从自由文本中提取走法
//! - 带纠错重试与随机兜底的回合编排

pub mod config;
mod error;
pub mod llm;
mod rate_limit;

pub use config::{FailurePolicy, GenerationParams, OrchestratorConfig, RateLimitProfile, RateLimits};
pub use error::{ProviderError, TurnError};
pub use llm::{
    CompletionBackend, FallbackReason, HttpBackend, MoveExtractor, PromptTemplate, ProviderConfig,
    ProviderKind, ScriptedBackend, TurnOrchestrator, TurnOutcome,
};
pub use rate_limit::{Admission, Budget, RateLimitKey, RateLimiter};
