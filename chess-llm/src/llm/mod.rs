//! LLM 集成模块
//!
//! 通过远程文本生成服务（OpenAI 兼容接口或 Gemini）获取走法。

mod client;
mod engine;
mod mock;
mod parser;
mod prompt;
mod provider;

pub use client::{CompletionBackend, HttpBackend, ProviderConfig};
pub use engine::{Candidate, FallbackReason, LegalMoves, TurnOrchestrator, TurnOutcome, TurnState};
pub use mock::{RecordedPrompt, ScriptedBackend};
pub use parser::MoveExtractor;
pub use prompt::PromptTemplate;
pub use provider::{http_error, parse_model_list, ProviderKind, DEFAULT_BASE_URL};
