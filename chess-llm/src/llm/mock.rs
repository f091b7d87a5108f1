//! 脚本化补全后端（用于测试与离线演示，无需 API）
//!
//! 按顺序弹出预置回复；脚本耗尽后返回空响应错误。每次调用都会记录收到的提示。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::config::GenerationParams;
use crate::error::ProviderError;
use crate::llm::client::{CompletionBackend, ProviderConfig};

/// 一次调用收到的提示
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPrompt {
    pub model: String,
    pub system: String,
    pub user: String,
}

/// 脚本化后端
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<RecordedPrompt>>,
}

impl ScriptedBackend {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String, ProviderError>>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 全部为成功回复的脚本
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| Ok(t.into())))
    }

    /// 已收到的调用次数
    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// 已收到的提示
    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(
        &self,
        config: &ProviderConfig,
        system: &str,
        user: &str,
        _params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(RecordedPrompt {
                model: config.model.clone(),
                system: system.to_string(),
                user: user.to_string(),
            });
        }

        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        next.unwrap_or_else(|| {
            Err(ProviderError::EmptyResponse {
                finish_reason: Some("script exhausted".to_string()),
                observed_keys: Vec::new(),
                hint: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_and_records_prompts() {
        let backend = ScriptedBackend::with_texts(["first", "second"]);
        let config = ProviderConfig::new("mock-model", None, Some("k".to_string()));
        let params = GenerationParams::default();

        assert_eq!(backend.complete(&config, "s", "u1", &params).await.unwrap(), "first");
        assert_eq!(backend.complete(&config, "s", "u2", &params).await.unwrap(), "second");
        assert!(backend.complete(&config, "s", "u3", &params).await.is_err());

        assert_eq!(backend.call_count(), 3);
        let prompts = backend.prompts();
        assert_eq!(prompts[1].user, "u2");
        assert_eq!(prompts[0].model, "mock-model");
    }
}
