//! 错误类型定义

use protocol::ErrorPayload;
use thiserror::Error;

/// 模型服务调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// 缺少 API Key
    #[error("No API key configured for {base_url}")]
    AuthMissing { base_url: String },

    /// 非成功 HTTP 状态
    #[error("Provider returned HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        is_rate_limit: bool,
    },

    /// 响应中没有可用文本
    #[error(
        "Provider returned no usable text (finish reason: {}, keys: [{}]){}",
        .finish_reason.as_deref().unwrap_or("unknown"),
        .observed_keys.join(", "),
        hint_suffix(.hint)
    )]
    EmptyResponse {
        finish_reason: Option<String>,
        observed_keys: Vec<String>,
        hint: Option<String>,
    },

    /// 网络层错误（连接失败、超时等）
    #[error("Request to provider failed: {0}")]
    Transport(String),

    /// 响应体不是合法 JSON
    #[error("Failed to decode provider response: {0}")]
    Decode(String),
}

fn hint_suffix(hint: &Option<String>) -> String {
    hint.as_ref().map(|h| format!(". {}", h)).unwrap_or_default()
}

impl ProviderError {
    /// HTTP 状态码（如果有）
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 是否为限流类错误
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::Http { is_rate_limit: true, .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// 回合级错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TurnError {
    /// 请求缺失或格式错误，不重试
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 缺少凭据（严格策略下）
    #[error("Missing API key: set an API key for {base_url} before starting the match")]
    AuthMissing { base_url: String },

    /// 模型服务错误（严格策略下）
    #[error("{0}")]
    Provider(#[from] ProviderError),
}

impl TurnError {
    /// 转换为对外错误载荷
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            TurnError::Provider(err) => ErrorPayload {
                error: self.to_string(),
                status_code: err.status_code(),
                is_rate_limit: err.is_rate_limit().then_some(true),
            },
            TurnError::InvalidRequest(_) => ErrorPayload {
                status_code: Some(400),
                ..ErrorPayload::new(self.to_string())
            },
            TurnError::AuthMissing { .. } => ErrorPayload {
                status_code: Some(401),
                ..ErrorPayload::new(self.to_string())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_response_message_includes_hint() {
        let err = ProviderError::EmptyResponse {
            finish_reason: Some("MAX_TOKENS".to_string()),
            observed_keys: vec!["candidates".to_string(), "usageMetadata".to_string()],
            hint: Some("Raise max tokens".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("MAX_TOKENS"));
        assert!(msg.contains("candidates, usageMetadata"));
        assert!(msg.ends_with(". Raise max tokens"));
    }

    #[test]
    fn test_turn_error_payload() {
        let err = TurnError::Provider(ProviderError::Http {
            status: 429,
            message: "slow down".to_string(),
            is_rate_limit: true,
        });
        let payload = err.to_payload();
        assert_eq!(payload.status_code, Some(429));
        assert_eq!(payload.is_rate_limit, Some(true));
        assert!(payload.error.contains("slow down"));

        let payload = TurnError::InvalidRequest("missing legal moves".to_string()).to_payload();
        assert_eq!(payload.status_code, Some(400));
        assert_eq!(payload.is_rate_limit, None);
    }
}
