//! 模型服务 HTTP 客户端
//!
//! 按 base URL 识别服务类型后发送补全请求，把各家响应统一为纯文本。

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use protocol::{ModelInfo, TurnRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::GenerationParams;
use crate::error::ProviderError;
use crate::llm::provider::{self, ProviderKind, DEFAULT_BASE_URL};

/// 健康检查超时（秒）
const HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

/// 日志中响应预览长度
const PREVIEW_LEN: usize = 500;

/// 单个模型服务的连接配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// 模型标识，如 "gpt-4o-mini", "gemini-2.5-flash"
    pub model: String,
    /// 服务地址，默认 https://api.openai.com/v1
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ProviderConfig {
    /// 空白字符串视为未设置
    pub fn new(model: impl Into<String>, base_url: Option<String>, api_key: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let api_key = api_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty());

        Self {
            model: model.into().trim().to_string(),
            base_url,
            api_key,
        }
    }

    /// 从走法请求中取出连接配置
    pub fn from_request(request: &TurnRequest) -> Self {
        Self::new(
            request.model.clone(),
            request.base_url.clone(),
            request.api_key.clone(),
        )
    }

    /// 未显式给出 Key 时，按服务类型读取 `GEMINI_API_KEY` / `OPENAI_API_KEY`
    pub fn with_env_key(mut self) -> Self {
        if self.api_key.is_none() {
            let var = match self.kind() {
                ProviderKind::Generation => "GEMINI_API_KEY",
                ProviderKind::ChatCompletions { .. } => "OPENAI_API_KEY",
            };
            self.api_key = std::env::var(var)
                .ok()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty());
        }
        self
    }

    pub fn kind(&self) -> ProviderKind {
        ProviderKind::detect(&self.base_url)
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }
}

/// 补全后端抽象
///
/// 编排器只依赖这个 trait，测试中用脚本化后端替换 HTTP 实现。
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// 发送一次补全请求，返回助手文本
    async fn complete(
        &self,
        config: &ProviderConfig,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError>;
}

/// 基于 reqwest 的 HTTP 后端
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    /// 创建带超时的客户端
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// 检查服务是否可达
    /// 使用独立的短超时客户端，返回 Err 时包含具体原因
    pub async fn health_check(&self, config: &ProviderConfig) -> Result<()> {
        let kind = config.kind();
        let url = kind.models_url(&config.base_url);

        let health_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS))
            .build()
            .context("Failed to create health check client")?;

        let mut request = health_client.get(&url);
        if let Some(key) = &config.api_key {
            let (name, value) = kind.auth_header(key);
            request = request.header(name, value);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("Cannot reach provider at {}", config.base_url))?;

        if resp.status().is_success() {
            info!("Provider health check passed: {}", config.base_url);
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "Provider returned status {} ({})",
                resp.status(),
                config.base_url
            ))
        }
    }

    /// 列出可用模型
    pub async fn list_models(&self, config: &ProviderConfig) -> Result<Vec<ModelInfo>, ProviderError> {
        let kind = config.kind();
        let url = kind.models_url(&config.base_url);

        let mut request = self.client.get(&url);
        if let Some(key) = &config.api_key {
            let (name, value) = kind.auth_header(key);
            request = request.header(name, value);
        }

        let body = Self::read_json(request, &config.model).await?;
        let models = provider::parse_model_list(&body);
        debug!("Listed {} models from {}", models.len(), config.base_url);
        Ok(models)
    }

    /// 发送请求并读取 JSON 响应体，非成功状态转为 `ProviderError::Http`
    async fn read_json(request: reqwest::RequestBuilder, model: &str) -> Result<Value, ProviderError> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let err = provider::http_error(status.as_u16(), &text, model);
            warn!("Provider request failed: {}", err);
            return Err(err);
        }

        // 安全截取（避免切到多字节字符中间）
        let preview: String = text.chars().take(PREVIEW_LEN).collect();
        debug!("Raw provider response: {}", preview);

        serde_json::from_str(&text).map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(
        &self,
        config: &ProviderConfig,
        system: &str,
        user: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let api_key = config.api_key.as_deref().ok_or_else(|| ProviderError::AuthMissing {
            base_url: config.base_url.clone(),
        })?;

        let kind = config.kind();
        let url = kind.completion_url(&config.base_url, &config.model);
        let body = kind.build_body(&config.model, system, user, params);
        let (header, value) = kind.auth_header(api_key);

        debug!(
            "Sending completion request: model={}, kind={:?}, prompt_len={}",
            config.model,
            kind,
            system.len() + user.len()
        );

        let request = self.client.post(&url).header(header, value).json(&body);
        let response = Self::read_json(request, &config.model).await?;

        if let Some(reason) = kind.finish_reason(&response) {
            debug!("Completion finished: reason={}", reason);
        }

        kind.extract_text(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 本地单次应答的 HTTP 服务，返回其 base URL
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // 读完请求头与请求体再应答
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/v1", addr)
    }

    fn local_config(base_url: String) -> ProviderConfig {
        ProviderConfig::new("gpt-4o-mini", Some(base_url), Some("sk-test".to_string()))
    }

    #[test]
    fn test_provider_config_defaults() {
        let config = ProviderConfig::new(" gpt-4o-mini ", None, Some("  ".to_string()));
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api_key, None);
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_provider_config_from_request() {
        let json = r#"{
            "turn": "white",
            "board": [[null,null,null,null,null,null,null,null],
                      [null,null,null,null,null,null,null,null],
                      [null,null,null,null,null,null,null,null],
                      [null,null,null,null,null,null,null,null],
                      [null,null,null,null,null,null,null,null],
                      [null,null,null,null,null,null,null,null],
                      [null,null,null,null,null,null,null,null],
                      [null,null,null,null,null,null,null,null]],
            "model": "gemini-2.5-flash",
            "baseUrl": "https://generativelanguage.googleapis.com/v1beta",
            "apiKey": "g-123"
        }"#;
        let request = TurnRequest::from_json(json).unwrap();
        let config = ProviderConfig::from_request(&request);
        assert_eq!(config.kind(), ProviderKind::Generation);
        assert_eq!(config.api_key.as_deref(), Some("g-123"));
    }

    #[tokio::test]
    async fn test_complete_without_key_is_auth_missing() {
        let backend = HttpBackend::new(5).unwrap();
        let config = ProviderConfig::new("gpt-4o-mini", Some("http://127.0.0.1:9".to_string()), None);
        let err = backend
            .complete(&config, "sys", "usr", &GenerationParams::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::AuthMissing {
                base_url: "http://127.0.0.1:9".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_complete_reads_chat_reply() {
        let base_url = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"content":"{\"from\":[6,4],\"to\":[4,4]}"},"finish_reason":"stop"}]}"#,
        )
        .await;
        let backend = HttpBackend::new(5).unwrap();
        let text = backend
            .complete(&local_config(base_url), "sys", "usr", &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(text, r#"{"from":[6,4],"to":[4,4]}"#);
    }

    #[tokio::test]
    async fn test_error_status_becomes_http_error() {
        let base_url = serve_once(
            "429 Too Many Requests",
            r#"{"error":{"message":"Rate limit reached for gpt-4o-mini"}}"#,
        )
        .await;
        let backend = HttpBackend::new(5).unwrap();
        let err = backend
            .complete(&local_config(base_url), "sys", "usr", &GenerationParams::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::Http {
                status: 429,
                message: "Rate limit reached for gpt-4o-mini".to_string(),
                is_rate_limit: true,
            }
        );
    }

    #[tokio::test]
    async fn test_non_json_body_is_decode_error() {
        let base_url = serve_once("200 OK", "<html>gateway</html>").await;
        let backend = HttpBackend::new(5).unwrap();
        let err = backend.list_models(&local_config(base_url)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[tokio::test]
    async fn test_list_models_over_http() {
        let base_url = serve_once(
            "200 OK",
            r#"{"data":[{"id":"gpt-4o-mini","owned_by":"openai"}]}"#,
        )
        .await;
        let backend = HttpBackend::new(5).unwrap();
        let models = backend.list_models(&local_config(base_url)).await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "gpt-4o-mini");
    }
}
