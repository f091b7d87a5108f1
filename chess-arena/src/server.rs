//! 请求处理
//!
//! 把走法请求与模型列表请求转换为对外的 JSON 载荷：成功时返回 `TurnResponse` /
//! `ModelListResponse`，失败时返回带状态码的 `ErrorPayload`。

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chess_llm::{
    HttpBackend, OrchestratorConfig, ProviderConfig, ProviderError, TurnError, TurnOrchestrator,
};
use protocol::{ErrorPayload, ModelInfo, ModelListRequest, ModelListResponse, TurnRequest, TurnResponse};
use tracing::{debug, info, warn};

/// 模型列表来源
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    async fn list_models(&self, config: &ProviderConfig) -> Result<Vec<ModelInfo>, ProviderError>;
}

#[async_trait]
impl ModelCatalog for HttpBackend {
    async fn list_models(&self, config: &ProviderConfig) -> Result<Vec<ModelInfo>, ProviderError> {
        HttpBackend::list_models(self, config).await
    }
}

/// 回合服务
pub struct TurnService {
    orchestrator: TurnOrchestrator,
    catalog: Arc<dyn ModelCatalog>,
}

impl TurnService {
    /// 使用 HTTP 后端与进程级限流器
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(config.timeout_secs)?);
        let orchestrator = TurnOrchestrator::new(backend.clone(), config);
        Ok(Self::with_parts(orchestrator, backend))
    }

    pub fn with_parts(orchestrator: TurnOrchestrator, catalog: Arc<dyn ModelCatalog>) -> Self {
        Self {
            orchestrator,
            catalog,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        self.orchestrator.config()
    }

    /// 处理走法请求；未带 Key 时按服务类型从环境变量补全
    pub async fn handle_turn(&self, mut request: TurnRequest) -> Result<TurnResponse, ErrorPayload> {
        if request.api_key.is_none() {
            request.api_key = ProviderConfig::from_request(&request).with_env_key().api_key;
        }

        match self.orchestrator.select_move(&request).await {
            Ok(outcome) => {
                if let Some(note) = outcome.note() {
                    warn!("{} turn fell back: {}", request.turn, note);
                }
                Ok(outcome.into())
            }
            Err(err) => {
                warn!("{} turn failed: {}", request.turn, err);
                Err(err.to_payload())
            }
        }
    }

    /// 处理 JSON 文本形式的走法请求，返回 (状态码, 响应体)
    pub async fn handle_turn_json(&self, body: &str) -> (u16, String) {
        let request = match TurnRequest::from_json(body) {
            Ok(request) => request,
            Err(e) => {
                let payload = TurnError::InvalidRequest(format!("malformed turn request: {}", e)).to_payload();
                return error_body(payload);
            }
        };

        match self.handle_turn(request).await {
            Ok(response) => match serde_json::to_string(&response) {
                Ok(json) => (200, json),
                Err(e) => error_body(ErrorPayload {
                    status_code: Some(500),
                    ..ErrorPayload::new(format!("failed to encode response: {}", e))
                }),
            },
            Err(payload) => error_body(payload),
        }
    }

    /// 处理模型列表请求
    pub async fn handle_list_models(&self, request: ModelListRequest) -> Result<ModelListResponse, ErrorPayload> {
        if request.base_url.trim().is_empty() {
            return Err(TurnError::InvalidRequest("missing base URL".to_string()).to_payload());
        }

        let config = ProviderConfig::new(String::new(), Some(request.base_url.clone()), request.api_key)
            .with_env_key();
        debug!("Listing models from {}", config.base_url);

        match self.catalog.list_models(&config).await {
            Ok(models) => {
                info!("Found {} models at {}", models.len(), config.base_url);
                Ok(ModelListResponse {
                    base_url: config.base_url,
                    models,
                })
            }
            Err(err) => {
                warn!("Model listing failed for {}: {}", config.base_url, err);
                Err(TurnError::Provider(err).to_payload())
            }
        }
    }
}

fn error_body(payload: ErrorPayload) -> (u16, String) {
    let status = payload.status_code.unwrap_or(500);
    let body = serde_json::to_string(&payload)
        .unwrap_or_else(|_| format!(r#"{{"error":"{}"}}"#, payload.error.replace('"', "'")));
    (status, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_llm::{FailurePolicy, RateLimiter, ScriptedBackend};
    use protocol::{Board, Color, Move, Position};

    struct StaticCatalog(Result<Vec<ModelInfo>, ProviderError>);

    #[async_trait]
    impl ModelCatalog for StaticCatalog {
        async fn list_models(&self, _config: &ProviderConfig) -> Result<Vec<ModelInfo>, ProviderError> {
            self.0.clone()
        }
    }

    fn service(backend: ScriptedBackend, config: OrchestratorConfig, catalog: StaticCatalog) -> TurnService {
        let orchestrator =
            TurnOrchestrator::with_limiter(Arc::new(backend), Arc::new(RateLimiter::new()), config);
        TurnService::with_parts(orchestrator, Arc::new(catalog))
    }

    fn request() -> TurnRequest {
        TurnRequest {
            turn: Color::White,
            legal_moves: vec![Move::new(Position::new_unchecked(6, 4), Position::new_unchecked(4, 4))],
            board: Board::initial(),
            history: Vec::new(),
            model: "m".to_string(),
            api_key: Some("k".to_string()),
            base_url: Some("https://api.example.com/v1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_handle_turn_success() {
        let svc = service(
            ScriptedBackend::with_texts([r#"{"from":[6,4],"to":[4,4]}"#]),
            OrchestratorConfig::default(),
            StaticCatalog(Ok(Vec::new())),
        );
        let response = svc.handle_turn(request()).await.unwrap();
        assert_eq!(response.attempts_used, Some(1));
        assert!(!response.fallback);
    }

    #[tokio::test]
    async fn test_handle_turn_json_errors() {
        let svc = service(
            ScriptedBackend::default(),
            OrchestratorConfig::default(),
            StaticCatalog(Ok(Vec::new())),
        );

        let (status, body) = svc.handle_turn_json("{not json").await;
        assert_eq!(status, 400);
        assert!(body.contains("malformed turn request"));

        let mut req = request();
        req.legal_moves.clear();
        let json = serde_json::to_string(&req).unwrap();
        let (status, body) = svc.handle_turn_json(&json).await;
        assert_eq!(status, 400);
        assert!(body.contains("missing legal moves"));
    }

    #[tokio::test]
    async fn test_handle_turn_json_strict_provider_error() {
        let config = OrchestratorConfig {
            policy: FailurePolicy::Strict,
            ..OrchestratorConfig::default()
        };
        let svc = service(
            ScriptedBackend::new([Err(ProviderError::Http {
                status: 429,
                message: "Too many requests".to_string(),
                is_rate_limit: true,
            })]),
            config,
            StaticCatalog(Ok(Vec::new())),
        );

        let json = serde_json::to_string(&request()).unwrap();
        let (status, body) = svc.handle_turn_json(&json).await;
        assert_eq!(status, 429);
        let payload: ErrorPayload = serde_json::from_str(&body).unwrap();
        assert_eq!(payload.is_rate_limit, Some(true));
        assert!(payload.error.contains("Too many requests"));
    }

    #[tokio::test]
    async fn test_handle_list_models() {
        let models = vec![ModelInfo {
            id: "gpt-4o-mini".to_string(),
            label: None,
            provider: Some("openai".to_string()),
        }];
        let svc = service(
            ScriptedBackend::default(),
            OrchestratorConfig::default(),
            StaticCatalog(Ok(models.clone())),
        );

        let response = svc
            .handle_list_models(ModelListRequest {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: Some("k".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(response.base_url, "https://api.openai.com/v1");
        assert_eq!(response.models, models);

        let err = svc
            .handle_list_models(ModelListRequest {
                base_url: " ".to_string(),
                api_key: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code, Some(400));
    }

    #[tokio::test]
    async fn test_handle_list_models_provider_error() {
        let svc = service(
            ScriptedBackend::default(),
            OrchestratorConfig::default(),
            StaticCatalog(Err(ProviderError::Http {
                status: 401,
                message: "Invalid API key".to_string(),
                is_rate_limit: false,
            })),
        );

        let err = svc
            .handle_list_models(ModelListRequest {
                base_url: "https://api.example.com/v1".to_string(),
                api_key: Some("bad".to_string()),
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code, Some(401));
        assert!(err.error.contains("Invalid API key"));
    }
}
