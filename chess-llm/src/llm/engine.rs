//! 回合编排
//!
//! 一个回合 = 构造提示 → 限流准入 → 调用模型 → 提取走法 → 校验合法性，失败时带纠错上下文重试。
//! 状态转移是纯函数，网络调用只发生在 [`TurnOrchestrator::select_move`] 的循环里。

use std::sync::Arc;
use std::time::Duration;

use protocol::{Move, Notation, TurnRequest, TurnResponse};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::{FailurePolicy, OrchestratorConfig};
use crate::error::{ProviderError, TurnError};
use crate::llm::client::{CompletionBackend, ProviderConfig};
use crate::llm::parser::MoveExtractor;
use crate::llm::prompt::PromptTemplate;
use crate::rate_limit::{Admission, Budget, RateLimitKey, RateLimiter};

/// 日志中回复预览长度
const PREVIEW_LEN: usize = 300;

/// 非空的合法走法集合
#[derive(Debug, Clone, PartialEq)]
pub struct LegalMoves(Vec<Move>);

impl LegalMoves {
    /// 空列表返回 None
    pub fn new(moves: Vec<Move>) -> Option<Self> {
        if moves.is_empty() {
            None
        } else {
            Some(Self(moves))
        }
    }

    pub fn contains(&self, mv: &Move) -> bool {
        self.0.contains(mv)
    }

    pub fn as_slice(&self) -> &[Move] {
        &self.0
    }

    /// 均匀随机选一个
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> Move {
        self.0[rng.gen_range(0..self.0.len())]
    }
}

/// 兜底原因
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    /// 本地限流拒绝，未发出请求
    RateLimited { retry_after: Duration, budget: Budget },
    /// 尝试次数用尽
    AttemptsExhausted,
    /// 模型服务出错（降级策略）
    ProviderUnavailable(String),
    /// 未配置凭据（降级策略）
    CredentialsMissing,
}

impl FallbackReason {
    /// 展示给用户的说明
    pub fn note(&self, attempts: u32) -> String {
        match self {
            FallbackReason::RateLimited { retry_after, budget } => format!(
                "Local rate limit reached ({} budget), retry in {}s. Played a random legal move",
                budget.as_str(),
                retry_after.as_secs().max(1)
            ),
            FallbackReason::AttemptsExhausted => format!(
                "Model did not produce a legal move in {} attempts. Played a random legal move",
                attempts
            ),
            FallbackReason::ProviderUnavailable(message) => {
                format!("Provider error: {}. Played a random legal move", message)
            }
            FallbackReason::CredentialsMissing => {
                "No API key configured. Played a random legal move".to_string()
            }
        }
    }
}

/// 对一次模型回复的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    Legal(Move),
    Illegal(Move),
    Unparseable,
}

impl Candidate {
    pub fn classify(raw: &str, legal: &LegalMoves) -> Self {
        match MoveExtractor::extract(raw) {
            Some(mv) if legal.contains(&mv) => Candidate::Legal(mv),
            Some(mv) => Candidate::Illegal(mv),
            None => Candidate::Unparseable,
        }
    }
}

/// 回合状态机
#[derive(Debug, Clone, PartialEq)]
pub enum TurnState {
    /// 第 `attempt` 次尝试，`last_response` 为上一次的原始回复
    Attempting {
        attempt: u32,
        last_response: Option<String>,
    },
    Done {
        mv: Move,
        attempts: u32,
    },
    Fallback {
        mv: Move,
        attempts: u32,
        reason: FallbackReason,
    },
}

impl TurnState {
    pub fn start() -> Self {
        TurnState::Attempting {
            attempt: 1,
            last_response: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnState::Attempting { .. })
    }

    /// 收到回复后的转移
    pub fn on_candidate<R: Rng + ?Sized>(
        self,
        candidate: Candidate,
        raw: String,
        legal: &LegalMoves,
        max_attempts: u32,
        rng: &mut R,
    ) -> TurnState {
        let TurnState::Attempting { attempt, .. } = self else {
            return self;
        };

        match candidate {
            Candidate::Legal(mv) => TurnState::Done { mv, attempts: attempt },
            _ if attempt >= max_attempts => TurnState::Fallback {
                mv: legal.random(rng),
                attempts: attempt,
                reason: FallbackReason::AttemptsExhausted,
            },
            _ => TurnState::Attempting {
                attempt: attempt + 1,
                last_response: Some(raw),
            },
        }
    }

    /// 限流拒绝：本次请求未发出
    pub fn on_denied<R: Rng + ?Sized>(
        self,
        retry_after: Duration,
        budget: Budget,
        legal: &LegalMoves,
        rng: &mut R,
    ) -> TurnState {
        let TurnState::Attempting { attempt, .. } = self else {
            return self;
        };

        TurnState::Fallback {
            mv: legal.random(rng),
            attempts: attempt.saturating_sub(1),
            reason: FallbackReason::RateLimited { retry_after, budget },
        }
    }

    /// 模型服务出错（仅降级策略走到这里）
    pub fn on_provider_error<R: Rng + ?Sized>(
        self,
        err: &ProviderError,
        legal: &LegalMoves,
        rng: &mut R,
    ) -> TurnState {
        let TurnState::Attempting { attempt, .. } = self else {
            return self;
        };

        let reason = match err {
            ProviderError::AuthMissing { .. } => FallbackReason::CredentialsMissing,
            other => FallbackReason::ProviderUnavailable(other.to_string()),
        };
        TurnState::Fallback {
            mv: legal.random(rng),
            attempts: attempt,
            reason,
        }
    }
}

/// 回合结果：始终带一个合法走法
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub mv: Move,
    /// 实际发出的模型请求次数
    pub attempts_used: u32,
    pub fallback: Option<FallbackReason>,
}

impl TurnOutcome {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn note(&self) -> Option<String> {
        self.fallback.as_ref().map(|r| r.note(self.attempts_used))
    }
}

impl From<TurnOutcome> for TurnResponse {
    fn from(outcome: TurnOutcome) -> Self {
        let note = outcome.note();
        match outcome.fallback {
            None => TurnResponse::accepted(outcome.mv, outcome.attempts_used),
            Some(reason) => {
                let retry_after_ms = match &reason {
                    FallbackReason::RateLimited { retry_after, .. } => Some(retry_after.as_millis() as u64),
                    _ => None,
                };
                TurnResponse {
                    mv: outcome.mv,
                    attempts_used: Some(outcome.attempts_used),
                    fallback: true,
                    rate_limited: retry_after_ms.map(|_| true),
                    retry_after_ms,
                    note,
                }
            }
        }
    }
}

/// 回合编排器
pub struct TurnOrchestrator {
    backend: Arc<dyn CompletionBackend>,
    limiter: Arc<RateLimiter>,
    config: OrchestratorConfig,
}

impl TurnOrchestrator {
    /// 使用进程级共享限流器
    pub fn new(backend: Arc<dyn CompletionBackend>, config: OrchestratorConfig) -> Self {
        Self::with_limiter(backend, RateLimiter::global(), config)
    }

    pub fn with_limiter(
        backend: Arc<dyn CompletionBackend>,
        limiter: Arc<RateLimiter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            backend,
            limiter,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// 为当前走子方选择走法
    pub async fn select_move(&self, request: &TurnRequest) -> Result<TurnOutcome, TurnError> {
        let mut rng = StdRng::from_entropy();
        self.select_move_with_rng(request, &mut rng).await
    }

    /// 使用指定随机源选择走法（兜底走法由 `rng` 决定）
    pub async fn select_move_with_rng<R: Rng + Send>(
        &self,
        request: &TurnRequest,
        rng: &mut R,
    ) -> Result<TurnOutcome, TurnError> {
        let legal = LegalMoves::new(request.legal_moves.clone())
            .ok_or_else(|| TurnError::InvalidRequest("missing legal moves".to_string()))?;
        if request.model.trim().is_empty() {
            return Err(TurnError::InvalidRequest("missing model".to_string()));
        }

        let provider = ProviderConfig::from_request(request);
        let max_attempts = self.config.max_attempts.max(1);

        if !provider.has_credentials() {
            match self.config.policy {
                FailurePolicy::Strict => {
                    return Err(TurnError::AuthMissing {
                        base_url: provider.base_url,
                    })
                }
                FailurePolicy::AlwaysDegrade => {
                    warn!("No API key for {}, playing a random move", provider.base_url);
                    return Ok(TurnOutcome {
                        mv: legal.random(rng),
                        attempts_used: 0,
                        fallback: Some(FallbackReason::CredentialsMissing),
                    });
                }
            }
        }

        let system = PromptTemplate::system_prompt();
        let base_prompt = PromptTemplate::move_request_prompt(
            request.turn,
            &request.board,
            legal.as_slice(),
            &request.history,
            self.config.history_limit,
        );
        let key = RateLimitKey::new(self.config.client_id.clone(), provider.model.clone());

        debug!("LLM prompt length: {} chars", base_prompt.len());

        let mut state = TurnState::start();
        loop {
            let (attempt, user) = match &state {
                TurnState::Attempting { attempt, last_response } => {
                    let user = match last_response {
                        Some(previous) => format!(
                            "{}{}",
                            base_prompt,
                            PromptTemplate::correction_prompt(attempt - 1, previous)
                        ),
                        None => base_prompt.clone(),
                    };
                    (*attempt, user)
                }
                TurnState::Done { mv, attempts } => {
                    return Ok(TurnOutcome {
                        mv: *mv,
                        attempts_used: *attempts,
                        fallback: None,
                    })
                }
                TurnState::Fallback { mv, attempts, reason } => {
                    warn!(
                        "Falling back to random move {} after {} attempts: {:?}",
                        Notation::coordinate(mv),
                        attempts,
                        reason
                    );
                    return Ok(TurnOutcome {
                        mv: *mv,
                        attempts_used: *attempts,
                        fallback: Some(reason.clone()),
                    });
                }
            };

            let cost = PromptTemplate::estimate_turn_cost(system, &user, self.config.generation.max_tokens);
            if let Admission::Denied { retry_after, budget } =
                self.limiter.admit(&key, cost, &self.config.rate_limits)
            {
                warn!(
                    "Rate limit denied {} ({} budget, estimated {} tokens), retry after {:?}",
                    provider.model,
                    budget.as_str(),
                    cost,
                    retry_after
                );
                state = state.on_denied(retry_after, budget, &legal, rng);
                continue;
            }

            info!("LLM move attempt {}/{} ({})", attempt, max_attempts, provider.model);

            match self
                .backend
                .complete(&provider, system, &user, &self.config.generation)
                .await
            {
                Ok(raw) => {
                    let candidate = Candidate::classify(&raw, &legal);
                    match candidate {
                        Candidate::Legal(mv) => {
                            info!("LLM produced legal move {} on attempt {}", Notation::coordinate(&mv), attempt);
                        }
                        Candidate::Illegal(mv) => {
                            warn!("LLM suggested illegal move {} (attempt {})", Notation::coordinate(&mv), attempt);
                        }
                        Candidate::Unparseable => {
                            let preview: String = raw.chars().take(PREVIEW_LEN).collect();
                            warn!("Failed to parse LLM response (attempt {}): {}", attempt, preview);
                        }
                    }
                    state = state.on_candidate(candidate, raw, &legal, max_attempts, rng);
                }
                Err(err) => match self.config.policy {
                    FailurePolicy::Strict => {
                        warn!("LLM request failed (attempt {}): {}", attempt, err);
                        return Err(err.into());
                    }
                    FailurePolicy::AlwaysDegrade => {
                        warn!("LLM request failed (attempt {}), degrading: {}", attempt, err);
                        state = state.on_provider_error(&err, &legal, rng);
                    }
                },
            }
        }
    }
}
