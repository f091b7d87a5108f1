//! 模型服务适配
//!
//! 根据 base URL 识别服务类型，分别构造请求体、鉴权头，并从各种响应形状中取出文本：
//! - 生成式（Gemini `generateContent`）：单个内容块 + generationConfig，`x-goog-api-key` 鉴权
//! - 对话式（OpenAI 兼容 `chat/completions`）：system/user 消息对，Bearer 鉴权

use std::sync::LazyLock;

use protocol::ModelInfo;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::config::GenerationParams;
use crate::error::ProviderError;

/// 默认服务地址
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// 生成式服务的主机特征
const GENERATION_HOSTS: &[&str] = &["generativelanguage.googleapis.com"];

/// 支持 `response_format: json_object` 的对话式服务
const JSON_MODE_HOSTS: &[&str] = &[
    "api.openai.com",
    "api.groq.com",
    "api.deepseek.com",
    "api.mistral.ai",
    "api.together.xyz",
    "api.fireworks.ai",
    "openrouter.ai",
];

/// 错误体截取长度
const ERROR_SNIPPET_LEN: usize = 300;

/// 回复被截断时，嵌在文本里的走法片段（可能缺右括号）
static EMBEDDED_MOVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\s*"from"[^{}]*\}?"#).expect("valid regex"));

/// 服务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// 单轮生成式接口
    Generation,
    /// 对话补全接口
    ChatCompletions {
        /// 是否请求 JSON 结构化输出
        json_mode: bool,
    },
}

impl ProviderKind {
    /// 按 base URL 的主机名识别服务类型
    pub fn detect(base_url: &str) -> Self {
        let host = host_of(base_url);

        if GENERATION_HOSTS.iter().any(|h| host.ends_with(h)) {
            return Self::Generation;
        }

        Self::ChatCompletions {
            json_mode: JSON_MODE_HOSTS.iter().any(|h| host.ends_with(h)),
        }
    }

    /// 补全请求地址
    pub fn completion_url(&self, base_url: &str, model: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            Self::Generation => {
                let model = model.strip_prefix("models/").unwrap_or(model);
                format!("{}/models/{}:generateContent", base, model)
            }
            Self::ChatCompletions { .. } => format!("{}/chat/completions", base),
        }
    }

    /// 模型列表地址
    pub fn models_url(&self, base_url: &str) -> String {
        format!("{}/models", base_url.trim_end_matches('/'))
    }

    /// 鉴权头 (名称, 值)
    pub fn auth_header(&self, api_key: &str) -> (&'static str, String) {
        match self {
            Self::Generation => ("x-goog-api-key", api_key.to_string()),
            Self::ChatCompletions { .. } => ("Authorization", format!("Bearer {}", api_key)),
        }
    }

    /// 构造请求体
    pub fn build_body(&self, model: &str, system: &str, user: &str, params: &GenerationParams) -> Value {
        let body = match self {
            Self::Generation => serde_json::to_value(GenerateContentRequest {
                contents: vec![Content {
                    role: "user",
                    parts: vec![Part {
                        text: format!("{}\n\n{}", system, user),
                    }],
                }],
                generation_config: GenerationConfig {
                    temperature: params.temperature,
                    max_output_tokens: params.max_tokens,
                    response_mime_type: "application/json",
                },
            }),
            Self::ChatCompletions { json_mode } => serde_json::to_value(ChatRequest {
                model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: system,
                    },
                    ChatMessage {
                        role: "user",
                        content: user,
                    },
                ],
                temperature: params.temperature,
                max_tokens: params.max_tokens,
                response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
            }),
        };
        // 结构体只含字符串与数字，序列化不会失败
        body.unwrap_or(Value::Null)
    }

    /// 从响应中取出助手文本
    pub fn extract_text(&self, body: &Value) -> Result<String, ProviderError> {
        let finish_reason = self.finish_reason(body);
        let capped = is_token_capped(finish_reason.as_deref());
        let text = match self {
            Self::Generation => extract_generation_text(body, capped),
            Self::ChatCompletions { .. } => extract_chat_text(body, capped),
        };

        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            return Ok(text);
        }

        let hint = truncation_hint(finish_reason.as_deref(), body);
        Err(ProviderError::EmptyResponse {
            finish_reason,
            observed_keys: observed_keys(body),
            hint,
        })
    }

    /// 结束原因
    pub fn finish_reason(&self, body: &Value) -> Option<String> {
        let reason = match self {
            Self::Generation => body
                .pointer("/candidates/0/finishReason")
                .or_else(|| body.pointer("/promptFeedback/blockReason")),
            Self::ChatCompletions { .. } => body.pointer("/choices/0/finish_reason"),
        };
        reason.and_then(Value::as_str).map(str::to_string)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

/// 小写主机名，无法解析时退化为整个小写 URL
fn host_of(base_url: &str) -> String {
    reqwest::Url::parse(base_url.trim())
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| base_url.trim().to_ascii_lowercase())
}

/// 对话式响应：message.content（字符串/对象/分段数组）、tool call 参数、delta、旧版 text，
/// 因 token 上限被截断时，最后在推理字段中寻找嵌入的走法片段
fn extract_chat_text(body: &Value, capped: bool) -> Option<String> {
    let choice = body.pointer("/choices/0")?;
    let message = choice.get("message");

    if let Some(text) = message.and_then(|m| m.get("content")).and_then(content_text) {
        return Some(text);
    }

    if let Some(args) = message.and_then(|m| m.pointer("/tool_calls/0/function/arguments")) {
        match args {
            Value::String(s) if !s.trim().is_empty() => return Some(s.clone()),
            Value::Object(_) => return Some(args.to_string()),
            _ => {}
        }
    }

    if let Some(text) = choice.pointer("/delta/content").and_then(content_text) {
        return Some(text);
    }

    if let Some(text) = choice.get("text").and_then(content_text) {
        return Some(text);
    }

    if !capped {
        return None;
    }
    let reasoning = message
        .and_then(|m| m.get("reasoning_content").or_else(|| m.get("reasoning")))
        .and_then(Value::as_str)?;
    embedded_move(reasoning)
}

/// 消息内容的几种形状
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()).filter(|s| !s.trim().is_empty()),
        Value::Array(parts) => {
            let text: String = parts
                .iter()
                .filter(|p| !matches!(p.get("type").and_then(Value::as_str), Some("reasoning" | "thinking")))
                .filter_map(|p| match p {
                    Value::String(s) => Some(s.as_str()),
                    _ => p
                        .get("text")
                        .and_then(|t| t.as_str().or_else(|| t.get("value").and_then(Value::as_str))),
                })
                .collect();
            Some(text).filter(|t| !t.trim().is_empty())
        }
        Value::Object(obj) => {
            if let Some(text) = obj.get("text").and_then(Value::as_str) {
                return Some(text.to_string()).filter(|t| !t.trim().is_empty());
            }
            // 已被解析成 JSON 对象的走法
            (obj.contains_key("from") || obj.contains_key("move")).then(|| content.to_string())
        }
        _ => None,
    }
}

/// 生成式响应：candidates[0].content.parts[*].text，跳过 thought 分段；
/// 没有正文且因 token 上限被截断时，在所有分段中寻找嵌入的走法片段
fn extract_generation_text(body: &Value, capped: bool) -> Option<String> {
    let parts = body.pointer("/candidates/0/content/parts")?.as_array()?;

    let text: String = parts
        .iter()
        .filter(|p| !p.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if !text.trim().is_empty() {
        return Some(text);
    }
    if !capped {
        return None;
    }

    parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .find_map(embedded_move)
}

fn embedded_move(text: &str) -> Option<String> {
    EMBEDDED_MOVE.find(text).map(|m| m.as_str().to_string())
}

/// 顶层键与首个 choice/candidate 的键
fn observed_keys(body: &Value) -> Vec<String> {
    let mut keys: Vec<String> = body
        .as_object()
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default();

    for (path, label) in [("/choices/0", "choices[0]"), ("/candidates/0", "candidates[0]")] {
        if let Some(obj) = body.pointer(path).and_then(Value::as_object) {
            keys.extend(obj.keys().map(|k| format!("{}.{}", label, k)));
        }
    }

    keys
}

/// 因 token 上限截断时的修复建议
/// 结束原因是否为 token 上限
fn is_token_capped(finish_reason: Option<&str>) -> bool {
    matches!(finish_reason, Some("MAX_TOKENS" | "length"))
}

fn truncation_hint(finish_reason: Option<&str>, body: &Value) -> Option<String> {
    if !is_token_capped(finish_reason) {
        return None;
    }

    let reasoning_tokens = body
        .pointer("/usageMetadata/thoughtsTokenCount")
        .or_else(|| body.pointer("/usage/completion_tokens_details/reasoning_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Some(if reasoning_tokens > 0 {
        format!(
            "The model spent {} output tokens on internal reasoning and hit the token limit before \
             writing a move. Raise the max token limit or choose a model without extended thinking",
            reasoning_tokens
        )
    } else {
        "The reply was cut off by the max token limit. Raise the max token limit".to_string()
    })
}

/// 非成功状态：尽力从错误体中取出可读信息
pub fn http_error(status: u16, body: &str, model: &str) -> ProviderError {
    let message = if is_zero_quota(body) {
        format!(
            "Quota for model '{}' is 0 on the free tier. Enable billing for this API project \
             or switch to a model that has free-tier quota",
            model
        )
    } else {
        error_message(body)
    };

    ProviderError::Http {
        status,
        message,
        is_rate_limit: status == 429,
    }
}

/// `error.message`、`error`（字符串）、`message`，否则截取原文
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        // 部分服务把错误包在数组里
        let value = value.as_array().and_then(|a| a.first()).unwrap_or(&value);

        let found = value
            .pointer("/error/message")
            .or_else(|| value.get("error").filter(|e| e.is_string()))
            .or_else(|| value.get("message"))
            .and_then(Value::as_str);
        if let Some(msg) = found {
            return msg.to_string();
        }
    }

    let snippet: String = body.trim().chars().take(ERROR_SNIPPET_LEN).collect();
    if snippet.is_empty() {
        "empty error body".to_string()
    } else {
        snippet
    }
}

/// 免费档配额为 0 的特征
fn is_zero_quota(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("limit: 0") && (lower.contains("free_tier") || lower.contains("freetier"))
}

/// 解析模型列表：兼容 `data` / `models` 数组，按显示名（忽略大小写）再按 id 排序，按 id 去重
pub fn parse_model_list(body: &Value) -> Vec<ModelInfo> {
    let items = body
        .get("data")
        .or_else(|| body.get("models"))
        .and_then(Value::as_array)
        .or_else(|| body.as_array());

    let mut models: Vec<ModelInfo> = Vec::new();
    for item in items.into_iter().flatten() {
        let Some(info) = model_info(item) else {
            continue;
        };
        if !models.iter().any(|m| m.id == info.id) {
            models.push(info);
        }
    }

    models.sort_by(|a, b| {
        a.display_name()
            .to_lowercase()
            .cmp(&b.display_name().to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    models
}

fn model_info(item: &Value) -> Option<ModelInfo> {
    let str_field = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| item.get(*n).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let id = match item {
        Value::String(s) => Some(s.clone()),
        _ => str_field(&["id", "model", "name"]),
    }?;

    let label = str_field(&["label", "displayName", "display_name"]);

    let provider = str_field(&["provider", "owned_by", "ownedBy", "organization"])
        .or_else(|| {
            item.pointer("/provider/name")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| {
            id.split_once('/')
                .filter(|(org, _)| !org.is_empty() && *org != "models")
                .map(|(org, _)| org.to_string())
        });

    Some(ModelInfo { id, label, provider })
}
