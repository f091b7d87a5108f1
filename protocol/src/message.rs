//! 消息类型定义
//!
//! 走法请求、走法响应与模型列表的线上格式，字段名使用 camelCase。

use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::moves::Move;
use crate::piece::Color;

/// 单回合走法请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// 轮到哪一方
    pub turn: Color,
    /// 当前合法走法（由规则引擎提供）
    #[serde(default)]
    pub legal_moves: Vec<Move>,
    /// 当前棋盘
    pub board: Board,
    /// 历史走法文本
    #[serde(default)]
    pub history: Vec<String>,
    /// 模型标识
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl TurnRequest {
    /// 从 JSON 解析
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// 单回合走法响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    #[serde(rename = "move")]
    pub mv: Move,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts_used: Option<u32>,
    /// 是否为随机兜底走法
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// 兜底原因，供界面展示
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TurnResponse {
    /// 模型给出的有效走法
    pub fn accepted(mv: Move, attempts_used: u32) -> Self {
        Self {
            mv,
            attempts_used: Some(attempts_used),
            fallback: false,
            rate_limited: None,
            retry_after_ms: None,
            note: None,
        }
    }
}

/// 不可恢复的回合错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// 可读的错误说明（含修复建议）
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_rate_limit: Option<bool>,
}

impl ErrorPayload {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status_code: None,
            is_rate_limit: None,
        }
    }
}

/// 模型列表请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListRequest {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// 模型信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ModelInfo {
    /// 排序用的显示名：无 label 时使用 id
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// 模型列表响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelListResponse {
    pub base_url: String,
    pub models: Vec<ModelInfo>,
}
