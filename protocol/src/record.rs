//! 对局记录格式
//!
//! 以 JSON 保存两个模型之间的完整对局，便于事后复盘。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::moves::Move;
use crate::piece::Color;

/// 记录版本
pub const RECORD_VERSION: &str = "1.0";

/// 对局结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GameResult {
    /// 吃掉对方的王
    KingCaptured { winner: Color },
    /// 一方无棋可走
    NoLegalMoves { side: Color },
    /// 达到半回合上限
    PlyLimit { plies: u32 },
    /// 回合错误导致对局中止
    Aborted { side: Color, error: String },
}

/// 一方的配置信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideInfo {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// 对局元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameMetadata {
    pub white: SideInfo,
    pub black: SideInfo,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<GameResult>,
}

/// 单步记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRecord {
    /// 半回合序号，从 1 开始
    pub ply: u32,
    pub side: Color,
    #[serde(rename = "move")]
    pub mv: Move,
    /// 长代数记法
    pub notation: String,
    /// 本回合实际发出的模型请求数
    pub attempts_used: u32,
    /// 是否为随机兜底走法
    #[serde(default)]
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// 完整的对局记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    pub version: String,
    pub metadata: GameMetadata,
    pub moves: Vec<MoveRecord>,
}

impl GameRecord {
    /// 创建新的对局记录
    pub fn new(white: SideInfo, black: SideInfo) -> Self {
        Self {
            version: RECORD_VERSION.to_string(),
            metadata: GameMetadata {
                white,
                black,
                started_at: Utc::now(),
                finished_at: None,
                result: None,
            },
            moves: Vec::new(),
        }
    }

    /// 添加走法
    pub fn add_move(&mut self, mv: MoveRecord) {
        self.moves.push(mv);
    }

    /// 设置结果并记录结束时间
    pub fn finish(&mut self, result: GameResult) {
        self.metadata.result = Some(result);
        self.metadata.finished_at = Some(Utc::now());
    }

    /// 兜底走法数量
    pub fn fallback_count(&self, side: Color) -> usize {
        self.moves
            .iter()
            .filter(|m| m.side == side && m.fallback)
            .count()
    }

    /// 转换为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 从 JSON 字符串解析
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
