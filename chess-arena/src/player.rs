//! 对局双方配置

use anyhow::{Context, Result};
use chess_llm::ProviderConfig;
use protocol::{Board, Color, Move, SideInfo, TurnRequest};

/// 一方使用的模型服务
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    pub color: Color,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl PlayerConfig {
    pub fn new(color: Color, model: impl Into<String>) -> Self {
        Self {
            color,
            model: model.into(),
            base_url: None,
            api_key: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// 环境变量前缀：`WHITE` / `BLACK`
    pub fn env_prefix(color: Color) -> &'static str {
        match color {
            Color::White => "WHITE",
            Color::Black => "BLACK",
        }
    }

    /// 读取 `{PREFIX}_MODEL`、`{PREFIX}_BASE_URL`、`{PREFIX}_API_KEY`
    pub fn from_env(color: Color) -> Result<Self> {
        Self::from_lookup(color, |name| std::env::var(name).ok())
    }

    /// 通过查找函数读取配置，模型名必填
    pub fn from_lookup<F>(color: Color, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = Self::env_prefix(color);
        let get = |suffix: &str| {
            lookup(&format!("{}_{}", prefix, suffix))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let model = get("MODEL").with_context(|| format!("{}_MODEL is not set", prefix))?;

        Ok(Self {
            color,
            model,
            base_url: get("BASE_URL"),
            api_key: get("API_KEY"),
        })
    }

    /// 归一化后的连接配置
    pub fn provider(&self) -> ProviderConfig {
        ProviderConfig::new(self.model.clone(), self.base_url.clone(), self.api_key.clone())
    }

    /// 记录用的配置信息（不含 Key）
    pub fn side_info(&self) -> SideInfo {
        SideInfo {
            model: self.model.clone(),
            base_url: self.base_url.clone(),
        }
    }

    /// 日志里的显示名
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.model, self.color)
    }

    /// 构造本方回合的走法请求
    pub fn turn_request(&self, board: &Board, legal_moves: Vec<Move>, history: &[String]) -> TurnRequest {
        TurnRequest {
            turn: self.color,
            legal_moves,
            board: board.clone(),
            history: history.to_vec(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

/// 对局双方
#[derive(Debug, Clone, PartialEq)]
pub struct Players {
    pub white: PlayerConfig,
    pub black: PlayerConfig,
}

impl Players {
    pub fn new(white: PlayerConfig, black: PlayerConfig) -> Self {
        Self { white, black }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self {
            white: PlayerConfig::from_env(Color::White)?,
            black: PlayerConfig::from_env(Color::Black)?,
        })
    }

    pub fn get(&self, color: Color) -> &PlayerConfig {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }
}
