//! LLM 国际象棋对战
//!
//! 包含:
//! - 回合请求处理（走法请求、模型列表）
//! - 对局控制
//! - 双方配置
//! - 对局记录存储

pub mod game;
pub mod player;
pub mod server;
pub mod storage;

pub use game::MatchRunner;
pub use player::{PlayerConfig, Players};
pub use server::{ModelCatalog, TurnService};
pub use storage::{MatchStorage, SavedMatchInfo};
