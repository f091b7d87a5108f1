//! LLM 国际象棋对战共享协议库
//!
//! 包含:
//! - 棋子、棋盘、坐标等核心数据结构
//! - 伪合法走法生成（不检测将军）
//! - 走法请求/响应与模型列表的消息格式
//! - 对局记录格式 (JSON)

mod board;
mod constants;
mod error;
mod message;
mod moves;
mod notation;
mod piece;
mod record;

pub use board::Board;
pub use constants::*;
pub use error::ChessError;
pub use message::{
    ErrorPayload, ModelInfo, ModelListRequest, ModelListResponse, TurnRequest, TurnResponse,
};
pub use moves::{Move, MoveGenerator};
pub use notation::Notation;
pub use piece::{Color, Piece, PieceType, Position};
pub use record::{GameMetadata, GameRecord, GameResult, MoveRecord, SideInfo, RECORD_VERSION};
