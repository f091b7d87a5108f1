//! 错误类型定义

use thiserror::Error;

/// 棋盘规则错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChessError {
    /// 无效的位置
    #[error("Invalid position: [{row}, {col}]")]
    InvalidPosition { row: i64, col: i64 },

    /// 棋盘形状错误
    #[error("Invalid board shape: {reason}")]
    InvalidBoard { reason: String },
}
