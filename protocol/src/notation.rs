//! 走法记谱
//!
//! - 坐标记法：`e2e4`
//! - 长代数记法：`Ng1-f3`、`Pe4xd5`，吃子用 `x`

use crate::board::Board;
use crate::moves::Move;
use crate::piece::PieceType;

/// 记谱工具
pub struct Notation;

impl Notation {
    /// 坐标记法
    pub fn coordinate(mv: &Move) -> String {
        format!("{}{}", mv.from.square_name(), mv.to.square_name())
    }

    /// 长代数记法，起点无棋子时返回 None
    pub fn long_algebraic(board: &Board, mv: &Move) -> Option<String> {
        let piece = board.get(mv.from)?;
        let letter = match piece.piece_type {
            PieceType::Pawn => 'P',
            PieceType::Rook => 'R',
            PieceType::Knight => 'N',
            PieceType::Bishop => 'B',
            PieceType::Queen => 'Q',
            PieceType::King => 'K',
        };
        let action = if board.get(mv.to).is_some() { 'x' } else { '-' };

        Some(format!(
            "{}{}{}{}",
            letter,
            mv.from.square_name(),
            action,
            mv.to.square_name()
        ))
    }

    /// 历史记录用的文本：优先长代数记法，退化为坐标记法
    pub fn history_entry(board: &Board, mv: &Move) -> String {
        Self::long_algebraic(board, mv).unwrap_or_else(|| Self::coordinate(mv))
    }
}
