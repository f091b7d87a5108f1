//! 棋盘状态

use serde::{Deserialize, Serialize};

use crate::constants::BOARD_SIZE;
use crate::error::ChessError;
use crate::piece::{Color, Piece, PieceType, Position};

/// 线上格式：8 行 8 列的嵌套数组，空格为 null
type Grid = Vec<Vec<Option<Piece>>>;

/// 棋盘
///
/// 第 0 行为黑方底线，第 7 行为白方底线。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Grid", into = "Grid")]
pub struct Board {
    /// 8x8 棋盘，索引为 row * 8 + col
    squares: Vec<Option<Piece>>,
}

impl Board {
    /// 创建空棋盘
    pub fn empty() -> Self {
        Self {
            squares: vec![None; BOARD_SIZE * BOARD_SIZE],
        }
    }

    /// 创建初始棋盘
    pub fn initial() -> Self {
        let mut board = Self::empty();

        let back_rank = [
            PieceType::Rook,
            PieceType::Knight,
            PieceType::Bishop,
            PieceType::Queen,
            PieceType::King,
            PieceType::Bishop,
            PieceType::Knight,
            PieceType::Rook,
        ];

        for (col, piece_type) in back_rank.iter().enumerate() {
            let col = col as u8;
            board.set(Position::new_unchecked(0, col), Some(Piece::new(*piece_type, Color::Black)));
            board.set(Position::new_unchecked(1, col), Some(Piece::new(PieceType::Pawn, Color::Black)));
            board.set(Position::new_unchecked(6, col), Some(Piece::new(PieceType::Pawn, Color::White)));
            board.set(Position::new_unchecked(7, col), Some(Piece::new(*piece_type, Color::White)));
        }

        board
    }

    /// 获取指定位置的棋子
    pub fn get(&self, pos: Position) -> Option<Piece> {
        if pos.is_valid() {
            self.squares[pos.to_index()]
        } else {
            None
        }
    }

    /// 设置指定位置的棋子
    pub fn set(&mut self, pos: Position, piece: Option<Piece>) {
        if pos.is_valid() {
            self.squares[pos.to_index()] = piece;
        }
    }

    /// 移动棋子（不检查规则），返回被吃的棋子
    ///
    /// 兵到达底线时自动升变为后。
    pub fn move_piece(&mut self, from: Position, to: Position) -> Option<Piece> {
        let piece = self.get(from);
        let captured = self.get(to);
        self.set(from, None);

        let placed = piece.map(|p| {
            if p.piece_type == PieceType::Pawn && to.row == p.color.promotion_row() {
                Piece::new(PieceType::Queen, p.color)
            } else {
                p
            }
        });
        self.set(to, placed);
        captured
    }

    /// 获取指定阵营的所有棋子位置
    pub fn pieces(&self, color: Color) -> Vec<(Position, Piece)> {
        let mut result = Vec::new();
        for row in 0..BOARD_SIZE {
            for col in 0..BOARD_SIZE {
                let pos = Position::new_unchecked(row as u8, col as u8);
                if let Some(piece) = self.get(pos) {
                    if piece.color == color {
                        result.push((pos, piece));
                    }
                }
            }
        }
        result
    }

    /// 按行迭代
    pub fn rows(&self) -> impl Iterator<Item = &[Option<Piece>]> + '_ {
        self.squares.chunks(BOARD_SIZE)
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}

impl TryFrom<Grid> for Board {
    type Error = ChessError;

    fn try_from(grid: Grid) -> Result<Self, Self::Error> {
        if grid.len() != BOARD_SIZE {
            return Err(ChessError::InvalidBoard {
                reason: format!("expected {} rows, got {}", BOARD_SIZE, grid.len()),
            });
        }
        let mut squares = Vec::with_capacity(BOARD_SIZE * BOARD_SIZE);
        for (i, row) in grid.into_iter().enumerate() {
            if row.len() != BOARD_SIZE {
                return Err(ChessError::InvalidBoard {
                    reason: format!("row {} has {} cells", i, row.len()),
                });
            }
            squares.extend(row);
        }
        Ok(Self { squares })
    }
}

impl From<Board> for Grid {
    fn from(board: Board) -> Self {
        board.rows().map(|row| row.to_vec()).collect()
    }
}
