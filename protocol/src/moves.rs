//! 走法与伪合法走法生成
//!
//! 只处理棋子的基本走法：不检测将军、将死与和棋，不支持王车易位与吃过路兵。

use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::piece::{Color, Piece, PieceType, Position};

/// 走法，序列化为 `{"from":[r,c],"to":[r,c]}`
///
/// 相等性只比较起点与终点。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    /// 起始位置
    pub from: Position,
    /// 目标位置
    pub to: Position,
}

impl Move {
    /// 创建新走法
    pub fn new(from: Position, to: Position) -> Self {
        Self { from, to }
    }

    /// 由四个坐标创建，任一越界返回 None
    pub fn from_coords(from_row: i64, from_col: i64, to_row: i64, to_col: i64) -> Option<Self> {
        Some(Self {
            from: Position::from_coords(from_row, from_col)?,
            to: Position::from_coords(to_row, to_col)?,
        })
    }

    /// 序列化为提示与模型回复使用的 JSON 文本
    pub fn to_json(&self) -> String {
        format!(
            r#"{{"from":[{},{}],"to":[{},{}]}}"#,
            self.from.row, self.from.col, self.to.row, self.to.col
        )
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

const ROOK_DIRECTIONS: [(i8, i8); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
const BISHOP_DIRECTIONS: [(i8, i8); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];
const KNIGHT_JUMPS: [(i8, i8); 8] = [
    (2, 1),
    (2, -1),
    (-2, 1),
    (-2, -1),
    (1, 2),
    (1, -2),
    (-1, 2),
    (-1, -2),
];

/// 走法生成器
pub struct MoveGenerator;

impl MoveGenerator {
    /// 生成指定阵营的所有伪合法走法
    pub fn generate(board: &Board, color: Color) -> Vec<Move> {
        let mut moves = Vec::with_capacity(48);

        for (pos, piece) in board.pieces(color) {
            Self::generate_piece_moves(board, pos, piece, &mut moves);
        }

        moves
    }

    /// 生成指定棋子的所有伪合法走法
    fn generate_piece_moves(board: &Board, pos: Position, piece: Piece, moves: &mut Vec<Move>) {
        let color = piece.color;
        match piece.piece_type {
            PieceType::Pawn => Self::generate_pawn_moves(board, pos, color, moves),
            PieceType::Knight => Self::generate_step_moves(board, pos, color, &KNIGHT_JUMPS, moves),
            PieceType::Bishop => Self::generate_slide_moves(board, pos, color, &BISHOP_DIRECTIONS, moves),
            PieceType::Rook => Self::generate_slide_moves(board, pos, color, &ROOK_DIRECTIONS, moves),
            PieceType::Queen => {
                Self::generate_slide_moves(board, pos, color, &ROOK_DIRECTIONS, moves);
                Self::generate_slide_moves(board, pos, color, &BISHOP_DIRECTIONS, moves);
            }
            PieceType::King => {
                Self::generate_step_moves(board, pos, color, &ROOK_DIRECTIONS, moves);
                Self::generate_step_moves(board, pos, color, &BISHOP_DIRECTIONS, moves);
            }
        }
    }

    /// 兵：前进一格，起始行可前进两格，斜前方吃子
    fn generate_pawn_moves(board: &Board, pos: Position, color: Color, moves: &mut Vec<Move>) {
        let forward = color.forward();

        if let Some(one) = pos.offset(forward, 0) {
            if board.get(one).is_none() {
                moves.push(Move::new(pos, one));

                if pos.row == color.pawn_row() {
                    if let Some(two) = pos.offset(forward * 2, 0) {
                        if board.get(two).is_none() {
                            moves.push(Move::new(pos, two));
                        }
                    }
                }
            }
        }

        for d_col in [-1, 1] {
            if let Some(to) = pos.offset(forward, d_col) {
                if matches!(board.get(to), Some(target) if target.color != color) {
                    moves.push(Move::new(pos, to));
                }
            }
        }
    }

    /// 马与王：固定偏移的一步
    fn generate_step_moves(
        board: &Board,
        pos: Position,
        color: Color,
        offsets: &[(i8, i8)],
        moves: &mut Vec<Move>,
    ) {
        for &(d_row, d_col) in offsets {
            if let Some(to) = pos.offset(d_row, d_col) {
                Self::try_add_move(board, pos, to, color, moves);
            }
        }
    }

    /// 车、象、后：沿方向滑行直到被阻挡
    fn generate_slide_moves(
        board: &Board,
        pos: Position,
        color: Color,
        directions: &[(i8, i8)],
        moves: &mut Vec<Move>,
    ) {
        for &(d_row, d_col) in directions {
            let mut current = pos;
            while let Some(to) = current.offset(d_row, d_col) {
                match board.get(to) {
                    Some(target) => {
                        if target.color != color {
                            moves.push(Move::new(pos, to));
                        }
                        break;
                    }
                    None => {
                        moves.push(Move::new(pos, to));
                        current = to;
                    }
                }
            }
        }
    }

    /// 目标为空或敌方棋子时加入走法
    fn try_add_move(board: &Board, from: Position, to: Position, color: Color, moves: &mut Vec<Move>) {
        match board.get(to) {
            Some(target) if target.color == color => {}
            _ => moves.push(Move::new(from, to)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(fr: u8, fc: u8, tr: u8, tc: u8) -> Move {
        Move::new(Position::new_unchecked(fr, fc), Position::new_unchecked(tr, tc))
    }

    #[test]
    fn test_initial_moves() {
        let board = Board::initial();

        // 8 个兵各两步 + 2 个马各两步
        let white = MoveGenerator::generate(&board, Color::White);
        assert_eq!(white.len(), 20);
        assert!(white.contains(&mv(6, 4, 4, 4)));
        assert!(white.contains(&mv(7, 6, 5, 5)));

        let black = MoveGenerator::generate(&board, Color::Black);
        assert_eq!(black.len(), 20);
        assert!(black.contains(&mv(1, 4, 3, 4)));
    }

    #[test]
    fn test_pawn_blocked_and_captures() {
        let mut board = Board::empty();
        board.set(Position::new_unchecked(6, 4), Some(Piece::new(PieceType::Pawn, Color::White)));
        board.set(Position::new_unchecked(5, 4), Some(Piece::new(PieceType::Knight, Color::Black)));
        board.set(Position::new_unchecked(5, 3), Some(Piece::new(PieceType::Rook, Color::Black)));
        board.set(Position::new_unchecked(5, 5), Some(Piece::new(PieceType::Rook, Color::White)));

        let mut moves = Vec::new();
        MoveGenerator::generate_pawn_moves(&board, Position::new_unchecked(6, 4), Color::White, &mut moves);

        assert_eq!(moves, vec![mv(6, 4, 5, 3)]);
    }

    #[test]
    fn test_rook_slides_until_blocked() {
        let mut board = Board::empty();
        board.set(Position::new_unchecked(7, 0), Some(Piece::new(PieceType::Rook, Color::White)));
        board.set(Position::new_unchecked(4, 0), Some(Piece::new(PieceType::Pawn, Color::Black)));
        board.set(Position::new_unchecked(7, 2), Some(Piece::new(PieceType::Bishop, Color::White)));

        let mut moves = Vec::new();
        MoveGenerator::generate_slide_moves(
            &board,
            Position::new_unchecked(7, 0),
            Color::White,
            &ROOK_DIRECTIONS,
            &mut moves,
        );

        // 向上 3 格（含吃子），向右 1 格
        assert_eq!(moves.len(), 4);
        assert!(moves.contains(&mv(7, 0, 4, 0)));
        assert!(!moves.contains(&mv(7, 0, 3, 0)));
        assert!(!moves.contains(&mv(7, 0, 7, 2)));
    }

    #[test]
    fn test_king_in_corner() {
        let mut board = Board::empty();
        board.set(Position::new_unchecked(0, 0), Some(Piece::new(PieceType::King, Color::Black)));

        let moves = MoveGenerator::generate(&board, Color::Black);
        assert_eq!(moves.len(), 3);
    }

    #[test]
    fn test_queen_in_center() {
        let mut board = Board::empty();
        board.set(Position::new_unchecked(3, 3), Some(Piece::new(PieceType::Queen, Color::White)));

        let moves = MoveGenerator::generate(&board, Color::White);
        assert_eq!(moves.len(), 27);
    }

    #[test]
    fn test_move_json_form() {
        let m = mv(6, 4, 4, 4);
        assert_eq!(m.to_json(), r#"{"from":[6,4],"to":[4,4]}"#);
        assert_eq!(serde_json::to_string(&m).unwrap(), m.to_json());
    }

    #[test]
    fn test_move_from_coords_range() {
        assert_eq!(Move::from_coords(6, 4, 4, 4), Some(mv(6, 4, 4, 4)));
        assert_eq!(Move::from_coords(1, 1, 9, 9), None);
        assert_eq!(Move::from_coords(-1, 0, 0, 0), None);
    }
}
