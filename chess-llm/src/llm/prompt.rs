//! LLM 提示模板
//!
//! 定义用于与 LLM 交互的提示格式，包括：
//! - 系统提示（角色设定与输出格式）
//! - 棋盘文本网格
//! - 走法请求与纠错提示
//! - 准入用的 token 估算

use protocol::{Board, Color, Move, BOARD_SIZE};

/// 每个 token 约对应的字符数
const CHARS_PER_TOKEN: usize = 4;

/// LLM 提示模板
pub struct PromptTemplate;

impl PromptTemplate {
    /// 系统提示：设定角色并约束输出格式
    pub fn system_prompt() -> &'static str {
        r#"You are a strong chess engine playing a game against another model.

Board coordinates are [row, col] with 0-7 for both.
- Row 0 is Black's back rank, row 7 is White's back rank.
- Col 0 is the a-file, col 7 is the h-file.
- White pawns move toward row 0, Black pawns move toward row 7.

You will receive the board, the side to move and the complete list of legal moves.
Pick exactly one move from that list.

Reply with a single JSON object and nothing else:
{"from": [row, col], "to": [row, col]}"#
    }

    /// 棋盘文本网格：白方大写、黑方小写、空格为 '.'
    pub fn format_board(board: &Board) -> String {
        let mut result = String::from("   ");
        for col in 0..BOARD_SIZE {
            result.push_str(&format!(" {}", col));
        }
        result.push('\n');

        for (row, squares) in board.rows().enumerate() {
            result.push_str(&format!("{:>2} ", row));
            for square in squares {
                let ch = square.map(|p| p.to_char()).unwrap_or('.');
                result.push(' ');
                result.push(ch);
            }
            result.push('\n');
        }

        result
    }

    /// 合法走法列表（JSON 数组）
    pub fn format_legal_moves(legal_moves: &[Move]) -> String {
        let items: Vec<String> = legal_moves.iter().map(Move::to_json).collect();
        format!("[{}]", items.join(", "))
    }

    /// 生成走法请求提示，历史只保留最近 `history_limit` 条
    pub fn move_request_prompt(
        turn: Color,
        board: &Board,
        legal_moves: &[Move],
        history: &[String],
        history_limit: usize,
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str("Current board (uppercase = White, lowercase = Black, '.' = empty):\n");
        prompt.push_str(&Self::format_board(board));
        prompt.push('\n');

        prompt.push_str(&format!("Side to move: {}\n", turn));

        let skip = history.len().saturating_sub(history_limit);
        let recent = &history[skip..];
        if !recent.is_empty() {
            prompt.push_str(&format!("Recent moves: {}\n", recent.join(", ")));
        }
        prompt.push('\n');

        prompt.push_str(&format!(
            "Legal moves ({}):\n{}\n\n",
            legal_moves.len(),
            Self::format_legal_moves(legal_moves)
        ));

        prompt.push_str(r#"Choose one legal move and answer only with {"from": [row, col], "to": [row, col]}."#);

        prompt
    }

    /// 纠错提示：附上一轮的原始回复
    pub fn correction_prompt(attempt: u32, last_response: &str) -> String {
        format!(
            "\n\nAttempt {} failed. Your previous reply was:\n{}\n\n\
             That reply was not a legal move from the list, or it could not be parsed. \
             Pick a move that appears exactly in the legal moves list and reply with only \
             the JSON object {{\"from\": [row, col], \"to\": [row, col]}}.",
            attempt,
            last_response.trim()
        )
    }

    /// 估算消息 token 数：每条约 字符数/4，至少 1
    pub fn estimate_tokens(messages: &[&str]) -> u64 {
        messages
            .iter()
            .map(|m| m.chars().count().div_ceil(CHARS_PER_TOKEN).max(1) as u64)
            .sum()
    }

    /// 单次调用的准入估算：提示估算 + 补全预留
    pub fn estimate_turn_cost(system: &str, user: &str, completion_allowance: u32) -> u64 {
        Self::estimate_tokens(&[system, user]) + completion_allowance as u64
    }
}
