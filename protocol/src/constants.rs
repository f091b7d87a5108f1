//! 协议常量定义

/// 棋盘边长（行数与列数）
pub const BOARD_SIZE: usize = 8;

/// 坐标最大值
pub const MAX_COORD: u8 = (BOARD_SIZE - 1) as u8;

/// 提示中保留的最近走法条数
pub const HISTORY_LIMIT: usize = 10;

/// 对局默认最大半回合数
pub const DEFAULT_MAX_PLIES: u32 = 200;
