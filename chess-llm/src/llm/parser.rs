//! LLM 走法提取器
//!
//! 从模型的自由文本回复中尽力解析出一个走法。模型可能把 JSON 包在说明文字、
//! markdown 代码块里，也可能因为 token 上限在数组中间被截断。按以下顺序逐级降级，
//! 第一个成功的结果即返回：
//!
//! 1. 去掉 `<think>` 推理块与首尾的代码块标记
//! 2. 解析平衡的 `{...}` 对象，优先同时包含 `from` 与 `to` 的那个
//! 3. 修复被截断的 `"to": [r,` 对象
//! 4. 正则匹配 `"from":[r,c]` 与 `"to":[r,...]`
//! 5. 取文本中前四个 0-7 的整数（至少三个）
//!
//! JSON 对象解析成功但坐标越界或非数字时直接返回 None，不再进入后续兜底。

use std::sync::LazyLock;

use protocol::{Move, MAX_COORD};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

static MENTIONS_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']?\bfrom\b["']?\s*:"#).expect("valid regex"));
static MENTIONS_TO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']?\bto\b["']?\s*:"#).expect("valid regex"));
static TO_ARRAY_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']?\bto\b["']?\s*:\s*\["#).expect("valid regex"));
static LEADING_NUMBERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(-?\d+)\s*(?:,\s*(-?\d+))?").expect("valid regex"));
static FROM_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?\bfrom\b["']?\s*:\s*\[\s*(-?\d+)\s*,\s*(-?\d+)"#).expect("valid regex")
});
static TO_PARTIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"["']?\bto\b["']?\s*:\s*\[\s*(-?\d+)(?:\s*,\s*(-?\d+))?"#).expect("valid regex")
});
static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// 对一个 JSON 值的解读结果
#[derive(Debug, PartialEq)]
enum Interpretation {
    /// 坐标完整且在棋盘内
    Found(Move),
    /// 有走法字段，但坐标越界或不是数字
    Rejected,
    /// 没有可识别的字段布局
    Unrecognized,
}

/// 走法提取器
pub struct MoveExtractor;

impl MoveExtractor {
    /// 从原始回复中提取走法
    ///
    /// 纯函数：不会 panic，无法解析时返回 None。
    pub fn extract(raw: &str) -> Option<Move> {
        let text = Self::clean_response(raw);
        if text.is_empty() {
            return None;
        }

        match Self::from_json_objects(&text) {
            Interpretation::Found(mv) => return Some(mv),
            Interpretation::Rejected => {
                debug!("Move object found but coordinates are invalid");
                return None;
            }
            Interpretation::Unrecognized => {}
        }

        match Self::repair_truncated(&text) {
            Interpretation::Found(mv) => return Some(mv),
            Interpretation::Rejected => return None,
            Interpretation::Unrecognized => {}
        }

        if let Some(mv) = Self::from_patterns(&text) {
            return Some(mv);
        }

        Self::from_bare_numbers(&text)
    }

    /// 去掉推理块与代码块标记
    fn clean_response(raw: &str) -> String {
        let mut text = raw;

        // deepseek-r1 等模型的 <think>...</think>
        if let Some(end) = text.find("</think>") {
            text = &text[end + "</think>".len()..];
        }

        Self::strip_code_fence(text).to_string()
    }

    /// 去掉首尾各一个 ``` 标记（可带语言标签）
    fn strip_code_fence(text: &str) -> &str {
        let mut text = text.trim();

        if let Some(rest) = text.strip_prefix("```") {
            let tag_len = rest
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            text = &rest[tag_len..];
        }
        if let Some(rest) = text.trim_end().strip_suffix("```") {
            text = rest;
        }

        text.trim()
    }

    /// 第 2 步：平衡对象解析与字段布局识别
    fn from_json_objects(text: &str) -> Interpretation {
        let objects = Self::balanced_objects(text);
        if objects.is_empty() {
            return Interpretation::Unrecognized;
        }

        let preferred = objects
            .iter()
            .copied()
            .find(|obj| MENTIONS_FROM.is_match(obj) && MENTIONS_TO.is_match(obj));

        let mut candidates: Vec<&str> = Vec::with_capacity(2);
        if let Some(obj) = preferred {
            candidates.push(obj);
        }
        if candidates.first() != objects.first() {
            candidates.push(objects[0]);
        }

        for candidate in candidates {
            if let Some(value) = Self::parse_lenient(candidate) {
                match Self::interpret(&value) {
                    Interpretation::Unrecognized => continue,
                    other => return other,
                }
            }
        }

        Interpretation::Unrecognized
    }

    /// 按出现顺序列出所有完整的 `{...}` 子串（跳过字符串内的括号）
    ///
    /// 单次扫描，用栈记录未闭合的 `{`；对象外的引号视为普通文字。
    fn balanced_objects(text: &str) -> Vec<&str> {
        let mut open: Vec<usize> = Vec::new();
        let mut spans: Vec<(usize, usize)> = Vec::new();
        let mut in_string = false;
        let mut escaped = false;

        for (idx, ch) in text.char_indices() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    in_string = false;
                }
                continue;
            }

            match ch {
                '"' if !open.is_empty() => in_string = true,
                '{' => open.push(idx),
                '}' => {
                    if let Some(start) = open.pop() {
                        spans.push((start, idx + 1));
                    }
                    // 对象全部闭合后，残留的引号状态不再延续
                    if open.is_empty() {
                        in_string = false;
                    }
                }
                _ => {}
            }
        }

        // 内层对象先闭合，按起始位置恢复出现顺序
        spans.sort_unstable_by_key(|&(start, _)| start);
        spans.into_iter().map(|(start, end)| &text[start..end]).collect()
    }

    /// 先按标准 JSON 解析，失败后把单引号换成双引号再试
    fn parse_lenient(candidate: &str) -> Option<Value> {
        serde_json::from_str::<Value>(candidate)
            .ok()
            .or_else(|| serde_json::from_str::<Value>(&candidate.replace('\'', "\"")).ok())
    }

    /// 识别字段布局
    fn interpret(value: &Value) -> Interpretation {
        let Some(obj) = value.as_object() else {
            return Interpretation::Unrecognized;
        };

        if let (Some(from), Some(to)) = (obj.get("from"), obj.get("to")) {
            return match (Self::coord_pair(from), Self::coord_pair(to)) {
                (Some((fr, fc)), Some((tr, tc))) => Self::build(fr, fc, tr, tc),
                _ => Interpretation::Rejected,
            };
        }

        if let Some(flat) = Self::flat_layout(obj) {
            return flat;
        }

        // 嵌套一层，如 {"move": {"from": ..., "to": ...}}
        for nested in obj.values().filter(|v| v.is_object()) {
            match Self::interpret(nested) {
                Interpretation::Unrecognized => continue,
                other => return other,
            }
        }

        Interpretation::Unrecognized
    }

    /// `{row, col, toRow, toCol}` 布局
    fn flat_layout(obj: &Map<String, Value>) -> Option<Interpretation> {
        let field = |names: &[&str]| names.iter().find_map(|n| obj.get(*n));

        let row = field(&["row", "fromRow", "from_row"])?;
        let col = field(&["col", "fromCol", "from_col"])?;
        let to_row = field(&["toRow", "to_row"])?;
        let to_col = field(&["toCol", "to_col"])?;

        let coords = [row, col, to_row, to_col].map(Self::coord);
        Some(match coords {
            [Some(fr), Some(fc), Some(tr), Some(tc)] => Self::build(fr, fc, tr, tc),
            _ => Interpretation::Rejected,
        })
    }

    /// `[r, c]`、`{row, col}` 或 `{"0": r, "1": c}`
    fn coord_pair(value: &Value) -> Option<(i64, i64)> {
        match value {
            Value::Array(items) if items.len() >= 2 => {
                Some((Self::coord(&items[0])?, Self::coord(&items[1])?))
            }
            Value::Object(obj) => {
                let row = obj.get("row").or_else(|| obj.get("0"))?;
                let col = obj.get("col").or_else(|| obj.get("1"))?;
                Some((Self::coord(row)?, Self::coord(col)?))
            }
            _ => None,
        }
    }

    /// 只接受整数值（含 6.0 这类浮点）
    fn coord(value: &Value) -> Option<i64> {
        if let Some(v) = value.as_i64() {
            return Some(v);
        }
        value
            .as_f64()
            .filter(|v| v.fract() == 0.0 && v.is_finite())
            .map(|v| v as i64)
    }

    fn build(fr: i64, fc: i64, tr: i64, tc: i64) -> Interpretation {
        match Move::from_coords(fr, fc, tr, tc) {
            Some(mv) => Interpretation::Found(mv),
            None => Interpretation::Rejected,
        }
    }

    /// 第 3 步：`"to": [r,` 被截断时补全括号，缺失的第二个坐标补 0
    fn repair_truncated(text: &str) -> Interpretation {
        let Some(open) = TO_ARRAY_OPEN.find(text) else {
            return Interpretation::Unrecognized;
        };
        let Some(start) = text[..open.start()].rfind('{') else {
            return Interpretation::Unrecognized;
        };

        let tail = &text[open.end()..];
        let repaired = if let Some(close) = tail.find(']') {
            // 数组完整，只缺对象的右括号
            format!("{}]}}", &text[start..open.end() + close])
        } else {
            let Some(caps) = LEADING_NUMBERS.captures(tail) else {
                return Interpretation::Unrecognized;
            };
            let first = &caps[1];
            let second = caps.get(2).map_or("0", |m| m.as_str());
            format!("{}{},{}]}}", &text[start..open.end()], first, second)
        };

        debug!("Repaired truncated move JSON: {}", repaired);

        match Self::parse_lenient(&repaired) {
            Some(value) => Self::interpret(&value),
            None => Interpretation::Unrecognized,
        }
    }

    /// 第 4 步：正则匹配坐标对
    fn from_patterns(text: &str) -> Option<Move> {
        let from = FROM_PAIR.captures(text)?;
        let to = TO_PARTIAL.captures(text)?;

        let fr: i64 = from[1].parse().ok()?;
        let fc: i64 = from[2].parse().ok()?;
        let tr: i64 = to[1].parse().ok()?;
        let tc: i64 = match to.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => {
                // 第二个坐标缺失时向后找下一个合法整数
                let after = to.get(0)?.end();
                Self::in_range_integers(&text[after..]).next()?
            }
        };

        Move::from_coords(fr, fc, tr, tc)
    }

    /// 第 5 步：文本中前四个 0-7 的整数，至少三个，缺失的第四个补 0
    fn from_bare_numbers(text: &str) -> Option<Move> {
        let nums: Vec<i64> = Self::in_range_integers(text).take(4).collect();
        if nums.len() < 3 {
            return None;
        }
        let to_col = nums.get(3).copied().unwrap_or(0);
        Move::from_coords(nums[0], nums[1], nums[2], to_col)
    }

    fn in_range_integers(text: &str) -> impl Iterator<Item = i64> + '_ {
        INTEGER
            .find_iter(text)
            .filter_map(|m| m.as_str().parse::<i64>().ok())
            .filter(|n| (0..=MAX_COORD as i64).contains(n))
    }
}
