//! 对局记录存储
//!
//! 以 JSON 文件保存每局的完整记录，默认目录为 `<数据目录>/chess-arena/matches`。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use protocol::{GameRecord, GameResult};

/// 存储管理器
pub struct MatchStorage {
    matches_dir: PathBuf,
}

impl MatchStorage {
    /// 使用默认目录
    pub fn new() -> Result<Self> {
        Self::with_dir(default_matches_directory()?)
    }

    /// 使用指定目录，不存在时创建
    pub fn with_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let matches_dir = dir.into();

        if !matches_dir.exists() {
            fs::create_dir_all(&matches_dir)
                .with_context(|| format!("Failed to create match directory: {:?}", matches_dir))?;
        }

        Ok(Self { matches_dir })
    }

    /// 保存对局，返回文件名（不含路径）
    pub fn save_match(&self, record: &GameRecord) -> Result<String> {
        let filename = generate_filename(
            &record.metadata.started_at,
            &record.metadata.white.model,
            &record.metadata.black.model,
        );
        let filepath = self.matches_dir.join(&filename);

        let json_content = record.to_json().context("Failed to serialize match record")?;
        fs::write(&filepath, json_content)
            .with_context(|| format!("Failed to write file: {:?}", filepath))?;

        tracing::info!("Match saved: {}", filename);
        Ok(filename)
    }

    /// 加载对局
    pub fn load_match(&self, match_id: &str) -> Result<GameRecord> {
        let filepath = self.matches_dir.join(match_id);

        if !filepath.exists() {
            anyhow::bail!("Match file not found: {}", match_id);
        }

        let content = fs::read_to_string(&filepath)
            .with_context(|| format!("Failed to read file: {:?}", filepath))?;

        GameRecord::from_json(&content).context("Failed to parse match record")
    }

    /// 列出所有对局，按开始时间倒序
    pub fn list_matches(&self) -> Result<Vec<SavedMatchInfo>> {
        let mut matches = Vec::new();

        let entries = fs::read_dir(&self.matches_dir)
            .with_context(|| format!("Failed to read match directory: {:?}", self.matches_dir))?;

        for entry in entries {
            let path = entry.context("Failed to read directory entry")?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };

            match self.load_match(filename) {
                Ok(record) => matches.push(SavedMatchInfo {
                    match_id: filename.to_string(),
                    white_model: record.metadata.white.model,
                    black_model: record.metadata.black.model,
                    started_at: record.metadata.started_at,
                    move_count: record.moves.len(),
                    result: record.metadata.result,
                }),
                Err(e) => {
                    tracing::warn!("Skipping unreadable match file {}: {}", filename, e);
                }
            }
        }

        matches.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(matches)
    }

    pub fn matches_directory(&self) -> &Path {
        &self.matches_dir
    }
}

/// 已保存对局的摘要
#[derive(Debug, Clone)]
pub struct SavedMatchInfo {
    /// 对局 ID（文件名）
    pub match_id: String,
    pub white_model: String,
    pub black_model: String,
    pub started_at: DateTime<Utc>,
    pub move_count: usize,
    pub result: Option<GameResult>,
}

impl SavedMatchInfo {
    pub fn display_name(&self) -> String {
        format!("{} vs {}", self.white_model, self.black_model)
    }
}

/// 跨平台默认目录
fn default_matches_directory() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Cannot determine the user data directory")?;
    Ok(data_dir.join("chess-arena").join("matches"))
}

fn generate_filename(timestamp: &DateTime<Utc>, white: &str, black: &str) -> String {
    format!(
        "{}_{}_vs_{}.json",
        timestamp.format("%Y%m%d_%H%M%S"),
        sanitize_filename(white),
        sanitize_filename(black)
    )
}

/// 模型名里常见 `org/model`，斜杠等字符替换为 `_`
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Color, Move, MoveRecord, Position, SideInfo};
    use tempfile::TempDir;

    fn create_test_storage() -> (MatchStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = MatchStorage::with_dir(temp_dir.path().join("matches")).unwrap();
        (storage, temp_dir)
    }

    fn record(white: &str, black: &str) -> GameRecord {
        let side = |model: &str| SideInfo {
            model: model.to_string(),
            base_url: None,
        };
        GameRecord::new(side(white), side(black))
    }

    #[test]
    fn test_save_and_load_match() {
        let (storage, _temp_dir) = create_test_storage();

        let mut rec = record("openai/gpt-4o-mini", "gemini-2.5-flash");
        rec.add_move(MoveRecord {
            ply: 1,
            side: Color::White,
            mv: Move::new(Position::new_unchecked(6, 4), Position::new_unchecked(4, 4)),
            notation: "Pe2-e4".to_string(),
            attempts_used: 1,
            fallback: false,
            note: None,
        });
        rec.finish(GameResult::PlyLimit { plies: 1 });

        let id = storage.save_match(&rec).unwrap();
        assert!(id.contains("openai_gpt-4o-mini_vs_gemini-2.5-flash"));

        let loaded = storage.load_match(&id).unwrap();
        assert_eq!(loaded.moves.len(), 1);
        assert_eq!(loaded.metadata.result, Some(GameResult::PlyLimit { plies: 1 }));
    }

    #[test]
    fn test_list_matches_newest_first() {
        let (storage, _temp_dir) = create_test_storage();

        let mut first = record("a", "b");
        first.metadata.started_at = DateTime::parse_from_rfc3339("2026-01-09T15:30:22Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut second = record("c", "d");
        second.metadata.started_at = DateTime::parse_from_rfc3339("2026-02-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let first_id = storage.save_match(&first).unwrap();
        storage.save_match(&second).unwrap();
        fs::write(storage.matches_directory().join("broken.json"), "{").unwrap();
        fs::write(storage.matches_directory().join("notes.txt"), "ignored").unwrap();

        let list = storage.list_matches().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].display_name(), "c vs d");
        assert_eq!(list[1].match_id, first_id);
        assert!(storage.load_match("missing.json").is_err());
    }

    #[test]
    fn test_generate_filename() {
        let timestamp = DateTime::parse_from_rfc3339("2026-01-09T15:30:22Z")
            .unwrap()
            .with_timezone(&Utc);
        let filename = generate_filename(&timestamp, "meta-llama/llama-3.1", "x:y");
        assert_eq!(filename, "20260109_153022_meta-llama_llama-3.1_vs_x_y.json");
    }
}
