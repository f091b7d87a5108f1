use std::sync::Arc;

use anyhow::{Context, Result};
use chess_arena::{MatchRunner, MatchStorage, Players, TurnService};
use chess_llm::{HttpBackend, OrchestratorConfig};
use protocol::{Color, DEFAULT_MAX_PLIES};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("chess_arena=debug".parse()?)
            .add_directive("chess_llm=info".parse()?))
        .init();

    let storage = match std::env::var("ARENA_SAVE_DIR") {
        Ok(dir) if !dir.trim().is_empty() => MatchStorage::with_dir(dir.trim())?,
        _ => MatchStorage::new()?,
    };

    // `chess-arena list`：列出已保存的对局
    if std::env::args().nth(1).as_deref() == Some("list") {
        return list_saved(&storage);
    }

    info!("LLM chess arena starting...");

    let players = Players::from_env()?;
    let config = OrchestratorConfig::from_env();
    let max_plies = match std::env::var("ARENA_MAX_PLIES") {
        Ok(v) => v
            .trim()
            .parse::<u32>()
            .with_context(|| format!("ARENA_MAX_PLIES must be a positive integer, got '{}'", v))?,
        Err(_) => DEFAULT_MAX_PLIES,
    };

    info!(
        "Policy: {:?}, rate limits: {} requests / {} tokens per {:?}",
        config.policy, config.rate_limits.max_requests, config.rate_limits.max_tokens, config.rate_limits.window
    );

    // 连通性检查只做提示，不阻止对局
    let probe = HttpBackend::new(config.timeout_secs)?;
    for color in [Color::White, Color::Black] {
        let provider = players.get(color).provider().with_env_key();
        if let Err(e) = probe.health_check(&provider).await {
            warn!("{} provider check failed: {:#}", color, e);
        }
    }

    let service = Arc::new(TurnService::new(config)?);
    let runner = MatchRunner::new(service, players).with_max_plies(max_plies);

    let record = runner.run().await;
    info!(
        "Match finished: {:?} after {} plies (fallbacks: white {}, black {})",
        record.metadata.result,
        record.moves.len(),
        record.fallback_count(Color::White),
        record.fallback_count(Color::Black)
    );

    let match_id = storage.save_match(&record)?;
    info!("Record saved to {:?}", storage.matches_directory().join(match_id));

    Ok(())
}

fn list_saved(storage: &MatchStorage) -> Result<()> {
    let matches = storage.list_matches()?;
    info!("{} saved matches in {:?}", matches.len(), storage.matches_directory());

    for saved in matches {
        let result = saved
            .result
            .as_ref()
            .map_or_else(|| "unfinished".to_string(), |r| format!("{:?}", r));
        println!(
            "{}  {}  {} plies  {}  [{}]",
            saved.started_at.format("%Y-%m-%d %H:%M:%S"),
            saved.display_name(),
            saved.move_count,
            result,
            saved.match_id
        );
    }

    Ok(())
}
