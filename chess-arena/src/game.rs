//! 对局控制
//!
//! 两个模型轮流走子，直到一方无棋可走、王被吃、达到半回合上限或回合出错（严格策略）。
//! 暂停只在回合之间生效，进行中的回合会先完成。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::{
    Board, Color, GameRecord, GameResult, MoveGenerator, MoveRecord, Notation, PieceType,
    DEFAULT_MAX_PLIES,
};
use tracing::{info, warn};

use crate::player::Players;
use crate::server::TurnService;

/// 暂停时的轮询间隔
const PAUSE_POLL: Duration = Duration::from_millis(20);

/// 对局执行器
pub struct MatchRunner {
    service: Arc<TurnService>,
    players: Players,
    board: Board,
    max_plies: u32,
    paused: Arc<AtomicBool>,
}

impl MatchRunner {
    pub fn new(service: Arc<TurnService>, players: Players) -> Self {
        Self {
            service,
            players,
            board: Board::initial(),
            max_plies: DEFAULT_MAX_PLIES,
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 从指定局面开始（白方先走）
    pub fn with_board(mut self, board: Board) -> Self {
        self.board = board;
        self
    }

    pub fn with_max_plies(mut self, max_plies: u32) -> Self {
        self.max_plies = max_plies;
        self
    }

    /// 暂停开关，可在其他任务中设置
    pub fn pause_handle(&self) -> Arc<AtomicBool> {
        self.paused.clone()
    }

    async fn wait_while_paused(&self) {
        if self.paused.load(Ordering::SeqCst) {
            info!("Match paused");
            while self.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(PAUSE_POLL).await;
            }
            info!("Match resumed");
        }
    }

    /// 运行整局并返回记录
    pub async fn run(&self) -> GameRecord {
        let mut record = GameRecord::new(self.players.white.side_info(), self.players.black.side_info());
        let mut board = self.board.clone();
        let mut history: Vec<String> = Vec::new();
        let mut turn = Color::White;

        info!(
            "Match started: {} vs {}",
            self.players.white.display_name(),
            self.players.black.display_name()
        );

        for ply in 1..=self.max_plies {
            self.wait_while_paused().await;

            let legal = MoveGenerator::generate(&board, turn);
            if legal.is_empty() {
                info!("{} has no legal moves", turn);
                record.finish(GameResult::NoLegalMoves { side: turn });
                return record;
            }

            let player = self.players.get(turn);
            let request = player.turn_request(&board, legal, &history);

            let response = match self.service.handle_turn(request).await {
                Ok(response) => response,
                Err(payload) => {
                    warn!("Match aborted on ply {}: {}", ply, payload.error);
                    record.finish(GameResult::Aborted {
                        side: turn,
                        error: payload.error,
                    });
                    return record;
                }
            };

            let mv = response.mv;
            let notation = Notation::history_entry(&board, &mv);
            let captured = board.move_piece(mv.from, mv.to);

            info!(
                "Ply {}: {} plays {}{}",
                ply,
                player.display_name(),
                notation,
                if response.fallback { " (random fallback)" } else { "" }
            );

            record.add_move(MoveRecord {
                ply,
                side: turn,
                mv,
                notation: notation.clone(),
                attempts_used: response.attempts_used.unwrap_or(0),
                fallback: response.fallback,
                note: response.note,
            });
            history.push(notation);

            if captured.is_some_and(|p| p.piece_type == PieceType::King) {
                info!("{} captured the king", turn);
                record.finish(GameResult::KingCaptured { winner: turn });
                return record;
            }

            turn = turn.opponent();
        }

        info!("Ply limit {} reached", self.max_plies);
        record.finish(GameResult::PlyLimit {
            plies: self.max_plies,
        });
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerConfig;
    use crate::server::ModelCatalog;
    use async_trait::async_trait;
    use chess_llm::{
        FailurePolicy, OrchestratorConfig, ProviderConfig, ProviderError, RateLimiter,
        ScriptedBackend, TurnOrchestrator,
    };
    use protocol::{ModelInfo, Piece, Position};

    struct NoCatalog;

    #[async_trait]
    impl ModelCatalog for NoCatalog {
        async fn list_models(&self, _config: &ProviderConfig) -> Result<Vec<ModelInfo>, ProviderError> {
            Ok(Vec::new())
        }
    }

    fn players() -> Players {
        Players::new(
            PlayerConfig::new(Color::White, "white-model").with_api_key("w"),
            PlayerConfig::new(Color::Black, "black-model").with_api_key("b"),
        )
    }

    fn service(backend: Arc<ScriptedBackend>, config: OrchestratorConfig) -> Arc<TurnService> {
        let orchestrator = TurnOrchestrator::with_limiter(backend, Arc::new(RateLimiter::new()), config);
        Arc::new(TurnService::with_parts(orchestrator, Arc::new(NoCatalog)))
    }

    fn place(board: &mut Board, row: u8, col: u8, piece_type: PieceType, color: Color) {
        board.set(Position::new_unchecked(row, col), Some(Piece::new(piece_type, color)));
    }

    #[tokio::test]
    async fn test_ply_limit_with_fallbacks() {
        let backend = Arc::new(ScriptedBackend::default());
        let runner = MatchRunner::new(service(backend.clone(), OrchestratorConfig::default()), players())
            .with_max_plies(4);

        let record = runner.run().await;
        assert_eq!(record.moves.len(), 4);
        assert_eq!(record.metadata.result, Some(GameResult::PlyLimit { plies: 4 }));
        assert_eq!(record.fallback_count(Color::White), 2);
        assert_eq!(record.fallback_count(Color::Black), 2);
        assert_eq!(record.moves[1].side, Color::Black);
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn test_history_is_passed_to_next_turn() {
        let backend = Arc::new(ScriptedBackend::with_texts([
            r#"{"from":[6,4],"to":[4,4]}"#,
            r#"{"from":[1,4],"to":[3,4]}"#,
        ]));
        let runner = MatchRunner::new(service(backend.clone(), OrchestratorConfig::default()), players())
            .with_max_plies(2);

        let record = runner.run().await;
        assert_eq!(record.moves[0].notation, "Pe2-e4");
        assert_eq!(record.moves[1].notation, "Pe7-e5");
        assert!(!record.moves[0].fallback);

        let prompts = backend.prompts();
        assert!(!prompts[0].user.contains("Recent moves"));
        assert!(prompts[1].user.contains("Recent moves: Pe2-e4"));
        assert_eq!(prompts[1].model, "black-model");
    }

    #[tokio::test]
    async fn test_king_capture_ends_match() {
        let mut board = Board::empty();
        place(&mut board, 7, 0, PieceType::Rook, Color::White);
        place(&mut board, 7, 7, PieceType::King, Color::White);
        place(&mut board, 0, 0, PieceType::King, Color::Black);

        let backend = Arc::new(ScriptedBackend::with_texts([r#"{"from":[7,0],"to":[0,0]}"#]));
        let runner = MatchRunner::new(service(backend, OrchestratorConfig::default()), players())
            .with_board(board);

        let record = runner.run().await;
        assert_eq!(record.moves.len(), 1);
        assert_eq!(record.moves[0].notation, "Ra1xa8");
        assert_eq!(
            record.metadata.result,
            Some(GameResult::KingCaptured { winner: Color::White })
        );
    }

    #[tokio::test]
    async fn test_no_legal_moves_ends_match() {
        let mut board = Board::empty();
        place(&mut board, 6, 0, PieceType::Pawn, Color::White);
        place(&mut board, 5, 0, PieceType::Pawn, Color::Black);
        place(&mut board, 0, 4, PieceType::King, Color::Black);

        let backend = Arc::new(ScriptedBackend::default());
        let runner = MatchRunner::new(service(backend.clone(), OrchestratorConfig::default()), players())
            .with_board(board);

        let record = runner.run().await;
        assert!(record.moves.is_empty());
        assert_eq!(
            record.metadata.result,
            Some(GameResult::NoLegalMoves { side: Color::White })
        );
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_strict_error_aborts_match() {
        let backend = Arc::new(ScriptedBackend::new([Err(ProviderError::Http {
            status: 401,
            message: "Invalid API key".to_string(),
            is_rate_limit: false,
        })]));
        let config = OrchestratorConfig {
            policy: FailurePolicy::Strict,
            ..OrchestratorConfig::default()
        };
        let runner = MatchRunner::new(service(backend, config), players());

        let record = runner.run().await;
        assert!(record.moves.is_empty());
        match record.metadata.result {
            Some(GameResult::Aborted { side, error }) => {
                assert_eq!(side, Color::White);
                assert!(error.contains("Invalid API key"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pause_holds_next_turn() {
        let backend = Arc::new(ScriptedBackend::default());
        let runner = MatchRunner::new(service(backend.clone(), OrchestratorConfig::default()), players())
            .with_max_plies(2);
        let paused = runner.pause_handle();
        paused.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.call_count(), 0);

        paused.store(false, Ordering::SeqCst);
        let record = handle.await.unwrap();
        assert_eq!(record.moves.len(), 2);
    }
}
