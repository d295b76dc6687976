//! Application state: store, achievement engine, challenge source, live sessions.
//!
//! This module owns:
//!   - the SQLite store and the validated achievement catalog
//!   - the challenge generator (OpenAI when configured, otherwise the local bank)
//!   - the per-player session registry
//!
//! The selection policy generates fresh challenges via OpenAI when available and reports
//! a generation failure otherwise. Without an API key it serves the TOML bank plus the
//! built-in seeds, avoiding an immediate repeat per difficulty.

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::achievements::{build_catalog, AchievementEngine, CatalogError};
use crate::config::{load_config_from_env, AppConfig, ChallengeCfg, GameRules, Prompts};
use crate::domain::{Challenge, ChallengeSource, Difficulty};
use crate::error::GameError;
use crate::game::{ChallengeProvider, Clock, GameSession, SystemClock};
use crate::openai::OpenAI;
use crate::seeds::{default_achievement_rows, seed_challenges};
use crate::store::Store;

pub type SharedSession = Arc<Mutex<GameSession>>;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub engine: AchievementEngine,
    pub challenges: Arc<dyn ChallengeProvider>,
    pub rules: GameRules,
    pub clock: Arc<dyn Clock>,
    sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
}

impl AppState {
    /// Build state from env: load config, open the store, validate and sync the catalog,
    /// init the challenge generator.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> anyhow::Result<Self> {
        let cfg = load_config_from_env().unwrap_or_default();

        let db_path = std::env::var("DATABASE_PATH").unwrap_or_else(|_| "codequest.db".into());
        let store = Store::open(Path::new(&db_path)).context("opening store")?;
        info!(target: "codequest_backend", %db_path, "Store opened");

        let engine = engine_from_config(&cfg)?;
        store.sync_catalog(engine.catalog())?;

        let openai = OpenAI::from_env();
        if let Some(oa) = &openai {
            info!(target: "codequest_backend", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
        } else {
            info!(target: "codequest_backend", "OpenAI disabled (no OPENAI_API_KEY). Using local challenge bank.");
        }
        let generator = ChallengeGenerator::new(openai, cfg.prompts.clone(), &cfg.challenges);

        Ok(Self::with_parts(store, engine, Arc::new(generator), cfg.game, Arc::new(SystemClock)))
    }

    pub fn with_parts(
        store: Store,
        engine: AchievementEngine,
        challenges: Arc<dyn ChallengeProvider>,
        rules: GameRules,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            engine,
            challenges,
            rules,
            clock,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The player's session, created in the `Menu` phase on first use.
    pub async fn session(&self, user_id: &str) -> SharedSession {
        if let Some(s) = self.sessions.read().await.get(user_id) {
            return s.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(GameSession::new(self.rules, self.clock.clone()))))
            .clone()
    }

    pub async fn existing_session(&self, user_id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(user_id).cloned()
    }
}

/// Config rows replace the default catalog when present. A configured catalog with
/// duplicate names is rejected as a whole in favor of the built-in one.
fn engine_from_config(cfg: &AppConfig) -> Result<AchievementEngine, CatalogError> {
    if !cfg.achievements.is_empty() {
        match AchievementEngine::new(build_catalog(cfg.achievements.clone())) {
            Ok(engine) => {
                info!(target: "achievements", count = engine.catalog().len(), "Using configured achievement catalog");
                return Ok(engine);
            }
            Err(e) => {
                error!(target: "achievements", error = %e, "Configured catalog rejected; using built-in catalog");
            }
        }
    }
    AchievementEngine::new(build_catalog(default_achievement_rows()))
}

/// Challenge source backed by OpenAI or, without a key, by the local bank.
pub struct ChallengeGenerator {
    openai: Option<OpenAI>,
    prompts: Prompts,
    by_diff: HashMap<Difficulty, Vec<Challenge>>,
    last_by_diff: RwLock<HashMap<Difficulty, String>>,
}

impl ChallengeGenerator {
    pub fn new(openai: Option<OpenAI>, prompts: Prompts, bank: &[ChallengeCfg]) -> Self {
        let mut by_diff: HashMap<Difficulty, Vec<Challenge>> = HashMap::new();

        for cc in bank {
            if cc.code.trim().is_empty() || cc.solution.trim().is_empty() {
                error!(target: "challenge", title = %cc.title, "Skipping bank item: missing code or solution.");
                continue;
            }
            let ch = Challenge {
                id: cc.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
                title: cc.title.clone(),
                buggy_code: cc.code.clone(),
                solution_code: cc.solution.clone(),
                explanation: cc.explanation.clone(),
                category: cc.category.clone(),
                difficulty: cc.difficulty,
                hints: cc.hints.clone(),
                source: ChallengeSource::LocalBank,
            };
            by_diff.entry(ch.difficulty).or_default().push(ch);
        }
        for c in seed_challenges() {
            by_diff.entry(c.difficulty).or_default().push(c);
        }

        for (diff, items) in &by_diff {
            let bank = items.iter().filter(|c| c.source == ChallengeSource::LocalBank).count();
            info!(target: "challenge", difficulty = diff.as_str(), local_bank = bank, seed = items.len() - bank, "Startup challenge inventory");
        }

        Self { openai, prompts, by_diff, last_by_diff: RwLock::new(HashMap::new()) }
    }

    async fn from_bank(&self, difficulty: Difficulty) -> Option<Challenge> {
        let items = self.by_diff.get(&difficulty)?;
        let last = self.last_by_diff.read().await.get(&difficulty).cloned();
        let chosen = pick_fresh(items, last.as_deref())?;
        self.last_by_diff.write().await.insert(difficulty, chosen.id.clone());
        Some(chosen)
    }
}

/// Random item other than `last`; falls back to the first item when nothing else exists.
fn pick_fresh(items: &[Challenge], last: Option<&str>) -> Option<Challenge> {
    let fresh: Vec<&Challenge> = items.iter().filter(|c| Some(c.id.as_str()) != last).collect();
    match fresh.choose(&mut rand::thread_rng()) {
        Some(c) => Some((*c).clone()),
        None => items.first().cloned(),
    }
}

#[async_trait]
impl ChallengeProvider for ChallengeGenerator {
    #[instrument(level = "info", skip(self))]
    async fn request_challenge(&self, level: u32) -> Result<Challenge, GameError> {
        let difficulty = Difficulty::for_level(level);
        if let Some(oa) = &self.openai {
            return match oa.generate_code_challenge(&self.prompts, level).await {
                Ok(c) => {
                    info!(target: "challenge", level, chosen = %c.id, source = "openai_generated_new", "Generated fresh challenge");
                    Ok(c)
                }
                Err(e) => {
                    error!(target: "challenge", level, error = %e, "OpenAI generation failed");
                    Err(GameError::GenerationFailure(e))
                }
            };
        }

        match self.from_bank(difficulty).await {
            Some(c) => {
                info!(target: "challenge", level, chosen = %c.id, source = "local_pool", "Serving bank challenge");
                Ok(c)
            }
            None => {
                warn!(target: "challenge", level, difficulty = difficulty.as_str(), "No challenge available");
                Err(GameError::GenerationFailure(format!("no {} challenge available", difficulty.as_str())))
            }
        }
    }
}
