//! SQLite persistence: players, finished games, the achievement catalog, unlocks and
//! follows.
//!
//! The store recomputes a player's aggregates (`UserHistory`) inside the same
//! transaction that records a game, and the `(user_id, achievement_name)` UNIQUE
//! constraint backs up the engine's own held-name check.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::achievements::AchievementDefinition;
use crate::domain::{Difficulty, GameResult, UserHistory};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT,
    image TEXT,
    bio TEXT,
    created_at TEXT NOT NULL,
    high_score INTEGER NOT NULL DEFAULT 0,
    total_games INTEGER NOT NULL DEFAULT 0,
    total_hints INTEGER NOT NULL DEFAULT 0,
    average_time REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS games (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    score INTEGER NOT NULL,
    challenges_count INTEGER NOT NULL,
    hints_used INTEGER NOT NULL,
    time_spent INTEGER NOT NULL,
    difficulty TEXT NOT NULL,
    streak INTEGER NOT NULL,
    completed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_games_user ON games(user_id, completed_at);

CREATE TABLE IF NOT EXISTS achievements (
    name TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    icon TEXT NOT NULL,
    category TEXT NOT NULL,
    condition TEXT NOT NULL,
    points INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_achievements (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    achievement_name TEXT NOT NULL REFERENCES achievements(name) ON DELETE CASCADE,
    unlocked_at TEXT NOT NULL,
    UNIQUE (user_id, achievement_name)
);

CREATE TABLE IF NOT EXISTS follows (
    follower_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    following_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    PRIMARY KEY (follower_id, following_id)
);
"#;

const LEADERBOARD_LIMIT: u32 = 100;
const RECENT_GAMES: u32 = 10;

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub id: String,
    pub username: String,
    pub score: u32,
    pub challenges_completed: u32,
    pub average_time: u32,
    pub hints_used: u32,
    pub last_played: String,
    pub difficulty: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnlockedAchievementRecord {
    pub name: String,
    pub description: String,
    pub icon: String,
    pub category: String,
    pub points: u32,
    pub unlocked_at: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub id: String,
    pub score: u32,
    pub difficulty: String,
    pub completed_at: String,
    pub challenges_count: u32,
    pub hints_used: u32,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
    pub created_at: String,
    pub stats: UserHistory,
    pub achievements: Vec<UnlockedAchievementRecord>,
    pub followers: u32,
    pub following: u32,
    pub is_following: bool,
    pub recent_games: Vec<GameRecord>,
}

/// Database wrapper shared by all handlers.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create db dir: {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open db: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL).context("Failed to apply schema")?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("store lock poisoned"))
    }

    /// Create the player row on first sight. An existing row keeps its name unless it has none.
    pub fn ensure_user(&self, id: &str, name: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = COALESCE(users.name, excluded.name)",
            params![id, name, ts(Utc::now())],
        )
        .with_context(|| format!("Failed to upsert user {id}"))?;
        Ok(())
    }

    pub fn user_exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Record a finished game and return the player's refreshed aggregates.
    #[instrument(level = "debug", skip(self, result), fields(%user_id, score = result.score))]
    pub fn save_game(&self, user_id: &str, result: &GameResult, at: DateTime<Utc>) -> Result<UserHistory> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO games (id, user_id, score, challenges_count, hints_used, time_spent, difficulty, streak, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                Uuid::new_v4().to_string(),
                user_id,
                result.score,
                result.challenges_completed,
                result.hints_used,
                result.time_spent_secs,
                result.difficulty.as_str(),
                result.streak,
                ts(at),
            ],
        )
        .with_context(|| format!("Failed to insert game for {user_id}"))?;

        let history = tx.query_row(
            "SELECT COUNT(*), COALESCE(MAX(score), 0), COALESCE(SUM(hints_used), 0), COALESCE(AVG(time_spent), 0.0)
             FROM games WHERE user_id = ?1",
            [user_id],
            |r| {
                Ok(UserHistory {
                    total_games: r.get(0)?,
                    high_score: r.get(1)?,
                    total_hints: r.get(2)?,
                    average_time_secs: r.get(3)?,
                })
            },
        )?;
        tx.execute(
            "UPDATE users SET high_score = ?2, total_games = ?3, total_hints = ?4, average_time = ?5 WHERE id = ?1",
            params![user_id, history.high_score, history.total_games, history.total_hints, history.average_time_secs],
        )?;
        tx.commit()?;
        debug!(target: "store", %user_id, total_games = history.total_games, high_score = history.high_score, "Game saved");
        Ok(history)
    }

    pub fn history(&self, user_id: &str) -> Result<UserHistory> {
        let conn = self.conn()?;
        let h = conn
            .query_row(
                "SELECT total_games, high_score, total_hints, average_time FROM users WHERE id = ?1",
                [user_id],
                |r| {
                    Ok(UserHistory {
                        total_games: r.get(0)?,
                        high_score: r.get(1)?,
                        total_hints: r.get(2)?,
                        average_time_secs: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(h.unwrap_or_default())
    }

    /// Upsert every catalog row by name.
    pub fn sync_catalog(&self, catalog: &[AchievementDefinition]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for def in catalog {
            let condition = serde_json::to_string(&def.condition.to_row())?;
            tx.execute(
                "INSERT INTO achievements (name, description, icon, category, condition, points)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(name) DO UPDATE SET description = excluded.description, icon = excluded.icon,
                   category = excluded.category, condition = excluded.condition, points = excluded.points",
                params![def.name, def.description, def.icon, def.category, condition, def.points],
            )
            .with_context(|| format!("Failed to upsert achievement {}", def.name))?;
        }
        tx.commit()?;
        info!(target: "store", count = catalog.len(), "Achievement catalog synced");
        Ok(catalog.len())
    }

    pub fn unlocked_names(&self, user_id: &str) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT achievement_name FROM user_achievements WHERE user_id = ?1")?;
        let names = stmt
            .query_map([user_id], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(names)
    }

    /// Insert unlocks, skipping pairs that already exist. Returns the names actually inserted.
    pub fn record_unlocks(&self, user_id: &str, defs: &[&AchievementDefinition], at: DateTime<Utc>) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = Vec::new();
        for def in defs {
            let n = tx.execute(
                "INSERT OR IGNORE INTO user_achievements (user_id, achievement_name, unlocked_at) VALUES (?1, ?2, ?3)",
                params![user_id, def.name, ts(at)],
            )?;
            if n > 0 {
                inserted.push(def.name.clone());
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Unlocked achievements, newest first.
    pub fn user_achievements(&self, user_id: &str) -> Result<Vec<UnlockedAchievementRecord>> {
        let conn = self.conn()?;
        query_user_achievements(&conn, user_id)
    }

    /// Players with at least one game (of `difficulty`, when given), best first.
    pub fn leaderboard(&self, difficulty: Option<Difficulty>) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.conn()?;
        let filter = difficulty.map(|d| d.as_str());
        let label = filter.unwrap_or("All").to_string();
        let mut stmt = conn.prepare(
            "SELECT u.id, u.name, u.high_score, u.total_games, u.total_hints, u.average_time,
                    (SELECT MAX(g.completed_at) FROM games g
                      WHERE g.user_id = u.id AND (?1 IS NULL OR g.difficulty = ?1)) AS last_played
             FROM users u
             WHERE EXISTS (SELECT 1 FROM games g WHERE g.user_id = u.id AND (?1 IS NULL OR g.difficulty = ?1))
             ORDER BY u.high_score DESC, u.total_games DESC, u.id ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![filter, LEADERBOARD_LIMIT], |r| {
                let name: Option<String> = r.get(1)?;
                let average: f64 = r.get(5)?;
                Ok(LeaderboardEntry {
                    rank: 0,
                    id: r.get(0)?,
                    username: name.unwrap_or_else(|| "Anonymous Player".into()),
                    score: r.get(2)?,
                    challenges_completed: r.get(3)?,
                    average_time: average.round() as u32,
                    hints_used: r.get(4)?,
                    last_played: r.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    difficulty: label.clone(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(i, mut e)| {
                e.rank = i as u32 + 1;
                e
            })
            .collect())
    }

    #[instrument(level = "debug", skip(self))]
    pub fn profile(&self, user_id: &str, viewer: Option<&str>) -> Result<Option<Profile>> {
        let conn = self.conn()?;
        let base = conn
            .query_row(
                "SELECT id, name, image, bio, created_at, total_games, high_score, total_hints, average_time
                 FROM users WHERE id = ?1",
                [user_id],
                |r| {
                    Ok(Profile {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        image: r.get(2)?,
                        bio: r.get(3)?,
                        created_at: r.get(4)?,
                        stats: UserHistory {
                            total_games: r.get(5)?,
                            high_score: r.get(6)?,
                            total_hints: r.get(7)?,
                            average_time_secs: r.get(8)?,
                        },
                        achievements: Vec::new(),
                        followers: 0,
                        following: 0,
                        is_following: false,
                        recent_games: Vec::new(),
                    })
                },
            )
            .optional()?;
        let Some(mut profile) = base else {
            return Ok(None);
        };

        profile.achievements = query_user_achievements(&conn, user_id)?;
        profile.followers = conn.query_row("SELECT COUNT(*) FROM follows WHERE following_id = ?1", [user_id], |r| r.get(0))?;
        profile.following = conn.query_row("SELECT COUNT(*) FROM follows WHERE follower_id = ?1", [user_id], |r| r.get(0))?;
        if let Some(viewer) = viewer {
            profile.is_following = conn
                .query_row(
                    "SELECT 1 FROM follows WHERE follower_id = ?1 AND following_id = ?2",
                    params![viewer, user_id],
                    |r| r.get::<_, i64>(0),
                )
                .optional()?
                .is_some();
        }

        let mut stmt = conn.prepare(
            "SELECT id, score, difficulty, completed_at, challenges_count, hints_used
             FROM games WHERE user_id = ?1 ORDER BY completed_at DESC, rowid DESC LIMIT ?2",
        )?;
        profile.recent_games = stmt
            .query_map(params![user_id, RECENT_GAMES], |r| {
                Ok(GameRecord {
                    id: r.get(0)?,
                    score: r.get(1)?,
                    difficulty: r.get(2)?,
                    completed_at: r.get(3)?,
                    challenges_count: r.get(4)?,
                    hints_used: r.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some(profile))
    }

    /// Follow `target` if not already following, otherwise unfollow.
    /// Returns the new following state.
    pub fn toggle_follow(&self, follower: &str, target: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
            params![follower, target],
        )?;
        if removed > 0 {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO follows (follower_id, following_id, created_at) VALUES (?1, ?2, ?3)",
            params![follower, target, ts(Utc::now())],
        )
        .with_context(|| format!("Failed to follow {target}"))?;
        Ok(true)
    }
}

fn query_user_achievements(conn: &Connection, user_id: &str) -> Result<Vec<UnlockedAchievementRecord>> {
    let mut stmt = conn.prepare(
        "SELECT a.name, a.description, a.icon, a.category, a.points, ua.unlocked_at
         FROM user_achievements ua JOIN achievements a ON a.name = ua.achievement_name
         WHERE ua.user_id = ?1
         ORDER BY ua.unlocked_at DESC, ua.rowid DESC",
    )?;
    let rows = stmt
        .query_map([user_id], |r| {
            Ok(UnlockedAchievementRecord {
                name: r.get(0)?,
                description: r.get(1)?,
                icon: r.get(2)?,
                category: r.get(3)?,
                points: r.get(4)?,
                unlocked_at: r.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
