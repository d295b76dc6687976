//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.
//!
//! Solutions never leave the server while a challenge is live; they are only revealed
//! in the `GameOverOut` report.

use serde::{Deserialize, Serialize};

use crate::achievements::{AchievementDefinition, ConditionRow};
use crate::domain::{Challenge, ChallengeSource, Difficulty, GameResult, GameStats, UserHistory};
use crate::game::{GamePhase, GameSession};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    /// Sessions always start at level 1.
    StartGame,
    UseHint {
        index: usize,
    },
    Submit {
        code: String,
    },
    State,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Game {
        game: GameSnapshotOut,
        #[serde(rename = "gameOver", skip_serializing_if = "Option::is_none")]
        game_over: Option<GameOverOut>,
    },
    Hint {
        hint: HintOut,
    },
    SubmitResult {
        result: SubmitOut,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HintView {
    pub index: usize,
    pub points_deduction: u32,
    pub used: bool,
    /// Only present once the hint has been paid for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// DTO used by both WS and HTTP for challenge delivery.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeOut {
    pub id: String,
    pub title: String,
    pub code: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub source: ChallengeSource,
    pub hints: Vec<HintView>,
}

/// Convert full `Challenge` (internal) to the public DTO, revealing used hints only.
pub fn to_out(c: &Challenge, used: &[usize]) -> ChallengeOut {
    ChallengeOut {
        id: c.id.clone(),
        title: c.title.clone(),
        code: c.buggy_code.clone(),
        category: c.category.clone(),
        difficulty: c.difficulty,
        source: c.source.clone(),
        hints: c
            .hints
            .iter()
            .enumerate()
            .map(|(index, h)| {
                let used = used.contains(&index);
                HintView {
                    index,
                    points_deduction: h.points_deduction,
                    used,
                    text: used.then(|| h.text.clone()),
                }
            })
            .collect(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshotOut {
    pub phase: GamePhase,
    pub stats: GameStats,
    pub challenge: Option<ChallengeOut>,
    pub hints_used: u32,
    pub challenges_completed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<GameResult>,
}

pub fn snapshot_of(s: &GameSession) -> GameSnapshotOut {
    let used = s.used_hints();
    GameSnapshotOut {
        phase: s.phase(),
        stats: s.stats(),
        challenge: match s.phase() {
            GamePhase::Playing => s.challenge().map(|c| to_out(c, &used)),
            _ => None,
        },
        hints_used: s.hints_used(),
        challenges_completed: s.challenges_completed(),
        result: s.final_result().cloned(),
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementOut {
    pub name: String,
    pub description: String,
    pub icon: String,
    pub category: String,
    pub points: u32,
    pub condition: ConditionRow,
}

pub fn achievement_out(d: &AchievementDefinition) -> AchievementOut {
    AchievementOut {
        name: d.name.clone(),
        description: d.description.clone(),
        icon: d.icon.clone(),
        category: d.category.clone(),
        points: d.points,
        condition: d.condition.to_row(),
    }
}

/// Everything the client needs once a session ends.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverOut {
    pub result: GameResult,
    pub history: UserHistory,
    pub unlocked: Vec<AchievementOut>,
    pub solution: Option<String>,
    pub explanation: Option<String>,
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct ChallengeIn {
    #[serde(default = "first_level")]
    pub level: u32,
}

fn first_level() -> u32 {
    1
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOut {
    pub game: GameSnapshotOut,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_over: Option<GameOverOut>,
}

#[derive(Debug, Deserialize)]
pub struct HintIn {
    pub index: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HintOut {
    pub index: usize,
    pub text: String,
    pub points_deducted: u32,
    pub game: GameSnapshotOut,
}

#[derive(Debug, Deserialize)]
pub struct SubmitIn {
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOut {
    pub correct: bool,
    pub points_awarded: u32,
    pub game: GameSnapshotOut,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_over: Option<GameOverOut>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub difficulty: Option<String>,
}

/// Identity for WebSocket clients that cannot set headers.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsIdentityQuery {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FollowIn {
    #[serde(rename = "targetUserId")]
    pub target_user_id: String,
}

#[derive(Debug, Serialize)]
pub struct FollowOut {
    pub following: bool,
}

#[derive(Debug, Serialize)]
pub struct InitOut {
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
    pub code: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
