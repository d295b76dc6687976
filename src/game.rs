//! Game session state machine.
//!
//! One `GameSession` owns a single player's game: the countdown, score, streak, lives,
//! the live challenge and which of its hints were opened. Phases run
//! `Menu -> Playing -> GameOver`; `start` may be called again from any phase.
//!
//! The session does no I/O of its own. Challenges come from a `ChallengeProvider`, time
//! comes from a `Clock`, and the finished `GameResult` is placed in an outbox that the
//! caller drains with `take_result` after every operation. The outbox is filled at most
//! once per started session, whichever of timer expiry, zero lives or the level ceiling
//! happens first.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::GameRules;
use crate::domain::{Challenge, Difficulty, GameResult, GameStats};
use crate::error::GameError;

/// Source of challenges for a given level.
#[async_trait]
pub trait ChallengeProvider: Send + Sync {
  async fn request_challenge(&self, level: u32) -> Result<Challenge, GameError>;
}

pub trait Clock: Send + Sync {
  fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
  Menu,
  Playing,
  GameOver,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HintUse {
  pub index: usize,
  pub text: String,
  pub points_deducted: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
  /// Correct; the next challenge is live.
  Advanced { points_awarded: u32 },
  /// Wrong; the session continues.
  Missed { lives_left: u32 },
  /// The submission (or the clock) ended the session.
  Finished { correct: bool },
}

const FIRST_LEVEL: u32 = 1;

pub struct GameSession {
  rules: GameRules,
  clock: Arc<dyn Clock>,
  phase: GamePhase,
  stats: GameStats,
  challenge: Option<Challenge>,
  used_hints: BTreeSet<usize>,
  hints_used: u32,
  challenges_completed: u32,
  started_at: Option<Instant>,
  epoch: u64,
  final_result: Option<GameResult>,
  /// The challenge that was live when the session ended.
  ended_challenge: Option<Challenge>,
  outbox: Option<GameResult>,
}

impl GameSession {
  pub fn new(rules: GameRules, clock: Arc<dyn Clock>) -> Self {
    Self {
      stats: initial_stats(&rules, FIRST_LEVEL),
      rules,
      clock,
      phase: GamePhase::Menu,
      challenge: None,
      used_hints: BTreeSet::new(),
      hints_used: 0,
      challenges_completed: 0,
      started_at: None,
      epoch: 0,
      final_result: None,
      ended_challenge: None,
      outbox: None,
    }
  }

  pub fn phase(&self) -> GamePhase {
    self.phase
  }

  /// Stats with the countdown evaluated against the clock.
  pub fn stats(&self) -> GameStats {
    let mut s = self.stats;
    if self.phase == GamePhase::Playing {
      s.time_remaining_secs = self.live_time_remaining();
    }
    s
  }

  pub fn challenge(&self) -> Option<&Challenge> {
    self.challenge.as_ref()
  }

  pub fn used_hints(&self) -> Vec<usize> {
    self.used_hints.iter().copied().collect()
  }

  pub fn hints_used(&self) -> u32 {
    self.hints_used
  }

  pub fn challenges_completed(&self) -> u32 {
    self.challenges_completed
  }

  /// Incremented by every successful `start`; lets a timer tell whether its session is
  /// still the current one.
  pub fn epoch(&self) -> u64 {
    self.epoch
  }

  pub fn final_result(&self) -> Option<&GameResult> {
    self.final_result.as_ref()
  }

  /// Time left before the countdown fires, while playing.
  pub fn remaining(&self) -> Option<Duration> {
    if self.phase != GamePhase::Playing {
      return None;
    }
    let started = self.started_at?;
    let deadline = started + Duration::from_secs(u64::from(self.rules.round_secs));
    Some(deadline.saturating_duration_since(self.clock.now()))
  }

  /// The challenge that was live when the last session ended. Unlike `challenge()`, this
  /// is never the one a restarted session is now playing.
  pub fn ended_challenge(&self) -> Option<&Challenge> {
    self.ended_challenge.as_ref()
  }

  /// Drain the finished result. Returns `Some` once per ended session.
  pub fn take_result(&mut self) -> Option<GameResult> {
    self.outbox.take()
  }

  /// Fetch a level 1 challenge and begin a fresh countdown from the initial stats. A game
  /// still in progress is ended first. On fetch failure nothing changes.
  #[instrument(level = "info", skip(self, provider), fields(epoch = self.epoch))]
  pub async fn start(&mut self, provider: &dyn ChallengeProvider) -> Result<(), GameError> {
    let challenge = provider.request_challenge(FIRST_LEVEL).await?;

    if self.phase == GamePhase::Playing {
      self.end();
    }

    self.stats = initial_stats(&self.rules, FIRST_LEVEL);
    self.challenge = Some(challenge);
    self.used_hints.clear();
    self.hints_used = 0;
    self.challenges_completed = 0;
    self.final_result = None;
    self.started_at = Some(self.clock.now());
    self.epoch += 1;
    self.phase = GamePhase::Playing;
    info!(target: "game", epoch = self.epoch, round_secs = self.rules.round_secs, "Session started");
    Ok(())
  }

  /// Open hint `index` of the live challenge, paying its deduction (score floors at 0).
  #[instrument(level = "debug", skip(self))]
  pub fn use_hint(&mut self, index: usize) -> Result<HintUse, GameError> {
    self.expire_if_due();
    if self.phase != GamePhase::Playing {
      return Err(GameError::NotPlaying);
    }
    let challenge = self.challenge.as_ref().ok_or(GameError::NotPlaying)?;
    let hint = challenge.hints.get(index).ok_or(GameError::InvalidIndex(index))?;
    if self.used_hints.contains(&index) {
      return Err(GameError::AlreadyUsed(index));
    }

    let used = HintUse { index, text: hint.text.clone(), points_deducted: hint.points_deduction };
    self.stats.score = self.stats.score.saturating_sub(used.points_deducted);
    self.used_hints.insert(index);
    self.hints_used += 1;
    debug!(target: "game", index, deduction = used.points_deducted, score = self.stats.score, "Hint used");
    Ok(used)
  }

  /// Check `code` against the live solution.
  ///
  /// A correct answer below the level ceiling needs the next challenge; if that fetch
  /// fails the whole submission is rejected and the stats stay as they were.
  #[instrument(level = "info", skip(self, code, provider), fields(code_len = code.len()))]
  pub async fn submit(&mut self, code: &str, provider: &dyn ChallengeProvider) -> Result<SubmitOutcome, GameError> {
    if self.expire_if_due() {
      return Ok(SubmitOutcome::Finished { correct: false });
    }
    if self.phase != GamePhase::Playing {
      return Err(GameError::NotPlaying);
    }
    let challenge = self.challenge.as_ref().ok_or(GameError::NotPlaying)?;

    if !challenge.is_solved_by(code) {
      self.stats.streak = 0;
      self.stats.lives = self.stats.lives.saturating_sub(1);
      info!(target: "game", lives = self.stats.lives, "Incorrect submission");
      if self.stats.lives == 0 {
        self.end();
        return Ok(SubmitOutcome::Finished { correct: false });
      }
      return Ok(SubmitOutcome::Missed { lives_left: self.stats.lives });
    }

    let points_awarded = self.rules.points_per_streak.saturating_mul(self.stats.streak);
    let mut next = self.stats;
    next.score = next.score.saturating_add(points_awarded);
    next.streak += 1;
    next.level += 1;

    if next.level > self.rules.max_level {
      self.stats = next;
      self.challenges_completed += 1;
      info!(target: "game", score = next.score, "Level ceiling reached");
      self.end();
      return Ok(SubmitOutcome::Finished { correct: true });
    }

    let upcoming = provider.request_challenge(next.level).await?;
    self.stats = next;
    self.challenges_completed += 1;
    self.challenge = Some(upcoming);
    self.used_hints.clear();
    info!(target: "game", score = next.score, streak = next.streak, level = next.level, points_awarded, "Correct submission");

    if self.expire_if_due() {
      return Ok(SubmitOutcome::Finished { correct: true });
    }
    Ok(SubmitOutcome::Advanced { points_awarded })
  }

  /// The countdown fired. Ends a running session whatever its lives.
  pub fn on_timer_expire(&mut self) {
    if self.phase == GamePhase::Playing {
      info!(target: "game", epoch = self.epoch, "Timer expired");
      self.end();
    }
  }

  /// Ends the session through the timer path when the countdown has run out.
  /// Returns true when this call ended it.
  pub fn expire_if_due(&mut self) -> bool {
    if self.phase == GamePhase::Playing && self.live_time_remaining() == 0 {
      self.on_timer_expire();
      return true;
    }
    false
  }

  fn end(&mut self) {
    if self.phase != GamePhase::Playing {
      return;
    }
    self.stats.time_remaining_secs = self.live_time_remaining();
    let difficulty = self
      .challenge
      .as_ref()
      .map(|c| c.difficulty)
      .unwrap_or_else(|| Difficulty::for_level(self.stats.level));
    let result = GameResult {
      score: self.stats.score,
      challenges_completed: self.challenges_completed,
      hints_used: self.hints_used,
      time_spent_secs: self.rules.round_secs - self.stats.time_remaining_secs,
      difficulty,
      streak: self.stats.streak,
    };
    info!(target: "game", score = result.score, completed = result.challenges_completed, time_spent = result.time_spent_secs, "Session over");
    self.phase = GamePhase::GameOver;
    self.ended_challenge = self.challenge.clone();
    self.final_result = Some(result.clone());
    self.outbox = Some(result);
  }

  fn live_time_remaining(&self) -> u32 {
    let Some(started) = self.started_at else {
      return self.rules.round_secs;
    };
    let elapsed = self.clock.now().saturating_duration_since(started).as_secs();
    let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
    self.rules.round_secs.saturating_sub(elapsed)
  }
}

fn initial_stats(rules: &GameRules, level: u32) -> GameStats {
  GameStats {
    score: 0,
    streak: 0,
    level,
    time_remaining_secs: rules.round_secs,
    lives: rules.initial_lives,
  }
}

#[cfg(test)]
pub mod test_support {
  use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
  use std::sync::Mutex;

  use super::*;
  use crate::seeds::seed_challenges;

  /// Clock that only moves when told to.
  pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
  }

  impl ManualClock {
    pub fn new() -> Arc<Self> {
      Arc::new(Self { base: Instant::now(), offset: Mutex::new(Duration::ZERO) })
    }

    pub fn advance(&self, secs: u64) {
      *self.offset.lock().unwrap() += Duration::from_secs(secs);
    }
  }

  impl Clock for ManualClock {
    fn now(&self) -> Instant {
      self.base + *self.offset.lock().unwrap()
    }
  }

  /// Serves the first seed challenge for the level's difficulty; can be switched to fail.
  #[derive(Default)]
  pub struct StubProvider {
    pub failing: AtomicBool,
    pub requests: AtomicU32,
  }

  impl StubProvider {
    pub fn set_failing(&self, on: bool) {
      self.failing.store(on, Ordering::SeqCst);
    }
  }

  #[async_trait]
  impl ChallengeProvider for StubProvider {
    async fn request_challenge(&self, level: u32) -> Result<Challenge, GameError> {
      self.requests.fetch_add(1, Ordering::SeqCst);
      if self.failing.load(Ordering::SeqCst) {
        return Err(GameError::GenerationFailure("stub offline".into()));
      }
      let difficulty = Difficulty::for_level(level);
      seed_challenges()
        .into_iter()
        .find(|c| c.difficulty == difficulty)
        .ok_or_else(|| GameError::GenerationFailure("no seed".into()))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::test_support::{ManualClock, StubProvider};
  use super::*;

  fn session_with(rules: GameRules) -> (GameSession, Arc<ManualClock>) {
    let clock = ManualClock::new();
    (GameSession::new(rules, clock.clone()), clock)
  }

  fn solution(s: &GameSession) -> String {
    s.challenge().unwrap().solution_code.clone()
  }

  #[tokio::test]
  async fn start_resets_stats_and_enters_playing() {
    let (mut s, _clock) = session_with(GameRules::default());
    let p = StubProvider::default();
    assert_eq!(s.phase(), GamePhase::Menu);
    s.start(&p).await.unwrap();
    assert_eq!(s.phase(), GamePhase::Playing);
    assert_eq!(
      s.stats(),
      GameStats { score: 0, streak: 0, level: 1, time_remaining_secs: 180, lives: 3 }
    );
    assert_eq!(s.epoch(), 1);
    assert_eq!(s.challenge().unwrap().difficulty, Difficulty::Easy);
  }

  #[tokio::test]
  async fn failed_start_leaves_state_untouched() {
    let (mut s, _clock) = session_with(GameRules::default());
    let p = StubProvider::default();
    p.set_failing(true);
    let err = s.start(&p).await.unwrap_err();
    assert!(matches!(err, GameError::GenerationFailure(_)));
    assert_eq!(s.phase(), GamePhase::Menu);
    assert_eq!(s.epoch(), 0);
  }

  #[tokio::test]
  async fn consecutive_successes_score_triangular_numbers() {
    let rules = GameRules { max_level: 50, ..GameRules::default() };
    let (mut s, _clock) = session_with(rules);
    let p = StubProvider::default();
    s.start(&p).await.unwrap();
    for n in 1..=5u32 {
      let code = solution(&s);
      let out = s.submit(&code, &p).await.unwrap();
      assert_eq!(out, SubmitOutcome::Advanced { points_awarded: 100 * (n - 1) });
      assert_eq!(s.stats().score, 100 * (0..n).sum::<u32>());
      assert_eq!(s.stats().streak, n);
    }
  }

  #[tokio::test]
  async fn level_ceiling_ends_the_session() {
    let (mut s, clock) = session_with(GameRules::default());
    let p = StubProvider::default();
    s.start(&p).await.unwrap();
    clock.advance(40);
    for _ in 0..2 {
      let code = solution(&s);
      assert!(matches!(s.submit(&code, &p).await.unwrap(), SubmitOutcome::Advanced { .. }));
    }
    let code = solution(&s);
    assert_eq!(s.submit(&code, &p).await.unwrap(), SubmitOutcome::Finished { correct: true });
    assert_eq!(s.phase(), GamePhase::GameOver);

    let result = s.take_result().expect("result emitted");
    assert_eq!(
      result,
      GameResult {
        score: 300,
        challenges_completed: 3,
        hints_used: 0,
        time_spent_secs: 40,
        difficulty: Difficulty::Hard,
        streak: 3,
      }
    );
    assert!(s.take_result().is_none());
  }

  #[tokio::test]
  async fn wrong_answers_cost_lives_and_reset_streak() {
    let (mut s, _clock) = session_with(GameRules::default());
    let p = StubProvider::default();
    s.start(&p).await.unwrap();
    let code = solution(&s);
    s.submit(&code, &p).await.unwrap();
    assert_eq!(s.stats().streak, 1);

    assert_eq!(s.submit("nope", &p).await.unwrap(), SubmitOutcome::Missed { lives_left: 2 });
    assert_eq!(s.stats().streak, 0);
    assert_eq!(s.submit("nope", &p).await.unwrap(), SubmitOutcome::Missed { lives_left: 1 });
    assert_eq!(s.submit("nope", &p).await.unwrap(), SubmitOutcome::Finished { correct: false });
    assert_eq!(s.stats().lives, 0);
    assert_eq!(s.take_result().unwrap().challenges_completed, 1);
    assert_eq!(s.submit("nope", &p).await.unwrap_err(), GameError::NotPlaying);
  }

  #[tokio::test]
  async fn failed_next_challenge_rejects_the_whole_submission() {
    let (mut s, _clock) = session_with(GameRules::default());
    let p = StubProvider::default();
    s.start(&p).await.unwrap();
    let before = s.stats();
    let id_before = s.challenge().unwrap().id.clone();

    p.set_failing(true);
    let code = solution(&s);
    assert!(matches!(s.submit(&code, &p).await, Err(GameError::GenerationFailure(_))));
    assert_eq!(s.stats(), before);
    assert_eq!(s.challenge().unwrap().id, id_before);
    assert_eq!(s.challenges_completed(), 0);

    p.set_failing(false);
    assert!(matches!(s.submit(&code, &p).await.unwrap(), SubmitOutcome::Advanced { .. }));
  }

  #[tokio::test]
  async fn hints_deduct_once_and_never_go_negative() {
    let (mut s, _clock) = session_with(GameRules::default());
    let p = StubProvider::default();
    s.start(&p).await.unwrap();

    let used = s.use_hint(0).unwrap();
    assert_eq!(used.points_deducted, 20);
    assert_eq!(s.stats().score, 0);
    assert_eq!(s.use_hint(0).unwrap_err(), GameError::AlreadyUsed(0));
    assert_eq!(s.use_hint(7).unwrap_err(), GameError::InvalidIndex(7));
    assert_eq!(s.hints_used(), 1);
    assert_eq!(s.used_hints(), vec![0]);
    assert_eq!(s.phase(), GamePhase::Playing);
  }

  #[tokio::test]
  async fn hint_tracking_resets_per_challenge_but_counter_does_not() {
    let rules = GameRules { max_level: 10, ..GameRules::default() };
    let (mut s, _clock) = session_with(rules);
    let p = StubProvider::default();
    s.start(&p).await.unwrap();
    for _ in 0..2 {
      let code = solution(&s);
      s.submit(&code, &p).await.unwrap();
    }
    assert_eq!(s.stats().score, 100);
    s.use_hint(0).unwrap();
    assert_eq!(s.stats().score, 60);
    let code = solution(&s);
    s.submit(&code, &p).await.unwrap();
    assert!(s.used_hints().is_empty());
    s.use_hint(0).unwrap();
    assert_eq!(s.hints_used(), 2);
  }

  #[tokio::test]
  async fn game_over_happens_once_across_triggers() {
    let (mut s, clock) = session_with(GameRules::default());
    let p = StubProvider::default();
    s.start(&p).await.unwrap();
    for _ in 0..3 {
      let _ = s.submit("wrong", &p).await;
    }
    clock.advance(500);
    s.on_timer_expire();
    assert!(!s.expire_if_due());
    assert!(s.take_result().is_some());
    assert!(s.take_result().is_none());
    assert_eq!(s.phase(), GamePhase::GameOver);
  }

  #[tokio::test]
  async fn timer_expiry_ends_session_with_lives_left() {
    let (mut s, clock) = session_with(GameRules::default());
    let p = StubProvider::default();
    s.start(&p).await.unwrap();
    clock.advance(30);
    assert_eq!(s.stats().time_remaining_secs, 150);
    s.on_timer_expire();
    let result = s.take_result().unwrap();
    assert_eq!(result.time_spent_secs, 30);
    assert_eq!(s.stats().lives, 3);
    assert_eq!(s.remaining(), None);
  }

  #[tokio::test]
  async fn late_submission_is_treated_as_expiry() {
    let (mut s, clock) = session_with(GameRules::default());
    let p = StubProvider::default();
    s.start(&p).await.unwrap();
    clock.advance(180);
    let code = solution(&s);
    assert_eq!(s.submit(&code, &p).await.unwrap(), SubmitOutcome::Finished { correct: false });
    let result = s.take_result().unwrap();
    assert_eq!(result.score, 0);
    assert_eq!(result.time_spent_secs, 180);
    assert_eq!(s.use_hint(0).unwrap_err(), GameError::NotPlaying);
  }

  #[tokio::test]
  async fn restarting_mid_game_ends_the_previous_one() {
    let (mut s, _clock) = session_with(GameRules::default());
    let p = StubProvider::default();
    s.start(&p).await.unwrap();
    s.use_hint(0).unwrap();
    let first_id = s.challenge().unwrap().id.clone();
    s.start(&p).await.unwrap();
    assert_eq!(s.take_result().unwrap().hints_used, 1);
    assert_eq!(s.ended_challenge().unwrap().id, first_id);
    assert_eq!(s.epoch(), 2);
    assert_eq!(s.hints_used(), 0);
    assert_eq!(s.phase(), GamePhase::Playing);
  }

  #[tokio::test]
  async fn restart_always_returns_to_level_one() {
    let (mut s, _clock) = session_with(GameRules::default());
    let p = StubProvider::default();
    s.start(&p).await.unwrap();
    let code = solution(&s);
    s.submit(&code, &p).await.unwrap();
    assert_eq!(s.stats().level, 2);
    assert_eq!(s.challenge().unwrap().difficulty, Difficulty::Medium);

    s.start(&p).await.unwrap();
    assert_eq!(s.stats(), GameStats { score: 0, streak: 0, level: 1, time_remaining_secs: 180, lives: 3 });
    assert_eq!(s.challenge().unwrap().difficulty, Difficulty::Easy);
    assert_eq!(s.ended_challenge().unwrap().difficulty, Difficulty::Medium);
  }
}
