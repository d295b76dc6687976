//! Seed data: built-in challenges (served when no model is configured) and the default
//! achievement catalog.

use crate::achievements::{AchievementRow, ConditionRow};
use crate::domain::{Challenge, ChallengeSource, Difficulty, Hint};

fn seed(
  id: &str,
  difficulty: Difficulty,
  title: &str,
  category: &str,
  buggy_code: &str,
  solution_code: &str,
  explanation: &str,
  hints: &[(&str, u32)],
) -> Challenge {
  Challenge {
    id: id.into(),
    title: title.into(),
    buggy_code: buggy_code.into(),
    solution_code: solution_code.into(),
    explanation: explanation.into(),
    category: category.into(),
    difficulty,
    hints: hints
      .iter()
      .map(|(text, points_deduction)| Hint { text: (*text).into(), points_deduction: *points_deduction })
      .collect(),
    source: ChallengeSource::Seed,
  }
}

/// Minimal set of built-in challenges that keep the game playable
/// without external config or OpenAI. At least one per difficulty.
pub fn seed_challenges() -> Vec<Challenge> {
  vec![
    seed(
      "seed-easy-sum",
      Difficulty::Easy,
      "Off by One Sum",
      "Loops",
      "function sum(xs) { let t = 0; for (let i = 0; i <= xs.length; i++) { t += xs[i]; } return t; }",
      "function sum(xs) { let t = 0; for (let i = 0; i < xs.length; i++) { t += xs[i]; } return t; }",
      "The loop reads one element past the end of the array, adding undefined and producing NaN.",
      &[("Look closely at the loop bound.", 20), ("Arrays are zero-indexed.", 40)],
    ),
    seed(
      "seed-easy-max",
      Difficulty::Easy,
      "Maximum Mixup",
      "Algorithm",
      "function max(xs) { let m = 0; for (const x of xs) { if (x > m) m = x; } return m; }",
      "function max(xs) { let m = xs[0]; for (const x of xs) { if (x > m) m = x; } return m; }",
      "Starting from 0 gives the wrong answer when every element is negative.",
      &[("What if every number is below zero?", 25)],
    ),
    seed(
      "seed-medium-reverse",
      Difficulty::Medium,
      "Reverse in Place",
      "DataStructure",
      "function reverse(a) { for (let i = 0; i < a.length; i++) { const t = a[i]; a[i] = a[a.length - 1 - i]; a[a.length - 1 - i] = t; } return a; }",
      "function reverse(a) { for (let i = 0; i < a.length / 2; i++) { const t = a[i]; a[i] = a[a.length - 1 - i]; a[a.length - 1 - i] = t; } return a; }",
      "Swapping across the whole array reverses it twice, restoring the original order.",
      &[("How many swaps does a reversal need?", 30), ("Stop at the middle.", 50)],
    ),
    seed(
      "seed-hard-binsearch",
      Difficulty::Hard,
      "Binary Search Hang",
      "Algorithm",
      "function find(a, x) { let lo = 0, hi = a.length - 1; while (lo <= hi) { const mid = (lo + hi) >> 1; if (a[mid] === x) return mid; if (a[mid] < x) lo = mid; else hi = mid - 1; } return -1; }",
      "function find(a, x) { let lo = 0, hi = a.length - 1; while (lo <= hi) { const mid = (lo + hi) >> 1; if (a[mid] === x) return mid; if (a[mid] < x) lo = mid + 1; else hi = mid - 1; } return -1; }",
      "Setting lo = mid never shrinks the window when lo == mid, so the loop can spin forever.",
      &[("One branch does not make progress.", 40), ("Compare the two bound updates.", 60)],
    ),
  ]
}

fn row(name: &str, description: &str, icon: &str, category: &str, points: u32, kind: &str, operator: &str, value: f64, difficulty: Option<Difficulty>) -> AchievementRow {
  AchievementRow {
    name: name.into(),
    description: description.into(),
    icon: icon.into(),
    category: category.into(),
    points,
    condition: ConditionRow { kind: kind.into(), operator: operator.into(), value, difficulty },
  }
}

/// The catalog shipped with the service. A `[[achievements]]` table in the config
/// replaces it wholesale.
pub fn default_achievement_rows() -> Vec<AchievementRow> {
  vec![
    row("First Steps", "Complete your first challenge", "🎯", "Progress", 10, "games", "gte", 1.0, None),
    row("Speed Demon", "Complete a challenge in under 60 seconds", "⚡", "Speed", 20, "speed", "lte", 60.0, None),
    row("Perfect Score", "Get a score of 300 or higher", "🏆", "Score", 30, "score", "gte", 300.0, None),
    row("No Hints Needed", "Complete a Hard challenge without using hints", "🧠", "Skill", 40, "hints", "eq", 0.0, Some(Difficulty::Hard)),
    row("Streak Master", "Achieve a streak of 5 or more", "🔥", "Streak", 30, "streak", "gte", 5.0, None),
    row("Challenge Champion", "Complete 10 challenges", "👑", "Progress", 50, "games", "gte", 10.0, None),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_difficulty_has_a_seed() {
    let seeds = seed_challenges();
    for d in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
      assert!(seeds.iter().any(|c| c.difficulty == d), "no seed for {d:?}");
    }
    assert!(seeds.iter().all(|c| !c.is_solved_by(&c.buggy_code)));
  }
}
