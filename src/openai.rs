//! Minimal OpenAI client for challenge generation.
//!
//! We only call chat.completions and request a strict JSON object.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key, and never log generated solutions.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::Prompts;
use crate::domain::{Challenge, ChallengeSource, Difficulty, Hint};
use crate::util::{fill_template, trunc_for_log};

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
}

/// Shape the model is asked to return.
#[derive(Deserialize)]
struct Gen {
  title: String,
  code: String,
  solution: String,
  #[serde(default)]
  explanation: String,
  #[serde(default)]
  category: String,
  #[serde(default)]
  hints: Vec<Hint>,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model =
      std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model })
  }

  /// JSON-object chat completion. Returns the raw message content.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_json(&self, system: &str, user: &str, temperature: f32) -> Result<String, String> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "codequest-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(format!("OpenAI HTTP {}: {}", status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    body.choices.into_iter().next()
      .and_then(|c| c.message.content)
      .filter(|t| !t.trim().is_empty())
      .ok_or_else(|| "No content in response".to_string())
  }

  /// Generate a debugging challenge for `level`.
  #[instrument(level = "info", skip(self, prompts), fields(model = %self.model))]
  pub async fn generate_code_challenge(&self, prompts: &Prompts, level: u32) -> Result<Challenge, String> {
    let difficulty = Difficulty::for_level(level);
    let level_s = level.to_string();
    let diff_s = difficulty.as_str().to_ascii_lowercase();
    let vars = [("level", level_s.as_str()), ("difficulty", diff_s.as_str())];
    let system = fill_template(&prompts.challenge_system, &vars);
    let user = fill_template(&prompts.challenge_user_template, &vars);

    let start = std::time::Instant::now();
    let result = self.chat_json(&system, &user, 0.7).await;
    let elapsed = start.elapsed();

    let text = match result {
      Ok(t) => {
        info!(?elapsed, response_len = t.len(), "Model response received successfully");
        t
      }
      Err(e) => {
        error!(?elapsed, error = %e, "Model call failed during challenge generation");
        return Err(format!("Model generation failed: {e}"));
      }
    };

    let ch = parse_generated(&text, level)?;
    info!(challenge_id = %ch.id, title = %ch.title, hints = ch.hints.len(), "Code challenge successfully generated");
    Ok(ch)
  }
}

/// Turn model output into a `Challenge`, rejecting payloads a player could not use.
pub fn parse_generated(text: &str, level: u32) -> Result<Challenge, String> {
  let cleaned = strip_code_fence(text.trim());
  let gen: Gen = serde_json::from_str(cleaned).map_err(|e| format!("JSON parse error: {}", e))?;

  if gen.title.trim().is_empty() {
    return Err("Generated challenge has no title".into());
  }
  if gen.code.trim().is_empty() || gen.solution.trim().is_empty() {
    return Err("Generated challenge is missing code or solution".into());
  }
  if gen.code.trim() == gen.solution.trim() {
    return Err("Generated challenge code already equals its solution".into());
  }

  Ok(Challenge {
    id: Uuid::new_v4().to_string(),
    title: gen.title.trim().to_string(),
    buggy_code: gen.code.trim().to_string(),
    solution_code: gen.solution.trim().to_string(),
    explanation: gen.explanation,
    category: gen.category,
    difficulty: Difficulty::for_level(level),
    hints: gen.hints,
    source: ChallengeSource::Generated,
  })
}

/// Models sometimes wrap JSON in a ```json fence even in JSON mode.
fn strip_code_fence(s: &str) -> &str {
  let Some(rest) = s.strip_prefix("```") else { return s };
  let rest = rest.strip_prefix("json").unwrap_or(rest);
  rest.strip_suffix("```").unwrap_or(rest).trim()
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
