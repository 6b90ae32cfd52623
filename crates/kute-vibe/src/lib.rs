//! Client for the generative-AI collaborator that scores conversations.
//!
//! The model is asked for a single JSON object; since generative APIs love to
//! wrap their output in markdown fences or chatter, the response goes through
//! a recovery pass before parsing, and every score is clamped into range.
//! Analysis failures never surface to the caller: chat must keep working when
//! the model is down, so a fixed neutral report stands in.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use kute_types::api::ChatLine;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Error)]
pub enum VibeError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model returned no candidates")]
    EmptyResponse,
    #[error("model output was not valid JSON: {0}")]
    BadJson(#[from] serde_json::Error),
}

/// Normalized analysis result. Scores are 0-100, emotion intensities 0-1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VibeReport {
    pub sentiment_score: f64,
    pub compatibility_score: f64,
    pub toxicity_score: f64,
    pub vibe: String,
    pub advice: String,
    pub emotions: Emotions,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Emotions {
    pub joy: f64,
    pub affection: f64,
    pub tension: f64,
    pub curiosity: f64,
    pub boredom: f64,
}

impl VibeReport {
    /// The stand-in returned whenever the collaborator is unavailable or
    /// produces garbage.
    pub fn neutral_fallback() -> Self {
        VibeReport {
            sentiment_score: 50.0,
            compatibility_score: 50.0,
            toxicity_score: 0.0,
            vibe: "Unknown".to_string(),
            advice: "Analysis is unavailable right now — keep the conversation going.".to_string(),
            emotions: Emotions {
                joy: 0.2,
                affection: 0.2,
                tension: 0.2,
                curiosity: 0.2,
                boredom: 0.2,
            },
        }
    }
}

#[derive(Clone)]
pub struct VibeClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl VibeClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string(), DEFAULT_MODEL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String, model: String) -> Self {
        VibeClient {
            http: reqwest::Client::new(),
            base_url,
            model,
            api_key,
        }
    }

    /// Analyze a conversation window. Infallible by contract: any failure is
    /// logged and replaced with the neutral fallback.
    pub async fn analyze(&self, lines: &[ChatLine]) -> VibeReport {
        match self.request_analysis(lines).await {
            Ok(report) => report,
            Err(e) => {
                warn!("vibe analysis failed, serving fallback: {}", e);
                VibeReport::neutral_fallback()
            }
        }
    }

    async fn request_analysis(&self, lines: &[ChatLine]) -> Result<VibeReport, VibeError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": build_prompt(lines) }] }]
        });

        let response: GenerateContentResponse = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or(VibeError::EmptyResponse)?;

        let raw: RawReport = serde_json::from_str(recover_json(&text))?;
        Ok(normalize(raw))
    }
}

fn build_prompt(lines: &[ChatLine]) -> String {
    let transcript: Vec<String> = lines
        .iter()
        .map(|l| format!("{}: {}", l.sender_name, l.content))
        .collect();

    format!(
        "You are a relationship counselor and dating coach. Analyze the \
         conversation below and reply with a single JSON object containing:\n\
         - \"sentimentScore\": dating-chemistry score from 0 to 100\n\
         - \"compatibilityScore\": long-term compatibility score from 0 to 100\n\
         - \"toxicityScore\": toxicity score from 0 to 100\n\
         - \"vibe\": one or two words for the overall energy (e.g. Playful, Tense, Flirty, Warm)\n\
         - \"advice\": one short, creative tip for the participants\n\
         - \"emotions\": object with \"joy\", \"affection\", \"tension\", \
           \"curiosity\", \"boredom\", each from 0 to 1\n\
         Reply with JSON only, no other text.\n\n\
         Conversation:\n{}",
        transcript.join("\n")
    )
}

/// Strip markdown fences and surrounding chatter; keep the outermost object.
fn recover_json(text: &str) -> &str {
    let trimmed = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn normalize(raw: RawReport) -> VibeReport {
    VibeReport {
        sentiment_score: raw.sentiment_score.clamp(0.0, 100.0),
        compatibility_score: raw.compatibility_score.clamp(0.0, 100.0),
        toxicity_score: raw.toxicity_score.clamp(0.0, 100.0),
        vibe: if raw.vibe.trim().is_empty() {
            "Unknown".to_string()
        } else {
            raw.vibe
        },
        advice: raw.advice,
        emotions: Emotions {
            joy: raw.emotions.joy.clamp(0.0, 1.0),
            affection: raw.emotions.affection.clamp(0.0, 1.0),
            tension: raw.emotions.tension.clamp(0.0, 1.0),
            curiosity: raw.emotions.curiosity.clamp(0.0, 1.0),
            boredom: raw.emotions.boredom.clamp(0.0, 1.0),
        },
    }
}

/// What the model actually sends back — every field optional so a partial
/// answer still normalizes instead of erroring.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReport {
    #[serde(default = "default_score")]
    sentiment_score: f64,
    #[serde(default = "default_score")]
    compatibility_score: f64,
    #[serde(default)]
    toxicity_score: f64,
    #[serde(default)]
    vibe: String,
    #[serde(default = "default_advice")]
    advice: String,
    #[serde(default)]
    emotions: RawEmotions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEmotions {
    #[serde(default)]
    joy: f64,
    #[serde(default)]
    affection: f64,
    #[serde(default)]
    tension: f64,
    #[serde(default)]
    curiosity: f64,
    #[serde(default)]
    boredom: f64,
}

fn default_score() -> f64 {
    50.0
}

fn default_advice() -> String {
    "Keep the conversation going.".to_string()
}

// -- Gemini wire types (the slice we read) --

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_json_from_markdown_fences() {
        let fenced = "```json\n{\"sentimentScore\": 80}\n```";
        assert_eq!(recover_json(fenced), "{\"sentimentScore\": 80}");

        let chatty = "Sure! Here is the analysis:\n{\"vibe\": \"Flirty\"}\nHope that helps.";
        assert_eq!(recover_json(chatty), "{\"vibe\": \"Flirty\"}");

        assert_eq!(recover_json("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn normalizes_and_clamps_model_output() {
        let raw: RawReport = serde_json::from_str(
            r#"{
                "sentimentScore": 140,
                "compatibilityScore": -3,
                "toxicityScore": 12,
                "vibe": "Flirty",
                "advice": "Ask about the trip.",
                "emotions": { "joy": 1.4, "affection": 0.7, "tension": -0.1, "curiosity": 0.5, "boredom": 0.0 }
            }"#,
        )
        .unwrap();

        let report = normalize(raw);
        assert_eq!(report.sentiment_score, 100.0);
        assert_eq!(report.compatibility_score, 0.0);
        assert_eq!(report.toxicity_score, 12.0);
        assert_eq!(report.emotions.joy, 1.0);
        assert_eq!(report.emotions.tension, 0.0);
        assert_eq!(report.vibe, "Flirty");
    }

    #[test]
    fn partial_output_fills_defaults() {
        let raw: RawReport = serde_json::from_str(r#"{"vibe": "Warm"}"#).unwrap();
        let report = normalize(raw);
        assert_eq!(report.sentiment_score, 50.0);
        assert_eq!(report.compatibility_score, 50.0);
        assert_eq!(report.toxicity_score, 0.0);
        assert_eq!(report.advice, "Keep the conversation going.");
    }

    #[test]
    fn fallback_is_structurally_valid() {
        let report = VibeReport::neutral_fallback();
        assert!((0.0..=100.0).contains(&report.sentiment_score));
        assert!((0.0..=100.0).contains(&report.compatibility_score));
        assert!((0.0..=100.0).contains(&report.toxicity_score));
        assert!(!report.vibe.is_empty());
        assert!(!report.advice.is_empty());

        // And it serializes with the wire field names the client expects.
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("sentimentScore").is_some());
        assert!(json.get("emotions").and_then(|e| e.get("joy")).is_some());
    }

    #[tokio::test]
    async fn unreachable_backend_yields_the_neutral_fallback() {
        // Loopback port 9 has no listener; the request errors and analyze
        // must swallow it.
        let client = VibeClient::with_base_url(
            "test-key".into(),
            "http://127.0.0.1:9".into(),
            "gemini-2.0-flash".into(),
        );
        let lines = vec![
            ChatLine {
                sender_name: "ada".into(),
                content: "hey".into(),
            },
            ChatLine {
                sender_name: "brie".into(),
                content: "hi!".into(),
            },
        ];
        let report = client.analyze(&lines).await;
        assert_eq!(report, VibeReport::neutral_fallback());
    }

    #[test]
    fn prompt_includes_every_line_in_order() {
        let lines = vec![
            ChatLine {
                sender_name: "ada".into(),
                content: "hey".into(),
            },
            ChatLine {
                sender_name: "brie".into(),
                content: "hi!".into(),
            },
        ];
        let prompt = build_prompt(&lines);
        let ada = prompt.find("ada: hey").unwrap();
        let brie = prompt.find("brie: hi!").unwrap();
        assert!(ada < brie);
    }
}
