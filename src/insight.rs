use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::InsightConfig;
use crate::models::SegmentAggregate;

pub const FALLBACK_INSIGHT: &str = "No insight available";

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("no API key configured")]
    MissingKey,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint answered with status {0}")]
    Status(reqwest::StatusCode),
    #[error("response carried no candidate text")]
    EmptyResponse,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize, Default)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content
            .parts
            .into_iter()
            .next()?
            .text
            .filter(|t| !t.trim().is_empty())
    }
}

pub struct InsightClient {
    config: InsightConfig,
    http: reqwest::Client,
}

impl InsightClient {
    pub fn new(config: InsightConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    pub async fn get_insight(
        &self,
        selected_intents: &[String],
        selected_genders: &[String],
        top_segments: &[SegmentAggregate],
        median: f64,
    ) -> String {
        match self
            .request(selected_intents, selected_genders, top_segments, median)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "insight unavailable, using fallback");
                FALLBACK_INSIGHT.to_string()
            }
        }
    }

    async fn request(
        &self,
        selected_intents: &[String],
        selected_genders: &[String],
        top_segments: &[SegmentAggregate],
        median: f64,
    ) -> Result<String, InsightError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(InsightError::MissingKey)?;

        let body = build_request(selected_intents, selected_genders, top_segments, median);
        debug!(endpoint = %self.config.endpoint, segments = top_segments.len(), "requesting insight");
        let response = self
            .http
            .post(&self.config.endpoint)
            .header("X-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(InsightError::Status(status));
        }
        let parsed: GenerateResponse = response.json().await?;
        parsed.first_text().ok_or(InsightError::EmptyResponse)
    }
}

fn build_request(
    selected_intents: &[String],
    selected_genders: &[String],
    top_segments: &[SegmentAggregate],
    median: f64,
) -> GenerateRequest {
    let prompt = format!(
        "Provide concise risk guidance. Median ECL={median:.2}. \
         Recommend actions for highest-risk segments."
    );
    let selections = format!(
        "Selected intents={selected_intents:?}, genders={selected_genders:?}"
    );
    let segments = serde_json::to_string(top_segments).unwrap_or_default();
    let parts = [prompt, selections, format!("Top segments: {segments}")]
        .into_iter()
        .map(|text| Part { text: Some(text) })
        .collect();
    GenerateRequest {
        contents: vec![Content { parts }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use std::time::Duration;

    fn segment() -> SegmentAggregate {
        SegmentAggregate {
            loan_intent: "VENTURE".to_string(),
            person_gender: "male".to_string(),
            pd_mean: 0.42,
            lgd: 0.6,
            ecl: 5_000.0,
            action: Action::ReduceDisbursement,
        }
    }

    fn client(api_key: Option<&str>, endpoint: &str) -> InsightClient {
        InsightClient::new(InsightConfig {
            api_key: api_key.map(str::to_string),
            endpoint: endpoint.to_string(),
            timeout: Duration::from_millis(500),
        })
        .unwrap()
    }

    #[test]
    fn request_carries_three_prompt_parts() {
        let body = build_request(
            &["VENTURE".to_string()],
            &["male".to_string()],
            &[segment()],
            1234.5678,
        );
        let json = serde_json::to_value(&body).unwrap();
        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[0]["text"].as_str().unwrap().contains("Median ECL=1234.57"));
        assert!(parts[1]["text"].as_str().unwrap().contains("VENTURE"));
        assert!(parts[2]["text"]
            .as_str()
            .unwrap()
            .contains("\"action\":\"Reduce disbursement\""));
    }

    #[test]
    fn response_text_is_extracted() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Tighten venture lending."}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.first_text().as_deref(), Some("Tighten venture lending."));

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[{}]}"#).unwrap();
        assert_eq!(empty.first_text(), None);
    }

    #[tokio::test]
    async fn missing_key_returns_fallback() {
        let text = client(None, "http://127.0.0.1:9/unused")
            .get_insight(&[], &[], &[segment()], 10.0)
            .await;
        assert_eq!(text, FALLBACK_INSIGHT);
    }

    #[tokio::test]
    async fn unreachable_endpoint_returns_fallback() {
        let text = client(Some("key"), "http://127.0.0.1:9/generate")
            .get_insight(&["MEDICAL".to_string()], &["female".to_string()], &[segment()], 10.0)
            .await;
        assert_eq!(text, FALLBACK_INSIGHT);
    }
}
