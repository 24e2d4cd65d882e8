//! Groq vision API client for AI triage assessment.
//!
//! Sends the raiser's image snapshot and medical history to an
//! OpenAI-compatible chat-completions endpoint and parses the structured
//! triage verdict. The dispatch engine bounds every call with a timeout and
//! substitutes [`EmergencyAssessment::unavailable`] on any failure; nothing
//! in this module may fail a raise.

use crate::error::{DomainErrorKind, Error, ExternalErrorKind, InternalErrorKind};
use log::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Vision-capable model served by Groq.
const MODEL_ID: &str = "meta-llama/llama-4-scout-17b-16e-instruct";

const SYSTEM_PROMPT: &str = r#"
You are a medical triage AI. Analyze the image and medical history. Try to infer the location of the image as well.
CRITICAL RULES:
1. Return ONLY valid JSON.
2. Structure: { "condition": string, "severity": "High"|"Medium"|"Low", "reasoning": string, "action": string, "location": string }
3. If the image is unclear, set condition to "Unclear".
"#;

/// Structured triage verdict. Every field is always populated: parsing fills
/// gaps with conservative defaults and [`EmergencyAssessment::unavailable`]
/// produces the same shape when the service cannot be reached at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyAssessment {
    pub condition: String,
    pub severity: String,
    pub reasoning: String,
    pub action: String,
    pub location: String,
}

impl EmergencyAssessment {
    /// The safe fallback returned when the summarizer fails or times out.
    /// `reason` lands in `reasoning` so clients can show why no verdict is
    /// available.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            condition: "Error".to_string(),
            severity: "Unknown".to_string(),
            reasoning: reason.to_string(),
            action: "Call emergency services.".to_string(),
            location: "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Groq API client
#[derive(Clone)]
pub struct GroqClient {
    client: reqwest::Client,
    base_url: String,
}

impl GroqClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, Error> {
        let mut headers = reqwest::header::HeaderMap::new();

        let mut header_value = reqwest::header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| {
                warn!("Failed to create auth header: {e:?}");
                Error {
                    source: Some(Box::new(e)),
                    error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(
                        "Invalid API key format".to_string(),
                    )),
                }
            })?;
        header_value.set_sensitive(true);
        headers.insert("authorization", header_value);

        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Assess an emergency from the raiser's image snapshot and medical
    /// history. The image may arrive as a raw base64 string or a full data
    /// URI, possibly mangled in transit; it is scrubbed and re-padded before
    /// being sent on.
    pub async fn assess_emergency(
        &self,
        base64_image: &str,
        medical_history: Option<&Value>,
    ) -> Result<EmergencyAssessment, Error> {
        let url = format!("{}/chat/completions", self.base_url);
        let image_uri = format!("data:image/jpeg;base64,{}", sanitize_base64(base64_image));
        let history_context = format_history(medical_history);

        let payload = json!({
            "model": MODEL_ID,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": format!("Patient History: {history_context}. Analyze this image.")},
                        {"type": "image_url", "image_url": {"url": image_uri}}
                    ]
                }
            ],
            "temperature": 0.1,
            "max_tokens": 512,
            "response_format": {"type": "json_object"}
        });

        let response = self.client.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Groq API error ({status}): {error_text}");
            return Err(Error {
                source: None,
                error_kind: DomainErrorKind::External(ExternalErrorKind::Other(error_text)),
            });
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse Groq response: {e:?}");
            Error {
                source: Some(Box::new(e)),
                error_kind: DomainErrorKind::External(ExternalErrorKind::Other(
                    "Invalid response from Groq".to_string(),
                )),
            }
        })?;

        let content = completion
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| Error {
                source: None,
                error_kind: DomainErrorKind::External(ExternalErrorKind::Other(
                    "Empty response from Groq".to_string(),
                )),
            })?;

        let parsed: Value = serde_json::from_str(content).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: DomainErrorKind::External(ExternalErrorKind::Other(
                "Groq returned non-JSON content".to_string(),
            )),
        })?;

        Ok(assessment_from_value(&parsed))
    }
}

/// Fill any field the model left out so clients never see an undefined
/// state.
fn assessment_from_value(parsed: &Value) -> EmergencyAssessment {
    let field = |key: &str, default: &str| -> String {
        parsed
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .to_string()
    };

    EmergencyAssessment {
        condition: field("condition", "Unclear"),
        severity: field("severity", "Unknown"),
        reasoning: field("reasoning", "No details provided."),
        action: field("action", "Proceed with standard protocol."),
        location: field("location", "Unknown"),
    }
}

/// Scrub a client-supplied base64 image: strip any data-URI header, drop
/// characters outside the base64 alphabet and repair missing `=` padding.
fn sanitize_base64(raw: &str) -> String {
    let trimmed = raw.trim();

    // Strip a "data:image/...;base64," header if present.
    let body = if trimmed.starts_with("data:image/") {
        match trimmed.split_once("base64,") {
            Some((_, rest)) => rest,
            None => trimmed,
        }
    } else {
        trimmed
    };

    let mut clean: String = body
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect();

    let missing_padding = clean.len() % 4;
    if missing_padding != 0 {
        clean.push_str(&"=".repeat(4 - missing_padding));
    }

    clean
}

/// Render the medical-history JSON into the prompt context. Accepts both the
/// structured `[{condition, treatment, ...}]` form and a plain string list.
fn format_history(medical_history: Option<&Value>) -> String {
    let entries = match medical_history.and_then(Value::as_array) {
        Some(entries) if !entries.is_empty() => entries,
        _ => return "No known pre-existing conditions".to_string(),
    };

    entries
        .iter()
        .map(|entry| match entry {
            Value::String(s) => s.clone(),
            Value::Object(map) => {
                let condition = map
                    .get("condition")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown condition");
                let treatment = map
                    .get("treatment")
                    .and_then(Value::as_str)
                    .unwrap_or("None");
                format!("{condition} (Treatment: {treatment})")
            }
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_strips_a_data_uri_header() {
        assert_eq!(sanitize_base64("data:image/png;base64,aGVsbG8="), "aGVsbG8=");
    }

    #[test]
    fn sanitize_drops_whitespace_and_foreign_characters() {
        assert_eq!(sanitize_base64("aGVs\nbG8h IQ=="), "aGVsbG8hIQ==");
    }

    #[test]
    fn sanitize_repairs_missing_padding() {
        assert_eq!(sanitize_base64("aGVsbG8").len() % 4, 0);
    }

    #[test]
    fn format_history_handles_the_structured_form() {
        let history = json!([
            {"condition": "Asthma", "treatment": "Inhaler"},
            {"condition": "Diabetes"}
        ]);
        assert_eq!(
            format_history(Some(&history)),
            "Asthma (Treatment: Inhaler), Diabetes (Treatment: None)"
        );
    }

    #[test]
    fn format_history_handles_plain_strings_and_absence() {
        assert_eq!(
            format_history(Some(&json!(["Asthma", "Diabetes"]))),
            "Asthma, Diabetes"
        );
        assert_eq!(format_history(None), "No known pre-existing conditions");
        assert_eq!(
            format_history(Some(&json!([]))),
            "No known pre-existing conditions"
        );
    }

    #[test]
    fn unavailable_keeps_the_full_shape() {
        let fallback = EmergencyAssessment::unavailable("AI service unavailable");
        assert_eq!(fallback.condition, "Error");
        assert_eq!(fallback.action, "Call emergency services.");
        assert_eq!(fallback.reasoning, "AI service unavailable");
    }

    #[test]
    fn partial_model_output_is_filled_with_defaults() {
        let assessment = assessment_from_value(&json!({"condition": "Laceration"}));
        assert_eq!(assessment.condition, "Laceration");
        assert_eq!(assessment.severity, "Unknown");
        assert_eq!(assessment.action, "Proceed with standard protocol.");
    }

    #[tokio::test]
    async fn assess_emergency_parses_a_successful_completion() {
        let mut server = mockito::Server::new_async().await;
        let verdict = json!({
            "condition": "Suspected cardiac arrest",
            "severity": "High",
            "reasoning": "Subject unresponsive on the ground.",
            "action": "Begin CPR immediately.",
            "location": "Void deck"
        });
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "choices": [{"message": {"content": verdict.to_string()}}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = GroqClient::new("test-key", &server.url()).unwrap();
        let assessment = client.assess_emergency("aGVsbG8=", None).await.unwrap();

        mock.assert_async().await;
        assert_eq!(assessment.condition, "Suspected cardiac arrest");
        assert_eq!(assessment.severity, "High");
    }

    #[tokio::test]
    async fn assess_emergency_errors_on_an_upstream_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let client = GroqClient::new("test-key", &server.url()).unwrap();
        assert!(client.assess_emergency("aGVsbG8=", None).await.is_err());
    }
}
