//! Gemini SQL Generator
//!
//! Asks a Gemini model for a single SQL Server `SELECT` answering a question
//! against the loaded schema. The reply is untrusted text; the guard decides
//! what happens to it.

use crate::error::{GenieError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Preference order when no usable model is configured: flash-lite first,
/// then flash, then pro.
pub const PREFERRED_MODELS: &[&str] = &[
    "models/gemini-2.5-flash-lite",
    "models/gemini-flash-lite-latest",
    "models/gemini-2.0-flash-lite",
    "models/gemini-2.0-flash-lite-001",
    "models/gemini-flash-latest",
    "models/gemini-2.0-flash",
    "models/gemini-2.0-flash-001",
    "models/gemini-2.5-flash",
    "models/gemini-pro-latest",
    "models/gemini-2.5-pro",
];

const SYSTEM_INSTRUCTION: &str = "You are a senior data analyst who writes Microsoft SQL Server queries.

Follow every rule:
- Use only tables and columns listed in the DATABASE SCHEMA.
- If the schema cannot answer the question, return exactly: SELECT 'Unable to answer with provided schema' AS error;
- Return exactly one SQL statement, and it must be a SELECT.
- Never use INSERT, UPDATE, DELETE, DROP, ALTER, TRUNCATE, MERGE, CREATE, GRANT, REVOKE, EXEC or EXECUTE.
- Never use WITH clauses, comments, markdown or code fences.
- Always limit results with TOP (100).
- Use SQL Server syntax, qualify tables by schema and quote identifiers with brackets: [schema].[table], [column].
- Return only the SQL text.";

lazy_static! {
    static ref OPENING_FENCE: Regex =
        Regex::new(r"^```(?:[A-Za-z0-9_-]*[ \t]*\r?\n)?").expect("opening fence pattern");
    static ref CLOSING_FENCE: Regex =
        Regex::new(r"\r?\n?```\s*$").expect("closing fence pattern");
}

/// Produces candidate SQL for a question.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate_sql(&self, question: &str, schema_prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// `GEMINI_MODEL`; resolved against the model list at startup.
    pub model: Option<String>,
    pub base_url: String,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    text: Option<String>,
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// Builds the client and resolves the model once. The chosen model is
    /// fixed for the life of the client.
    pub async fn connect(config: GeminiConfig) -> Result<Self> {
        let mut client = Self::with_model(config.clone(), String::new())?;
        client.model = client.resolve_model(config.model.as_deref()).await?;
        info!(model = %client.model, "Using Gemini model");
        Ok(client)
    }

    /// Skips resolution and uses `model` as given (after normalization).
    pub fn with_model(config: GeminiConfig, model: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GenieError::Llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: config.api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: normalize_model_name(&model),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn resolve_model(&self, configured: Option<&str>) -> Result<String> {
        let configured = configured
            .map(normalize_model_name)
            .filter(|name| !name.is_empty());

        match configured {
            // tuned models and other resource paths are taken on trust
            Some(name) if !name.starts_with("models/") => Ok(name),
            Some(name) => {
                let available = self.list_generate_models().await?;
                if available.contains(&name) {
                    return Ok(name);
                }
                warn!(configured = %name, "Configured GEMINI_MODEL is not available; falling back to a default");
                pick_default_model(&available).ok_or_else(no_models_error)
            }
            None => {
                let available = self.list_generate_models().await?;
                pick_default_model(&available).ok_or_else(no_models_error)
            }
        }
    }

    /// Names of models that support `generateContent`, across all pages.
    async fn list_generate_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(&url)
                .header("x-goog-api-key", &self.api_key)
                .query(&[("pageSize", "1000")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| GenieError::Llm(format!("Failed to list Gemini models: {}", e)))?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(GenieError::Llm(format!(
                    "Listing Gemini models failed with status {}: {}",
                    status, text
                )));
            }

            let page: ModelList = response
                .json()
                .await
                .map_err(|e| GenieError::Llm(format!("Failed to parse model list: {}", e)))?;
            names.extend(
                page.models
                    .into_iter()
                    .filter(|m| m.supported_generation_methods.iter().any(|g| g == "generateContent"))
                    .map(|m| m.name),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = names.len(), "Listed Gemini models");
        Ok(names)
    }
}

#[async_trait]
impl SqlGenerator for GeminiClient {
    async fn generate_sql(&self, question: &str, schema_prompt: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(GenieError::InvalidRequest("Question is required".to_string()));
        }

        let body = serde_json::json!({
            "systemInstruction": {"parts": [{"text": SYSTEM_INSTRUCTION}]},
            "contents": [{"role": "user", "parts": [{"text": build_prompt(question, schema_prompt)}]}],
            "generationConfig": {
                "temperature": 0.0,
                "topP": 0.1,
                "maxOutputTokens": 512,
                "responseMimeType": "text/plain"
            }
        });

        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        let failed = |detail: String| {
            GenieError::Llm(format!(
                "Gemini generateContent failed using model '{}'. Set GEMINI_MODEL to a valid model. {}",
                self.model, detail
            ))
        };

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(failed(format!("status {}: {}", status, text)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenieError::Llm(format!("Failed to parse Gemini response: {}", e)))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        let sql = strip_code_fences(&text);
        if sql.is_empty() {
            return Err(GenieError::Llm("Gemini returned an empty response".to_string()));
        }
        debug!(sql = %sql, "Model produced SQL candidate");
        Ok(sql)
    }
}

fn no_models_error() -> GenieError {
    GenieError::Llm(
        "No Gemini models available for generateContent. Set GEMINI_MODEL explicitly.".to_string(),
    )
}

/// Accepts `gemini-2.0-flash` or `models/gemini-2.0-flash`; any other name
/// containing `/` is a full resource path and is left alone.
pub fn normalize_model_name(model: &str) -> String {
    let model = model.trim();
    if model.is_empty() || model.contains('/') {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

/// First preferred model that is available, else whatever is listed first.
pub fn pick_default_model(available: &[String]) -> Option<String> {
    PREFERRED_MODELS
        .iter()
        .find(|preferred| available.iter().any(|name| name == *preferred))
        .map(|preferred| preferred.to_string())
        .or_else(|| available.first().cloned())
}

pub fn build_prompt(question: &str, schema_prompt: &str) -> String {
    format!(
        "DATABASE SCHEMA:\n{}\n\nUSER QUESTION:\n{}\n\nReturn ONLY SQL Server SQL.",
        schema_prompt,
        question.trim()
    )
}

/// Removes a surrounding markdown code fence, if the model added one.
pub fn strip_code_fences(text: &str) -> String {
    let text = text.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }
    let without_open = OPENING_FENCE.replace(text, "");
    CLOSING_FENCE.replace(&without_open, "").trim().to_string()
}
