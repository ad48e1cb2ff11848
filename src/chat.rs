//! Chat Pipeline
//!
//! question → model SQL → guard → SQL Server → rows. A rejected candidate
//! never reaches the database.

use crate::db::{Database, QueryResult};
use crate::error::{GenieError, Result};
use crate::guard::{RawCandidate, SqlGuard, ValidationVerdict};
use crate::llm::SqlGenerator;
use crate::schema::DatabaseSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub question: String,
    /// The SQL that actually ran, after normalization.
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

pub struct ChatService {
    generator: Arc<dyn SqlGenerator>,
    database: Arc<dyn Database>,
    guard: SqlGuard,
    schema: DatabaseSchema,
    schema_prompt: String,
}

impl ChatService {
    pub fn new(
        generator: Arc<dyn SqlGenerator>,
        database: Arc<dyn Database>,
        guard: SqlGuard,
        schema: DatabaseSchema,
    ) -> Self {
        let schema_prompt = schema.to_prompt_string();
        Self {
            generator,
            database,
            guard,
            schema,
            schema_prompt,
        }
    }

    /// Loads the schema once; it is not refreshed while the service lives.
    pub async fn bootstrap(
        generator: Arc<dyn SqlGenerator>,
        database: Arc<dyn Database>,
        guard: SqlGuard,
    ) -> Result<Self> {
        let schema = database.load_schema().await?;
        Ok(Self::new(generator, database, guard, schema))
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub fn guard(&self) -> &SqlGuard {
        &self.guard
    }

    pub async fn ask(&self, question: &str) -> Result<ChatResponse> {
        let request_id = uuid::Uuid::new_v4();
        self.answer(question)
            .instrument(info_span!("chat", %request_id))
            .await
    }

    async fn answer(&self, question: &str) -> Result<ChatResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(GenieError::InvalidRequest("Question is required".to_string()));
        }

        let generated = self
            .generator
            .generate_sql(question, &self.schema_prompt)
            .await?;
        let candidate = RawCandidate::from_model_output(generated);

        let sql = match self.guard.validate_candidate(&candidate) {
            ValidationVerdict::Accepted { normalized_sql } => normalized_sql,
            ValidationVerdict::Rejected { reason } => {
                warn!(reason = reason.code(), candidate = %candidate.text(), "Rejected model SQL");
                return Err(reason.into());
            }
        };

        info!(sql = %sql, "Executing validated SQL");
        let QueryResult { columns, rows } = self
            .database
            .execute(&sql, self.guard.policy().max_rows() as usize)
            .await?;

        Ok(ChatResponse {
            question: question.to_string(),
            sql: sql.into_inner(),
            columns,
            rows,
        })
    }
}
