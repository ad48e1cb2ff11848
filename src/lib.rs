pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod llm;
pub mod schema;
pub mod server;

pub use chat::{ChatRequest, ChatResponse, ChatService};
pub use config::AppConfig;
pub use db::{Database, MssqlDatabase, QueryResult};
pub use error::{GenieError, Result};
pub use guard::{GuardPolicy, RejectionKind, SqlGuard, ValidatedSql, ValidationVerdict};
pub use llm::{GeminiClient, SqlGenerator};
pub use schema::DatabaseSchema;
