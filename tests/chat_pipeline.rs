use async_trait::async_trait;
use serde_json::{json, Value};
use sqlgenie::db::{Database, QueryResult};
use sqlgenie::error::{GenieError, Result};
use sqlgenie::guard::{SqlGuard, ValidatedSql};
use sqlgenie::llm::SqlGenerator;
use sqlgenie::schema::{CatalogColumn, CatalogTable, ColumnInfo, DatabaseSchema};
use sqlgenie::server::{handle_request, AppState};
use sqlgenie::{ChatService, RejectionKind};
use std::sync::{Arc, Mutex};

/// Replies with a fixed SQL string and remembers what it was asked.
struct CannedGenerator {
    reply: std::result::Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl CannedGenerator {
    fn sql(sql: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(sql.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SqlGenerator for CannedGenerator {
    async fn generate_sql(&self, question: &str, schema_prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push(format!("{}\n{}", schema_prompt, question));
        self.reply.clone().map_err(GenieError::Llm)
    }
}

/// In-memory database that records every statement it is handed.
#[derive(Default)]
struct RecordingDatabase {
    executed: Mutex<Vec<String>>,
    timeout: bool,
}

impl RecordingDatabase {
    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    async fn load_schema(&self) -> Result<DatabaseSchema> {
        Ok(sample_schema())
    }

    async fn execute(&self, sql: &ValidatedSql, max_rows: usize) -> Result<QueryResult> {
        self.executed.lock().unwrap().push(sql.as_str().to_string());
        if self.timeout {
            return Err(GenieError::QueryTimeout(30));
        }
        let rows = (1..=3)
            .map(|i| vec![json!(i), json!(format!("Customer {}", i))])
            .take(max_rows)
            .collect();
        Ok(QueryResult {
            columns: vec!["Id".to_string(), "Name".to_string()],
            rows,
        })
    }
}

fn sample_schema() -> DatabaseSchema {
    let column = |name: &str, data_type: &str| CatalogColumn {
        table_schema: "dbo".to_string(),
        table_name: "Customers".to_string(),
        column: ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_nullable: false,
            max_length: None,
            precision: None,
            scale: None,
        },
    };
    DatabaseSchema::from_catalog(
        vec![CatalogTable {
            schema: "dbo".to_string(),
            name: "Customers".to_string(),
            table_type: "BASE TABLE".to_string(),
        }],
        vec![column("Id", "int"), column("Name", "nvarchar")],
    )
}

async fn service(generator: Arc<CannedGenerator>, db: Arc<RecordingDatabase>) -> ChatService {
    ChatService::bootstrap(generator, db, SqlGuard::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn accepted_sql_is_normalized_before_execution() {
    let db = Arc::new(RecordingDatabase::default());
    let chat = service(
        CannedGenerator::sql("SELECT Id, Name FROM [dbo].[Customers];"),
        db.clone(),
    )
    .await;

    let answer = chat.ask("  who are our customers?  ").await.unwrap();
    assert_eq!(answer.question, "who are our customers?");
    assert_eq!(answer.sql, "SELECT TOP (100) Id, Name FROM [dbo].[Customers]");
    assert_eq!(answer.columns, vec!["Id", "Name"]);
    assert_eq!(answer.rows.len(), 3);
    assert_eq!(db.executed(), vec![answer.sql.clone()]);
}

#[tokio::test]
async fn fenced_reply_is_not_sql() {
    // fence stripping belongs to the Gemini client, not the pipeline
    let db = Arc::new(RecordingDatabase::default());
    let chat = service(
        CannedGenerator::sql("```sql\nSELECT Id FROM [dbo].[Customers]\n```"),
        db.clone(),
    )
    .await;

    let err = chat.ask("who?").await.unwrap_err();
    assert!(matches!(err, GenieError::Rejected(RejectionKind::MalformedInput)));
    assert!(db.executed().is_empty());
}

#[tokio::test]
async fn rejected_sql_never_reaches_the_database() {
    let db = Arc::new(RecordingDatabase::default());
    let chat = service(CannedGenerator::sql("SELECT * FROM Orders; DROP TABLE Orders"), db.clone()).await;

    let err = chat.ask("drop it").await.unwrap_err();
    assert!(matches!(
        err,
        GenieError::Rejected(RejectionKind::MultipleStatements)
    ));
    assert_eq!(err.status_code(), 400);
    assert!(db.executed().is_empty());
}

#[tokio::test]
async fn schema_prompt_is_passed_to_the_model() {
    let generator = CannedGenerator::sql("SELECT 1");
    let db = Arc::new(RecordingDatabase::default());
    let chat = service(generator.clone(), db).await;

    chat.ask("count customers").await.unwrap();
    let prompts = generator.prompts.lock().unwrap().clone();
    assert_eq!(
        prompts,
        vec!["[dbo].[Customers] (BASE TABLE)\n  - Id: int NOT NULL\n  - Name: nvarchar NOT NULL\ncount customers"]
    );
}

#[tokio::test]
async fn empty_question_is_an_invalid_request() {
    let generator = CannedGenerator::sql("SELECT 1");
    let db = Arc::new(RecordingDatabase::default());
    let chat = service(generator.clone(), db).await;

    let err = chat.ask("   ").await.unwrap_err();
    assert!(matches!(err, GenieError::InvalidRequest(_)));
    assert!(generator.prompts.lock().unwrap().is_empty());
}

fn state(chat: ChatService, cors_origins: &[&str]) -> AppState {
    AppState {
        chat,
        cors_origins: cors_origins.iter().map(|s| s.to_string()).collect(),
    }
}

fn split_response(response: &str) -> (u16, String, Value) {
    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(body).unwrap()
    };
    (status, head.to_string(), body)
}

fn post_chat(body: &str) -> String {
    format!(
        "POST /chat HTTP/1.1\r\nHost: localhost\r\nOrigin: http://localhost:5173\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
}

#[tokio::test]
async fn router_serves_health_tables_and_schema() {
    let db = Arc::new(RecordingDatabase::default());
    let state = state(service(CannedGenerator::sql("SELECT 1"), db).await, &[]);

    let (status, head, body) =
        split_response(&handle_request(&state, "GET /health HTTP/1.1\r\n\r\n").await);
    assert_eq!(status, 200);
    assert!(head.contains("Access-Control-Allow-Origin: *"));
    assert_eq!(body, json!({"status": "ok", "service": "sqlgenie"}));

    let (_, _, body) = split_response(&handle_request(&state, "GET /tables HTTP/1.1\r\n\r\n").await);
    assert_eq!(body, json!({"tables": ["[dbo].[Customers]"]}));

    let (_, _, body) = split_response(&handle_request(&state, "GET /schema HTTP/1.1\r\n\r\n").await);
    assert_eq!(body["tables"][0]["type"], "BASE TABLE");
    assert_eq!(body["tables"][0]["columns"][1]["name"], "Name");

    let (status, _, body) =
        split_response(&handle_request(&state, "GET /nope HTTP/1.1\r\n\r\n").await);
    assert_eq!(status, 404);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn router_maps_chat_outcomes_to_statuses() {
    let db = Arc::new(RecordingDatabase::default());
    let chat = service(CannedGenerator::sql("SELECT Name FROM [dbo].[Customers]"), db.clone()).await;
    let state = state(chat, &["http://localhost:5173"]);

    let (status, head, body) =
        split_response(&handle_request(&state, &post_chat(r#"{"question":"names"}"#)).await);
    assert_eq!(status, 200);
    assert!(head.contains("Access-Control-Allow-Origin: http://localhost:5173"));
    assert_eq!(body["sql"], "SELECT TOP (100) Name FROM [dbo].[Customers]");
    assert_eq!(body["rows"][0], json!([1, "Customer 1"]));

    let (status, _, body) = split_response(&handle_request(&state, &post_chat("not json")).await);
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "invalid_request");

    let (status, _, _) =
        split_response(&handle_request(&state, &post_chat(r#"{"question":""}"#)).await);
    assert_eq!(status, 400);
    assert_eq!(db.executed().len(), 1);
}

#[tokio::test]
async fn router_reports_rejections_and_upstream_failures() {
    let db = Arc::new(RecordingDatabase::default());
    let rejecting = state(
        service(CannedGenerator::sql("SELECT * FROM Orders -- drop everything"), db.clone()).await,
        &[],
    );
    let (status, _, body) =
        split_response(&handle_request(&rejecting, &post_chat(r#"{"question":"q"}"#)).await);
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "comments_not_allowed");
    assert_eq!(body["error"], "SQL comments are not allowed");

    let llm_down = state(service(CannedGenerator::failing("quota exceeded"), db.clone()).await, &[]);
    let (status, _, body) =
        split_response(&handle_request(&llm_down, &post_chat(r#"{"question":"q"}"#)).await);
    assert_eq!(status, 502);
    assert_eq!(body["kind"], "llm");

    let slow_db = Arc::new(RecordingDatabase {
        timeout: true,
        ..Default::default()
    });
    let timing_out = state(service(CannedGenerator::sql("SELECT 1"), slow_db).await, &[]);
    let (status, _, body) =
        split_response(&handle_request(&timing_out, &post_chat(r#"{"question":"q"}"#)).await);
    assert_eq!(status, 504);
    assert_eq!(body["kind"], "query_timeout");

    assert!(db.executed().is_empty());
}

#[tokio::test]
async fn preflight_and_foreign_origins() {
    let db = Arc::new(RecordingDatabase::default());
    let state = state(
        service(CannedGenerator::sql("SELECT 1"), db).await,
        &["http://localhost:5173"],
    );

    let (status, head, body) = split_response(
        &handle_request(
            &state,
            "OPTIONS /chat HTTP/1.1\r\nOrigin: http://localhost:5173\r\n\r\n",
        )
        .await,
    );
    assert_eq!(status, 200);
    assert!(head.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));
    assert_eq!(body, Value::Null);

    let (_, head, _) = split_response(
        &handle_request(&state, "GET /health HTTP/1.1\r\nOrigin: http://evil.example\r\n\r\n")
            .await,
    );
    assert!(!head.contains("Access-Control-Allow-Origin"));
}
