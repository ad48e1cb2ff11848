use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlgenie::config::{self, AppConfig};
use sqlgenie::db::{Database, MssqlDatabase};
use sqlgenie::guard::{GuardPolicy, SqlGuard};
use sqlgenie::llm::GeminiClient;
use sqlgenie::server::{self, AppState};
use sqlgenie::ChatService;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlgenie")]
#[command(about = "Natural-language questions over SQL Server, behind a read-only SQL guard")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Listen address (default: SQLGENIE_BIND or 0.0.0.0:8000)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Validate one SQL string and print the verdict as JSON
    Validate {
        sql: String,

        /// Override the configured row cap
        #[arg(long)]
        max_rows: Option<u64>,
    },
    /// Print the schema block the model is prompted with
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    match Cli::parse().command {
        Command::Serve { bind } => serve(bind).await,
        Command::Validate { sql, max_rows } => validate(&sql, max_rows),
        Command::Schema => {
            let database = config::database_from_lookup(&config::env_lookup)?;
            let schema = MssqlDatabase::new(database).load_schema().await?;
            println!("{}", schema.to_prompt_string());
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(bind: Option<String>) -> Result<()> {
    let config = AppConfig::from_env()?;
    info!(database = ?config.database, max_rows = config.guard.max_rows(), "SQLGenie starting");

    let database: Arc<dyn Database> = Arc::new(MssqlDatabase::new(config.database.clone()));
    let generator = Arc::new(GeminiClient::connect(config.llm.clone()).await?);
    let chat = ChatService::bootstrap(generator, database, SqlGuard::new(config.guard.clone()))
        .await
        .context("failed to load database schema")?;

    let bind = bind.unwrap_or(config.server.bind);
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;

    let state = Arc::new(AppState {
        chat,
        cors_origins: config.server.cors_origins,
    });
    server::serve(listener, state).await?;
    Ok(())
}

fn validate(sql: &str, max_rows: Option<u64>) -> Result<()> {
    let mut policy = config::guard_policy_from_env()?;
    if let Some(cap) = max_rows {
        policy = GuardPolicy::new(cap, policy.forbidden_patterns().iter().map(|p| p.to_string()))?;
    }

    let verdict = SqlGuard::new(policy).validate(sql);
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    if !verdict.is_accepted() {
        std::process::exit(1);
    }
    Ok(())
}
