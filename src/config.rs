//! Service Configuration
//!
//! Everything is read once at startup into plain structs and passed down
//! explicitly. Parsing goes through a lookup function so tests can feed a
//! map instead of the process environment.

use crate::db::MssqlConfig;
use crate::error::{GenieError, Result};
use crate::guard::{GuardPolicy, DEFAULT_FORBIDDEN_TOKENS, DEFAULT_MAX_ROWS};
use crate::llm::{GeminiConfig, DEFAULT_BASE_URL};
use std::time::Duration;

pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Empty means any origin.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub guard: GuardPolicy,
    pub database: MssqlConfig,
    pub llm: GeminiConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            guard: guard_policy_from_lookup(&lookup)?,
            database: database_from_lookup(&lookup)?,
            llm: llm_from_lookup(&lookup)?,
            server: server_from_lookup(&lookup),
        })
    }
}

/// Reads a process variable as-is; empty values are kept.
pub fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

pub fn guard_policy_from_env() -> Result<GuardPolicy> {
    guard_policy_from_lookup(&env_lookup)
}

pub fn guard_policy_from_lookup<F>(lookup: &F) -> Result<GuardPolicy>
where
    F: Fn(&str) -> Option<String>,
{
    let max_rows = match value(lookup, "SQL_GUARD_MAX_ROWS") {
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
            GenieError::Config(format!("SQL_GUARD_MAX_ROWS must be a positive integer: {}", e))
        })?,
        None => DEFAULT_MAX_ROWS,
    };

    let policy = match value(lookup, "SQL_GUARD_FORBIDDEN_TOKENS") {
        Some(raw) => GuardPolicy::new(max_rows, split_list(&raw))?,
        None => GuardPolicy::new(max_rows, DEFAULT_FORBIDDEN_TOKENS)?,
    };

    Ok(match value(lookup, "SQL_GUARD_EXTRA_FORBIDDEN_TOKENS") {
        Some(raw) => policy.with_extra_forbidden(split_list(&raw)),
        None => policy,
    })
}

pub fn database_from_lookup<F>(lookup: &F) -> Result<MssqlConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let port = match value(lookup, "MSSQL_PORT") {
        Some(raw) => raw
            .trim()
            .parse::<u16>()
            .map_err(|e| GenieError::Config(format!("MSSQL_PORT is not a valid port: {}", e)))?,
        None => 1433,
    };

    // unparsable timeouts fall back to the default; anything below 1s is raised to 1s
    let query_timeout = value(lookup, "MSSQL_QUERY_TIMEOUT_SECONDS")
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .map(|secs| secs.max(1) as u64)
        .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);

    Ok(MssqlConfig {
        host: value(lookup, "MSSQL_SERVER").unwrap_or_else(|| "localhost".to_string()),
        port,
        database: required(lookup, "MSSQL_DATABASE")?,
        username: required(lookup, "MSSQL_USERNAME")?,
        // an empty password is a valid SQL login password
        password: lookup("MSSQL_PASSWORD")
            .ok_or_else(|| GenieError::Config("Missing required env var MSSQL_PASSWORD".to_string()))?,
        encrypt: flag(lookup, "MSSQL_ENCRYPT", false),
        trust_server_certificate: flag(lookup, "MSSQL_TRUST_SERVER_CERTIFICATE", true),
        connect_timeout: CONNECT_TIMEOUT,
        query_timeout: Duration::from_secs(query_timeout),
    })
}

pub fn llm_from_lookup<F>(lookup: &F) -> Result<GeminiConfig>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(GeminiConfig {
        api_key: required(lookup, "GOOGLE_API_KEY")?,
        model: value(lookup, "GEMINI_MODEL").map(|m| m.trim().to_string()),
        base_url: value(lookup, "GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
    })
}

pub fn server_from_lookup<F>(lookup: &F) -> ServerConfig
where
    F: Fn(&str) -> Option<String>,
{
    ServerConfig {
        bind: value(lookup, "SQLGENIE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
        cors_origins: split_list(
            &lookup("CORS_ORIGINS").unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string()),
        ),
    }
}

/// A set, non-blank variable.
fn value<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn required<F>(lookup: &F, name: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    value(lookup, name).ok_or_else(|| GenieError::Config(format!("Missing required env var {}", name)))
}

fn flag<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    value(lookup, name)
        .map(|v| parse_bool(&v))
        .unwrap_or(default)
}

pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("MSSQL_DATABASE", "sales"),
            ("MSSQL_USERNAME", "reader"),
            ("MSSQL_PASSWORD", "secret"),
            ("GOOGLE_API_KEY", "key"),
        ]
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(lookup_from(&minimal())).unwrap();
        assert_eq!(config.guard.max_rows(), 100);
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 1433);
        assert!(!config.database.encrypt);
        assert!(config.database.trust_server_certificate);
        assert_eq!(config.database.query_timeout, Duration::from_secs(30));
        assert_eq!(config.llm.model, None);
        assert_eq!(config.llm.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(config.server.cors_origins, vec!["http://localhost:5173"]);
    }

    #[test]
    fn missing_credentials_are_config_errors() {
        let err = AppConfig::from_lookup(lookup_from(&[("GOOGLE_API_KEY", "key")])).unwrap_err();
        assert!(matches!(err, GenieError::Config(msg) if msg.contains("MSSQL_DATABASE")));
    }

    #[test]
    fn empty_password_is_kept_but_unset_is_an_error() {
        let mut pairs = minimal();
        pairs.retain(|(k, _)| *k != "MSSQL_PASSWORD");
        pairs.push(("MSSQL_PASSWORD", ""));
        let config = database_from_lookup(&lookup_from(&pairs)).unwrap();
        assert_eq!(config.password, "");

        pairs.retain(|(k, _)| *k != "MSSQL_PASSWORD");
        let err = database_from_lookup(&lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, GenieError::Config(msg) if msg.contains("MSSQL_PASSWORD")));
    }

    #[test]
    fn blank_optional_values_fall_back_to_defaults() {
        let mut pairs = minimal();
        pairs.push(("MSSQL_SERVER", " "));
        pairs.push(("MSSQL_PORT", ""));
        let config = database_from_lookup(&lookup_from(&pairs)).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1433);
    }

    #[test]
    fn guard_settings_are_parsed() {
        let lookup = lookup_from(&[
            ("SQL_GUARD_MAX_ROWS", "25"),
            ("SQL_GUARD_FORBIDDEN_TOKENS", "DROP, xp_*"),
            ("SQL_GUARD_EXTRA_FORBIDDEN_TOKENS", "PIVOT"),
        ]);
        let policy = guard_policy_from_lookup(&lookup).unwrap();
        assert_eq!(policy.max_rows(), 25);
        assert_eq!(policy.forbidden_match("pivot").as_deref(), Some("PIVOT"));
        assert_eq!(policy.forbidden_match("xp_cmdshell").as_deref(), Some("XP_CMDSHELL"));
        assert_eq!(policy.forbidden_match("DELETE"), None);
    }

    #[test]
    fn zero_or_garbage_row_cap_is_rejected() {
        assert!(guard_policy_from_lookup(&lookup_from(&[("SQL_GUARD_MAX_ROWS", "0")])).is_err());
        assert!(guard_policy_from_lookup(&lookup_from(&[("SQL_GUARD_MAX_ROWS", "many")])).is_err());
    }

    #[test]
    fn query_timeout_is_clamped_and_tolerant() {
        let mut pairs = minimal();
        pairs.push(("MSSQL_QUERY_TIMEOUT_SECONDS", "0"));
        let config = database_from_lookup(&lookup_from(&pairs)).unwrap();
        assert_eq!(config.query_timeout, Duration::from_secs(1));

        let mut pairs = minimal();
        pairs.push(("MSSQL_QUERY_TIMEOUT_SECONDS", "soon"));
        let config = database_from_lookup(&lookup_from(&pairs)).unwrap();
        assert_eq!(config.query_timeout, Duration::from_secs(30));
    }

    #[test]
    fn bools_and_lists_parse_loosely() {
        assert!(parse_bool(" YES "));
        assert!(parse_bool("on"));
        assert!(!parse_bool("off"));
        assert_eq!(split_list(" a, ,b ,"), vec!["a", "b"]);

        let server = server_from_lookup(&lookup_from(&[("CORS_ORIGINS", ",")]));
        assert!(server.cors_origins.is_empty());
    }
}
