use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Admin API client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the admin API, including the version segment
    #[arg(short = 'u', long, env = "ADMIN_API_BASE_URL")]
    pub base_url: Option<String>,

    /// Host name the client acts for (tenant subdomain is derived from it)
    #[arg(short = 'H', long, env = "ADMIN_HOST")]
    pub host: Option<String>,

    /// Path of the persisted session file
    #[arg(short = 't', long, env = "ADMIN_TOKEN_FILE")]
    pub token_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Maximum retries on 503 Service Unavailable
    #[arg(long, env = "HTTP_MAX_RETRIES", default_value = "3")]
    pub http_retries: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Send a request through the client
    Request {
        /// HTTP method
        method: String,
        /// API path (with or without leading slash / version prefix)
        path: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
        /// Query parameter as key=value (repeatable)
        #[arg(short, long = "query")]
        query: Vec<String>,
        /// Suppress error notifications
        #[arg(long)]
        quiet: bool,
    },
    /// Log in and persist the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "ADMIN_PASSWORD")]
        password: String,
    },
    /// Log out and clear the persisted session
    Logout,
    /// Show the cached user profile
    Whoami,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL, read once at client construction
    pub base_url: String,

    /// Current host name, used for the tenant headers
    pub host: Option<String>,

    // Timeouts (seconds)
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // 503 retry policy
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    pub log_level: String,
    pub log_format: LogFormat,

    /// Session file for the file token store
    pub token_file: PathBuf,

    /// Also send the deprecated `X-Subdomain` header
    pub legacy_subdomain_header: bool,

    /// Page the navigator is sent to after an unrecoverable auth failure
    pub login_path: String,

    /// Path fragments of best-effort endpoints whose timeouts stay silent
    pub best_effort_endpoints: Vec<String>,

    /// Fallback bearer for local mock-auth builds (`dev-mock-auth` feature only)
    pub dev_fallback_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/v1".to_string(),
            host: None,
            http_connect_timeout: 10,
            http_request_timeout: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 5000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            token_file: default_token_file(),
            legacy_subdomain_header: true,
            login_path: "/login".to_string(),
            best_effort_endpoints: vec!["mark-as-read".to_string(), "mark-read".to_string()],
            dev_fallback_token: None,
        }
    }
}

impl Config {
    /// Config pointing at `base_url` with defaults everywhere else
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let command = args.command.clone();
        Ok((Self::from_args(args)?, command))
    }

    /// Build config from parsed CLI arguments plus ENV-only settings
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let defaults = Self::default();

        let base_url = args
            .base_url
            .or_else(|| std::env::var("ADMIN_API_BASE_URL").ok())
            .context("ADMIN_API_BASE_URL is required (use -u or set ADMIN_API_BASE_URL env var)")?;

        Ok(Config {
            base_url: base_url.trim_end_matches('/').to_string(),
            host: args.host,

            http_connect_timeout: env_parse("HTTP_CONNECT_TIMEOUT")
                .unwrap_or(defaults.http_connect_timeout),
            http_request_timeout: args.http_timeout,

            max_retries: args.http_retries,
            retry_base_delay_ms: env_parse("RETRY_BASE_DELAY_MS")
                .unwrap_or(defaults.retry_base_delay_ms),
            retry_max_delay_ms: env_parse("RETRY_MAX_DELAY_MS")
                .unwrap_or(defaults.retry_max_delay_ms),

            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),

            token_file: args
                .token_file
                .map(|s| expand_tilde(&s))
                .unwrap_or(defaults.token_file),

            legacy_subdomain_header: std::env::var("LEGACY_SUBDOMAIN_HEADER")
                .map(|s| parse_bool(&s))
                .unwrap_or(defaults.legacy_subdomain_header),

            login_path: std::env::var("ADMIN_LOGIN_PATH").unwrap_or(defaults.login_path),

            best_effort_endpoints: std::env::var("BEST_EFFORT_ENDPOINTS")
                .map(|s| parse_list(&s))
                .unwrap_or(defaults.best_effort_endpoints),

            dev_fallback_token: dev_fallback_token(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            anyhow::bail!(
                "ADMIN_API_BASE_URL must be an http(s) URL: {}",
                self.base_url
            );
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!(
                "RETRY_BASE_DELAY_MS ({}) exceeds RETRY_MAX_DELAY_MS ({})",
                self.retry_base_delay_ms,
                self.retry_max_delay_ms
            );
        }

        Ok(())
    }
}

#[cfg(feature = "dev-mock-auth")]
fn dev_fallback_token() -> Option<String> {
    std::env::var("ADMIN_DEV_TOKEN").ok().filter(|s| !s.is_empty())
}

#[cfg(not(feature = "dev-mock-auth"))]
fn dev_fallback_token() -> Option<String> {
    None
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Default session file location
fn default_token_file() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("admin-client").join("session.json"))
        .unwrap_or_else(|| PathBuf::from(".admin-client-session.json"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format("json"), LogFormat::Json);
        assert_eq!(parse_log_format("JSON"), LogFormat::Json);
        assert_eq!(parse_log_format("text"), LogFormat::Text);
        assert_eq!(parse_log_format("invalid"), LogFormat::Text);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool(""));
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list("mark-as-read, read-all ,,"),
            vec!["mark-as-read".to_string(), "read-all".to_string()]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay_ms, 1000);
        assert_eq!(config.retry_max_delay_ms, 5000);
        assert!(config.legacy_subdomain_header);
        assert_eq!(config.login_path, "/login");
        assert!(config.dev_fallback_token.is_none());
    }

    #[test]
    fn test_from_args_trims_base_url() {
        let args = CliArgs::parse_from([
            "admin-client",
            "-u",
            "https://api.example.com/v1/",
            "--http-retries",
            "5",
            "logout",
        ]);
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.base_url, "https://api.example.com/v1");
        assert_eq!(config.max_retries, 5);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_parse_request_command() {
        let args = CliArgs::parse_from([
            "admin-client",
            "-u",
            "https://api.example.com/v1",
            "request",
            "GET",
            "/v1/orders/123",
            "-q",
            "page=2",
            "--quiet",
        ]);
        assert_eq!(
            args.command,
            Command::Request {
                method: "GET".to_string(),
                path: "/v1/orders/123".to_string(),
                data: None,
                query: vec!["page=2".to_string()],
                quiet: true,
            }
        );
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = Config::with_base_url("ftp://api.example.com");
        assert_err!(config.validate());
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let config = Config {
            retry_base_delay_ms: 10_000,
            ..Config::with_base_url("https://api.example.com/v1")
        };
        assert_err!(config.validate());
    }
}
