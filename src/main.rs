use anyhow::{Context, Result};
use reqwest::Method;
use std::sync::Arc;

use admin_api_client::{
    config::{Command, Config, LogFormat},
    ApiClient, ApiRequest, FileTokenStore, Notice, Notifier, SessionEvent,
};

/// Prints notices to stderr, one line each
struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, notice: &Notice) {
        match notice.status {
            Some(status) => eprintln!("⚠️  [{}] {}", status, notice.message),
            None => eprintln!("⚠️  {}", notice.message),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    tracing::debug!("Session file: {}", config.token_file.display());
    let store = Arc::new(FileTokenStore::open(config.token_file.clone()));

    let client = ApiClient::builder(config)
        .token_store(store)
        .notifier(Arc::new(StderrNotifier))
        .build()?;

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event == SessionEvent::Unauthorized {
                eprintln!("🔒 Session expired. Run `admin-client login` to sign in again.");
            }
        }
    });

    match command {
        Command::Request {
            method,
            path,
            data,
            query,
            quiet,
        } => run_request(&client, &method, &path, data, &query, quiet).await,
        Command::Login { email, password } => {
            let user = client.login(&email, &password).await?;
            println!("✅ Logged in as {}", email);
            if let Some(user) = user {
                println!("{}", serde_json::to_string_pretty(&user)?);
            }
            Ok(())
        }
        Command::Logout => {
            client.logout().await;
            println!("👋 Logged out");
            Ok(())
        }
        Command::Whoami => {
            match client.current_user() {
                Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
                None => println!("Not logged in"),
            }
            Ok(())
        }
    }
}

async fn run_request(
    client: &ApiClient,
    method: &str,
    path: &str,
    data: Option<String>,
    query: &[String],
    quiet: bool,
) -> Result<()> {
    let method: Method = method
        .to_uppercase()
        .parse()
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let mut request = ApiRequest::new(method, path);
    if let Some(data) = data {
        let body: serde_json::Value =
            serde_json::from_str(&data).context("--data must be valid JSON")?;
        request = request.json(&body);
    }
    for pair in query {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Query parameter must be key=value: {}", pair))?;
        request = request.query(key, value);
    }
    if quiet {
        request = request.skip_error_toast();
    }

    let response = client.send(request).await?;
    match response.json::<serde_json::Value>() {
        Ok(json) if !json.is_null() => println!("{}", serde_json::to_string_pretty(&json)?),
        Ok(_) => println!("{}", response.status),
        Err(_) => println!("{}", response.text()),
    }
    Ok(())
}
