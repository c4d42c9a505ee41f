use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::RngCore;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aegis_guard::bot_scoring::BotScorer;
use aegis_guard::clock::{seconds, SystemClock};
use aegis_guard::config::{GuardConfig, SecretKey};
use aegis_guard::events::RecordingEventSink;
use aegis_guard::fingerprint::FingerprintSigner;
use aegis_guard::request::RequestContext;
use aegis_guard::session::storage::FileSessionBackend;
use aegis_guard::session::store::purge_idle_sessions;

#[derive(Parser)]
#[command(name = "aegis-guard")]
#[command(author = "AEGIS Team")]
#[command(version = "0.1.0")]
#[command(about = "Inspect fingerprint cookies and bot scores with an AEGIS guard configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a raw 64-hex fingerprint
    Sign {
        /// Raw fingerprint value
        raw: String,

        /// Guard configuration file
        #[arg(long)]
        config: PathBuf,
    },

    /// Classify an fpid cookie value and show the reconciling action
    Classify {
        /// Cookie value as received
        cookie: String,

        #[arg(long)]
        config: PathBuf,
    },

    /// Score a request described as JSON
    Score {
        /// JSON file with method, path, headers, cookies, query, form, remote_ip
        #[arg(long)]
        request: PathBuf,

        #[arg(long)]
        config: PathBuf,
    },

    /// Remove file-backed sessions idle longer than `max_idle_secs`
    PurgeSessions {
        #[arg(long)]
        config: PathBuf,
    },

    /// Load and validate a configuration file
    CheckConfig {
        path: PathBuf,
    },

    /// Write a default configuration with a freshly generated secret
    InitConfig {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,aegis_guard=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sign { raw, config } => sign(&raw, &config),
        Commands::Classify { cookie, config } => classify(&cookie, &config),
        Commands::Score { request, config } => score(&request, &config),
        Commands::PurgeSessions { config } => purge_sessions(&config),
        Commands::CheckConfig { path } => check_config(&path),
        Commands::InitConfig { path, force } => init_config(&path, force),
    }
}

fn load_config(path: &Path) -> Result<GuardConfig> {
    GuardConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn sign(raw: &str, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let signer = FingerprintSigner::from_config(&config.fingerprint)?;
    let signature = signer.sign(raw)?;
    print_json(&json!({
        "raw": raw,
        "signature": signature,
        "cookie": format!("{}|{}", raw, signature),
    }))
}

fn classify(cookie: &str, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let signer = FingerprintSigner::from_config(&config.fingerprint)?;
    print_json(&json!({
        "state": signer.classify(cookie),
        "action": signer.reconcile(cookie),
    }))
}

fn score(request_path: &Path, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let request = load_request(request_path)?;

    let signer = match FingerprintSigner::from_config(&config.fingerprint) {
        Ok(signer) => signer,
        Err(e) => {
            warn!("Scoring without fingerprint verification: {}", e);
            FingerprintSigner::unconfigured()
        }
    };

    let sink = Arc::new(RecordingEventSink::new());
    let scorer = BotScorer::new(config.bot.clone(), Arc::new(signer))?
        .with_fingerprint_cookie(&config.fingerprint.cookie_name)
        .with_event_sink(sink.clone());

    let result = scorer.score(&request);
    let events: Vec<_> = sink
        .events()
        .into_iter()
        .map(|event| json!({ "name": event.name, "data": event.data }))
        .collect();

    print_json(&json!({
        "score": result.score,
        "likely_bot": result.is_likely_bot(scorer.threshold()),
        "reasons": result.reasons,
        "events": events,
    }))
}

fn load_request(path: &Path) -> Result<RequestContext> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read request {}", path.display()))?;
    let request: RequestContext =
        serde_json::from_str(&body).context("request file is not a valid request description")?;
    Ok(request.normalized())
}

fn purge_sessions(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let backend = FileSessionBackend::from_config(&config.session)?;
    let removed = purge_idle_sessions(
        &backend,
        &SystemClock,
        seconds(config.session.max_idle_secs),
    )?;
    print_json(&json!({ "dir": backend.dir().display().to_string(), "removed": removed }))
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    config
        .validate()
        .with_context(|| format!("{} is not a valid configuration", path.display()))?;
    info!("Configuration {} is valid", path.display());
    print_json(&json!({ "valid": true, "path": path.display().to_string() }))
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);

    let mut config = GuardConfig::default();
    config.fingerprint.secret_key = SecretKey::new(hex::encode(secret));
    config.validate()?;
    config
        .to_file(path)
        .with_context(|| format!("failed to write {}", path.display()))?;

    info!("Wrote default configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_verification() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_has_version() {
        let cmd = Cli::command();
        assert_eq!(cmd.get_version(), Some("0.1.0"));
    }

    #[test]
    fn test_init_then_check_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("guard.toml");
        init_config(&path, false).unwrap();
        assert!(init_config(&path, false).is_err());
        init_config(&path, true).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.fingerprint.secret_key.len(), 64);
        check_config(&path).unwrap();
    }

    #[test]
    fn test_request_file_is_normalized() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("request.json");
        fs::write(
            &path,
            r#"{"method": "trace", "path": "/admin?q=1", "headers": [["cookie", "fpid=x"]]}"#,
        )
        .unwrap();

        let request = load_request(&path).unwrap();
        assert_eq!(request.method, "TRACE");
        assert_eq!(request.path, "/admin");
        assert_eq!(request.cookie("fpid"), Some("x"));

        let config_path = temp_dir.path().join("guard.toml");
        init_config(&config_path, false).unwrap();
        score(&path, &config_path).unwrap();
    }

    #[test]
    fn test_purge_sessions_needs_storage_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("guard.toml");
        init_config(&config_path, false).unwrap();
        assert!(purge_sessions(&config_path).is_err());

        let mut config = load_config(&config_path).unwrap();
        config.session.storage_dir = Some(temp_dir.path().join("sessions"));
        config.to_file(&config_path).unwrap();
        purge_sessions(&config_path).unwrap();
        assert!(temp_dir.path().join("sessions").is_dir());
    }
}
