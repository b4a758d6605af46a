use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use teleshare_core::config::resolve_config_dir;
use teleshare_core::{
    Settings, SessionManager, SmbConnector, TransferEngine, TransferOptions, TransferRequest,
    init_logging, load_settings,
};

#[derive(Parser)]
#[command(name = "teleshare")]
#[command(about = "Teleshare CLI (SMB backup target tools)", long_about = None)]
struct Cli {
    #[arg(long)]
    json: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the configured share and disconnect again.
    Status,
    /// Back up one local file into the backup directory.
    Upload {
        #[arg(long)]
        file: PathBuf,
        /// Remote filename; defaults to the local file's name.
        #[arg(long)]
        name: Option<String>,
    },
    Settings {
        #[command(subcommand)]
        cmd: SettingsCmd,
    },
}

#[derive(Subcommand)]
enum SettingsCmd {
    Get,
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: true,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

impl From<teleshare_core::Error> for CliError {
    fn from(e: teleshare_core::Error) -> Self {
        map_core_err(e)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = resolve_config_dir(cli.config_dir);
    let settings = effective_settings(&config_dir)?;
    init_logging(settings.logging.format);

    match cli.cmd {
        Command::Status => status(&settings, cli.json).await,
        Command::Upload { file, name } => upload(&settings, file, name, cli.json).await,
        Command::Settings { cmd } => match cmd {
            SettingsCmd::Get => settings_get(&config_dir, &settings, cli.json),
        },
    }
}

fn effective_settings(config_dir: &Path) -> Result<Settings, CliError> {
    let mut settings = load_settings(config_dir)?;
    settings.apply_env()?;
    Ok(settings)
}

fn engine(settings: &Settings) -> Result<TransferEngine<SmbConnector>, CliError> {
    let share = settings.remote_share_config()?;
    Ok(TransferEngine::new(
        SessionManager::new(share, SmbConnector),
        TransferOptions {
            on_probe_failure: settings.transfer.on_probe_failure,
            now: None,
        },
    ))
}

async fn status(settings: &Settings, json: bool) -> Result<(), CliError> {
    let engine = engine(settings)?;
    let sessions = engine.sessions();
    let config = sessions.config();

    let mut session = sessions.open().await.map_err(|e| {
        CliError::retryable("smb.unavailable", e.to_string()).with_details(serde_json::json!({
            "server": config.server(),
            "port": config.port(),
            "share": config.share(),
        }))
    })?;
    if let Err(e) = session.close().await {
        tracing::warn!(event = "session.close_failed", error = %e, "session.close_failed");
    }

    if json {
        println!(
            "{}",
            serde_json::json!({
                "connected": true,
                "server": config.server(),
                "port": config.port(),
                "share": config.share(),
                "backupDirectory": config.backup_directory(),
            })
        );
    } else {
        println!("connected=true");
        println!("share={}", config.unc_share_path());
        println!("backupDirectory={}", config.backup_directory());
    }
    Ok(())
}

async fn upload(
    settings: &Settings,
    file: PathBuf,
    name: Option<String>,
    json: bool,
) -> Result<(), CliError> {
    let meta = std::fs::metadata(&file).map_err(|e| {
        CliError::new("file.unreadable", format!("{}: {e}", file.display()))
    })?;
    if !meta.is_file() {
        return Err(CliError::new(
            "file.unreadable",
            format!("{} is not a regular file", file.display()),
        ));
    }

    let name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                CliError::new(
                    "request.invalid",
                    "cannot derive a filename; pass --name",
                )
            })?,
    };

    let engine = engine(settings)?;
    let request = TransferRequest::new(&file, name)?;
    let outcome = engine.backup(&request).await;

    let (true, Some(remote_path)) = (outcome.success, outcome.remote_path.as_deref()) else {
        return Err(CliError::retryable(
            "upload.failed",
            outcome
                .diagnostic
                .clone()
                .unwrap_or_else(|| "upload failed".to_string()),
        )
        .with_details(serde_json::json!({ "file": file.display().to_string() })));
    };

    if json {
        println!(
            "{}",
            serde_json::json!({ "remotePath": remote_path, "bytes": outcome.bytes })
        );
    } else {
        println!("{remote_path}");
    }
    Ok(())
}

fn settings_get(config_dir: &Path, settings: &Settings, json: bool) -> Result<(), CliError> {
    let redacted = settings.redacted();
    if json {
        println!(
            "{}",
            serde_json::json!({
                "configDir": config_dir.display().to_string(),
                "settings": redacted,
            })
        );
    } else {
        let text = toml::to_string(&redacted)
            .map_err(|e| CliError::new("config.invalid", e.to_string()))?;
        print!("{text}");
        if !text.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

fn map_core_err(e: teleshare_core::Error) -> CliError {
    match e {
        teleshare_core::Error::InvalidConfig { message } => CliError::new("config.invalid", message),
        teleshare_core::Error::InvalidRequest { message } => {
            CliError::new("request.invalid", message)
        }
        e @ (teleshare_core::Error::Connection { .. } | teleshare_core::Error::Status { .. }) => {
            CliError::retryable("smb.unavailable", e.to_string())
        }
        teleshare_core::Error::Io(e) => CliError::new("io", e.to_string()),
        other => CliError::new("unknown", other.to_string()),
    }
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e).unwrap_or_else(|_| "{\"code\":\"unknown\",\"message\":\"json encode failed\",\"details\":{},\"retryable\":false}".to_string());
    let _ = writeln!(std::io::stderr(), "{json}");
}
