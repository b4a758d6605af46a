use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::transfer::ProbeFailurePolicy;
use crate::{Error, Result};

pub const DEFAULT_SMB_PORT: u16 = 445;
pub const DEFAULT_BACKUP_DIRECTORY: &str = "/";
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_POLL_TIMEOUT_SECS: u32 = 50;

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub smb: SmbSettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SmbSettings {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub share: Option<String>,
    #[serde(default = "default_smb_port")]
    pub port: u16,
    #[serde(default = "default_backup_directory")]
    pub backup_directory: String,
    #[serde(default)]
    pub domain: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub authorized_user_id: Option<i64>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u32,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default)]
    pub on_probe_failure: ProbeFailurePolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_smb_port() -> u16 {
    DEFAULT_SMB_PORT
}

fn default_backup_directory() -> String {
    DEFAULT_BACKUP_DIRECTORY.to_string()
}

fn default_api_base() -> String {
    DEFAULT_TELEGRAM_API_BASE.to_string()
}

fn default_poll_timeout_secs() -> u32 {
    DEFAULT_POLL_TIMEOUT_SECS
}

impl Default for SmbSettings {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            server: None,
            server_name: None,
            share: None,
            port: DEFAULT_SMB_PORT,
            backup_directory: default_backup_directory(),
            domain: String::new(),
        }
    }
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            authorized_user_id: None,
            api_base: default_api_base(),
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            download_dir: None,
        }
    }
}

impl fmt::Debug for SmbSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbSettings")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("server", &self.server)
            .field("server_name", &self.server_name)
            .field("share", &self.share)
            .field("port", &self.port)
            .field("backup_directory", &self.backup_directory)
            .field("domain", &self.domain)
            .finish()
    }
}

impl fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &self.bot_token.as_ref().map(|_| REDACTED))
            .field("authorized_user_id", &self.authorized_user_id)
            .field("api_base", &self.api_base)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("download_dir", &self.download_dir)
            .finish()
    }
}

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
}

/// `explicit`, then `TELESHARE_CONFIG_DIR`, then `$HOME/.config/teleshare`.
pub fn resolve_config_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os("TELESHARE_CONFIG_DIR").map(PathBuf::from))
        .unwrap_or_else(default_config_dir)
}

fn default_config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join("teleshare")
}

pub fn load_settings(config_dir: &Path) -> Result<Settings> {
    let path = config_path(config_dir);
    if !path.exists() {
        return Ok(Settings::default());
    }

    let text = std::fs::read_to_string(&path).map_err(|e| Error::InvalidConfig {
        message: format!("config read failed: {e}"),
    })?;

    parse_settings(&text).map_err(|e| Error::InvalidConfig {
        message: format!("config invalid: {e}"),
    })
}

pub fn parse_settings(text: &str) -> std::result::Result<Settings, toml::de::Error> {
    toml::from_str(text)
}

impl Settings {
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlays the process environment on top of the file settings.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let smb = &mut self.smb;
        if let Some(v) = lookup("SMB_USERNAME") {
            smb.username = Some(v);
        }
        if let Some(v) = lookup("SMB_PASSWORD") {
            smb.password = Some(v);
        }
        if let Some(v) = lookup("SMB_SERVER") {
            smb.server = Some(v);
        }
        if let Some(v) = lookup("SMB_SERVER_NAME") {
            smb.server_name = Some(v);
        }
        if let Some(v) = lookup("SMB_SHARE") {
            smb.share = Some(v);
        }
        if let Some(v) = lookup("SMB_PORT") {
            smb.port = v.trim().parse::<u16>().map_err(|_| Error::InvalidConfig {
                message: format!("SMB_PORT must be a port number, got {v:?}"),
            })?;
        }
        if let Some(v) = lookup("SMB_DOMAIN") {
            smb.domain = v;
        }
        if let Some(v) = lookup("BACKUP_DIRECTORY") {
            smb.backup_directory = v;
        }

        let telegram = &mut self.telegram;
        if let Some(v) = lookup("TELEGRAM_BOT_TOKEN") {
            telegram.bot_token = Some(v);
        }
        if let Some(v) = lookup("AUTHORIZED_USER_ID") {
            let id = v.trim().parse::<i64>().map_err(|_| Error::InvalidConfig {
                message: format!("AUTHORIZED_USER_ID must be an integer, got {v:?}"),
            })?;
            telegram.authorized_user_id = (id != 0).then_some(id);
        }

        if let Some(v) = lookup("TELESHARE_LOG_FORMAT") {
            self.logging.format = v.parse()?;
        }
        Ok(())
    }

    pub fn remote_share_config(&self) -> Result<RemoteShareConfig> {
        RemoteShareConfig::from_settings(&self.smb)
    }

    pub fn redacted(&self) -> Settings {
        let mut out = self.clone();
        if out.smb.password.is_some() {
            out.smb.password = Some(REDACTED.to_string());
        }
        if out.telegram.bot_token.is_some() {
            out.telegram.bot_token = Some(REDACTED.to_string());
        }
        out
    }
}

/// Connection settings for the remote share. Only constructed through
/// [`RemoteShareConfig::from_settings`], so every instance carries the
/// mandatory fields.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteShareConfig {
    username: String,
    password: String,
    server: String,
    server_name: String,
    share: String,
    port: u16,
    backup_directory: String,
    domain: String,
}

impl RemoteShareConfig {
    pub fn from_settings(smb: &SmbSettings) -> Result<Self> {
        let required = [
            ("SMB_USERNAME", &smb.username),
            ("SMB_PASSWORD", &smb.password),
            ("SMB_SERVER", &smb.server),
            ("SMB_SHARE", &smb.share),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, v)| v.as_deref().is_none_or(|s| s.trim().is_empty()))
            .map(|(k, _)| *k)
            .collect();
        if !missing.is_empty() {
            tracing::error!(
                event = "config.missing_settings",
                missing = %missing.join(", "),
                "config.missing_settings"
            );
            return Err(Error::InvalidConfig {
                message: format!("missing required SMB settings: {}", missing.join(", ")),
            });
        }
        if smb.port == 0 {
            return Err(Error::InvalidConfig {
                message: "smb.port must be > 0".to_string(),
            });
        }

        let share = smb.share.clone().unwrap_or_default();
        let share = share.trim().trim_matches(|c| c == '/' || c == '\\');
        if share.is_empty() || share.contains(['/', '\\']) {
            return Err(Error::InvalidConfig {
                message: format!("smb.share must be a single share name, got {share:?}"),
            });
        }

        Ok(Self {
            username: smb.username.clone().unwrap_or_default(),
            password: smb.password.clone().unwrap_or_default(),
            server: smb.server.clone().unwrap_or_default().trim().to_string(),
            server_name: smb
                .server_name
                .clone()
                .unwrap_or_default()
                .trim()
                .to_string(),
            share: share.to_string(),
            port: smb.port,
            backup_directory: normalize_directory(&smb.backup_directory)?,
            domain: smb.domain.trim().to_string(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn share(&self) -> &str {
        &self.share
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn backup_directory(&self) -> &str {
        &self.backup_directory
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// `\\host\share`, preferring the server display-name over the address.
    pub fn unc_share_path(&self) -> String {
        let host = if self.server_name.is_empty() {
            &self.server
        } else {
            &self.server_name
        };
        format!(r"\\{host}\{}", self.share)
    }
}

impl fmt::Debug for RemoteShareConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteShareConfig")
            .field("username", &self.username)
            .field("password", &REDACTED)
            .field("server", &self.server)
            .field("server_name", &self.server_name)
            .field("share", &self.share)
            .field("port", &self.port)
            .field("backup_directory", &self.backup_directory)
            .field("domain", &self.domain)
            .finish()
    }
}

fn normalize_directory(raw: &str) -> Result<String> {
    let raw = raw.trim().replace('\\', "/");
    let mut out = String::from("/");
    for segment in raw.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if segment == ".." {
            return Err(Error::InvalidConfig {
                message: format!("backup_directory must not contain '..': {raw:?}"),
            });
        }
        if out.len() > 1 {
            out.push('/');
        }
        out.push_str(segment);
    }
    Ok(out)
}
