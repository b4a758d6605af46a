use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::naming::{collision_free_name, directory_chain, remote_path};
use crate::session::{RemoteAttributes, SessionManager, ShareConnector, ShareSession};
use crate::{Error, Result};

const MAX_RENAME_ATTEMPTS: u32 = 100;

/// What to do when the existence check before an upload cannot be answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeFailurePolicy {
    /// Upload under the original name. A transient probe error can then
    /// replace an existing object.
    #[default]
    Proceed,
    Abort,
}

#[derive(Debug)]
pub enum Probe {
    Exists(RemoteAttributes),
    NotExists,
    ProbeFailed(Error),
}

impl From<Result<Option<RemoteAttributes>>> for Probe {
    fn from(result: Result<Option<RemoteAttributes>>) -> Self {
        match result {
            Ok(Some(attrs)) => Self::Exists(attrs),
            Ok(None) => Self::NotExists,
            Err(e) => Self::ProbeFailed(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    local_path: PathBuf,
    desired_filename: String,
}

impl TransferRequest {
    pub fn new(local_path: impl Into<PathBuf>, desired_filename: impl Into<String>) -> Result<Self> {
        let desired_filename = desired_filename.into();
        validate_filename(&desired_filename)?;
        Ok(Self {
            local_path: local_path.into(),
            desired_filename,
        })
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn desired_filename(&self) -> &str {
        &self.desired_filename
    }
}

fn validate_filename(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("filename must not be empty")
    } else if name == "." || name == ".." {
        Some("filename must not be '.' or '..'")
    } else if name.contains(['/', '\\']) {
        Some("filename must not contain path separators")
    } else if name.chars().any(char::is_control) {
        Some("filename must not contain control characters")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(Error::InvalidRequest {
            message: format!("{reason}: {name:?}"),
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferOutcome {
    pub success: bool,
    pub remote_path: Option<String>,
    pub bytes: u64,
    pub diagnostic: Option<String>,
}

impl TransferOutcome {
    fn succeeded(remote_path: String, bytes: u64) -> Self {
        Self {
            success: true,
            remote_path: Some(remote_path),
            bytes,
            diagnostic: None,
        }
    }

    fn failed(diagnostic: String) -> Self {
        Self {
            success: false,
            diagnostic: Some(diagnostic),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    pub on_probe_failure: ProbeFailurePolicy,
    /// Fixed clock for the collision suffix; local time when unset.
    pub now: Option<NaiveDateTime>,
}

pub struct TransferEngine<C> {
    sessions: SessionManager<C>,
    options: TransferOptions,
}

impl<C: ShareConnector> TransferEngine<C> {
    pub fn new(sessions: SessionManager<C>, options: TransferOptions) -> Self {
        Self { sessions, options }
    }

    pub fn sessions(&self) -> &SessionManager<C> {
        &self.sessions
    }

    /// Uploads one local file into the backup directory. Never returns an
    /// error: every failure is logged and folded into the outcome.
    pub async fn backup(&self, request: &TransferRequest) -> TransferOutcome {
        let mut session = match self.sessions.open().await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    event = "transfer.aborted",
                    filename = %request.desired_filename(),
                    error = %e,
                    "transfer.aborted"
                );
                return TransferOutcome::failed(e.to_string());
            }
        };

        let result = self.transfer(session.as_mut(), request).await;

        if let Err(e) = session.close().await {
            warn!(event = "session.close_failed", error = %e, "session.close_failed");
        }

        match result {
            Ok((path, bytes)) => {
                info!(
                    event = "transfer.succeeded",
                    path = %path,
                    bytes,
                    "transfer.succeeded"
                );
                TransferOutcome::succeeded(path, bytes)
            }
            Err(e) => {
                error!(
                    event = "transfer.failed",
                    filename = %request.desired_filename(),
                    local_path = %request.local_path().display(),
                    error = %e,
                    "transfer.failed"
                );
                TransferOutcome::failed(e.to_string())
            }
        }
    }

    async fn transfer(
        &self,
        session: &mut dyn ShareSession,
        request: &TransferRequest,
    ) -> Result<(String, u64)> {
        let directory = self.sessions.config().backup_directory();
        ensure_directory(session, directory).await;

        let path = self
            .resolve_path(session, directory, request.desired_filename())
            .await?;

        let mut file = tokio::fs::File::open(request.local_path())
            .await
            .map_err(|e| Error::Upload {
                path: path.clone(),
                message: format!("open {} failed: {e}", request.local_path().display()),
            })?;
        let bytes = session
            .store_file(&path, &mut file)
            .await
            .map_err(|e| match e {
                Error::Upload { .. } => e,
                other => Error::Upload {
                    path: path.clone(),
                    message: other.to_string(),
                },
            })?;
        Ok((path, bytes))
    }

    /// The desired name when it is free, otherwise the first free
    /// timestamped variant.
    async fn resolve_path(
        &self,
        session: &mut dyn ShareSession,
        directory: &str,
        desired: &str,
    ) -> Result<String> {
        let candidate = remote_path(directory, desired);
        let Some(existing) = self.occupant(session, &candidate).await? else {
            return Ok(candidate);
        };

        let at = self.now();
        for attempt in 0..MAX_RENAME_ATTEMPTS {
            let renamed = remote_path(directory, &collision_free_name(desired, at, attempt));
            if self.occupant(session, &renamed).await?.is_none() {
                info!(
                    event = "transfer.collision",
                    existing = %candidate,
                    existing_is_directory = existing.is_directory,
                    renamed = %renamed,
                    attempt,
                    "transfer.collision"
                );
                return Ok(renamed);
            }
        }
        Err(Error::Upload {
            path: candidate,
            message: format!("no free name after {MAX_RENAME_ATTEMPTS} attempts"),
        })
    }

    /// What sits at `path`, with a failed check resolved by the probe policy.
    async fn occupant(
        &self,
        session: &mut dyn ShareSession,
        path: &str,
    ) -> Result<Option<RemoteAttributes>> {
        match Probe::from(session.probe(path).await) {
            Probe::Exists(attrs) => Ok(Some(attrs)),
            Probe::NotExists => Ok(None),
            Probe::ProbeFailed(e) => {
                let policy = self.options.on_probe_failure;
                warn!(
                    event = "transfer.probe_failed",
                    path = %path,
                    error = %e,
                    policy = ?policy,
                    "transfer.probe_failed"
                );
                match policy {
                    ProbeFailurePolicy::Proceed => Ok(None),
                    ProbeFailurePolicy::Abort => Err(e),
                }
            }
        }
    }

    fn now(&self) -> NaiveDateTime {
        self.options
            .now
            .unwrap_or_else(|| Local::now().naive_local())
    }
}

/// Creates each level of `directory`. Failures are expected (the level
/// usually exists already) and never stop the transfer.
async fn ensure_directory(session: &mut dyn ShareSession, directory: &str) {
    for dir in directory_chain(directory) {
        match session.create_directory(&dir).await {
            Ok(()) => debug!(event = "directory.created", path = %dir, "directory.created"),
            Err(e) => debug!(
                event = "directory.create_skipped",
                path = %dir,
                error = %e,
                "directory.create_skipped"
            ),
        }
    }
}
