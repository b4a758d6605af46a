use std::future::Future;
use std::pin::Pin;

use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};

use crate::config::RemoteShareConfig;
use crate::Result;

/// Workstation name presented to the server during authentication.
pub const CLIENT_NAME: &str = "TeleshareBackup";

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAttributes {
    pub is_directory: bool,
    pub size: u64,
}

/// An open, authenticated handle to one share. Paths are share-relative and
/// `/`-separated (`/backups/report.pdf`).
pub trait ShareSession: Send {
    fn create_directory<'a>(&'a mut self, path: &'a str) -> BoxFuture<'a, Result<()>>;

    /// `Ok(None)` when nothing exists at `path`; `Err` when the check itself
    /// could not be answered.
    fn probe<'a>(&'a mut self, path: &'a str) -> BoxFuture<'a, Result<Option<RemoteAttributes>>>;

    /// Creates or replaces the file at `path` with everything `source` yields.
    fn store_file<'a>(
        &'a mut self,
        path: &'a str,
        source: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> BoxFuture<'a, Result<u64>>;

    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

pub trait ShareConnector: Send + Sync {
    fn provider(&self) -> &'static str;

    fn connect<'a>(
        &'a self,
        config: &'a RemoteShareConfig,
    ) -> BoxFuture<'a, Result<Box<dyn ShareSession>>>;
}

/// Opens one fresh session per call. Nothing is cached between calls.
pub struct SessionManager<C> {
    config: RemoteShareConfig,
    connector: C,
}

impl<C: ShareConnector> SessionManager<C> {
    pub fn new(config: RemoteShareConfig, connector: C) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &RemoteShareConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub async fn open(&self) -> Result<Box<dyn ShareSession>> {
        debug!(
            event = "session.open",
            provider = self.connector.provider(),
            server = %self.config.server(),
            port = self.config.port(),
            share = %self.config.share(),
            "session.open"
        );
        match self.connector.connect(&self.config).await {
            Ok(session) => Ok(session),
            Err(e) => {
                error!(
                    event = "session.open_failed",
                    provider = self.connector.provider(),
                    server = %self.config.server(),
                    port = self.config.port(),
                    error = %e,
                    "session.open_failed"
                );
                Err(e)
            }
        }
    }

    /// Opens and immediately closes a session.
    pub async fn check(&self) -> bool {
        let mut session = match self.open().await {
            Ok(session) => session,
            Err(_) => return false,
        };
        if let Err(e) = session.close().await {
            warn!(event = "session.close_failed", error = %e, "session.close_failed");
        }
        info!(
            event = "session.check_ok",
            server = %self.config.server(),
            share = %self.config.share(),
            "session.check_ok"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SmbSettings;
    use crate::memory::InMemoryShare;

    fn config() -> RemoteShareConfig {
        RemoteShareConfig::from_settings(&SmbSettings {
            username: Some("u".to_string()),
            password: Some("p".to_string()),
            server: Some("127.0.0.1".to_string()),
            share: Some("s".to_string()),
            ..SmbSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn check_opens_and_closes_a_fresh_session_each_time() {
        let manager = SessionManager::new(config(), InMemoryShare::new());
        assert!(manager.check().await);
        assert!(manager.check().await);
        let calls = manager.connector().calls();
        assert_eq!(calls.opens, 2);
        assert_eq!(calls.closes, 2);
    }

    #[tokio::test]
    async fn refused_connection_is_reported_as_error() {
        let share = InMemoryShare::new();
        share.refuse_connections(true);
        let manager = SessionManager::new(config(), share);
        let err = match manager.open().await {
            Ok(_) => panic!("expected connection failure"),
            Err(e) => e,
        };
        assert!(matches!(err, crate::Error::Connection { .. }));
        assert!(!manager.check().await);
        assert_eq!(manager.connector().calls().closes, 0);
    }
}
