//! Native SMB2 (2.0.2 / 2.1) client with NTLMv2 authentication.

mod conn;
pub mod ntlm;
pub mod spnego;
mod status;
pub mod wire;


use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::RemoteShareConfig;
use crate::session::{BoxFuture, CLIENT_NAME, RemoteAttributes, ShareConnector, ShareSession};
use crate::{Error, Result};

use conn::Connection;
pub use status::NtStatus;
use wire::{Command, CreateResponse, CreateSpec, FileId, protocol};

/// Upper bound for one WRITE payload. Larger writes would need multi-credit
/// requests.
pub const MAX_WRITE_CHUNK: usize = 64 * 1024;

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;

#[derive(Debug, Clone, Copy, Default)]
pub struct SmbConnector;

impl ShareConnector for SmbConnector {
    fn provider(&self) -> &'static str {
        "smb2"
    }

    fn connect<'a>(
        &'a self,
        config: &'a RemoteShareConfig,
    ) -> BoxFuture<'a, Result<Box<dyn ShareSession>>> {
        Box::pin(async move {
            let stream = TcpStream::connect((config.server(), config.port()))
                .await
                .map_err(|e| Error::Connection {
                    message: format!("connect {}:{} failed: {e}", config.server(), config.port()),
                })?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(event = "smb.nodelay_failed", error = %e, "smb.nodelay_failed");
            }

            let session = SmbSession::establish(stream, config)
                .await
                .map_err(|e| Error::Connection {
                    message: format!("{}: {e}", config.unc_share_path()),
                })?;
            let session: Box<dyn ShareSession> = Box::new(session);
            Ok(session)
        })
    }
}

/// An authenticated session with one tree connected.
pub struct SmbSession<S> {
    conn: Connection<S>,
    tree_id: u32,
    max_write: usize,
    closed: bool,
}

impl<S> SmbSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Negotiates, authenticates and connects the configured share.
    pub async fn establish(stream: S, config: &RemoteShareConfig) -> Result<Self> {
        let mut conn = Connection::new(stream);

        let mut client_guid = [0u8; 16];
        random_bytes(&mut client_guid)?;
        let negotiated = conn
            .request(
                Command::Negotiate,
                0,
                &wire::negotiate_request(client_guid, wire::SIGNING_ENABLED),
            )
            .await?
            .ok("negotiate")?;
        let negotiated = wire::parse_negotiate_response(&negotiated.message)?;
        if !wire::SUPPORTED_DIALECTS.contains(&negotiated.dialect) {
            return Err(protocol(format!(
                "server selected unsupported dialect 0x{:04x}",
                negotiated.dialect
            )));
        }
        conn.set_dialect(negotiated.dialect);

        authenticate(&mut conn, config, negotiated.security_mode).await?;
        debug!(
            event = "smb.authenticated",
            dialect = negotiated.dialect,
            signing = conn.is_signing(),
            session_id = conn.session_id(),
            "smb.authenticated"
        );

        let unc = config.unc_share_path();
        let tree = conn
            .request(Command::TreeConnect, 0, &wire::tree_connect_request(&unc)?)
            .await?
            .ok("tree connect")?;
        debug!(
            event = "smb.tree_connected",
            share = %unc,
            tree_id = tree.header.tree_id,
            "smb.tree_connected"
        );

        let max_write = match negotiated.max_write_size as usize {
            0 => MAX_WRITE_CHUNK,
            n => n.min(MAX_WRITE_CHUNK),
        };
        Ok(Self {
            conn,
            tree_id: tree.header.tree_id,
            max_write,
            closed: false,
        })
    }

    async fn open(&mut self, path: &str, spec: CreateSpec, op: &'static str) -> Result<CreateResponse> {
        if self.closed {
            return Err(protocol("session already closed"));
        }
        let body = wire::create_request(&wire::share_relative_name(path), spec)?;
        let resp = self
            .conn
            .request(Command::Create, self.tree_id, &body)
            .await?
            .ok(op)?;
        wire::parse_create_response(&resp.message)
    }

    async fn close_handle(&mut self, file_id: FileId) -> Result<()> {
        self.conn
            .request(Command::Close, self.tree_id, &wire::close_request(file_id))
            .await?
            .ok("close")?;
        Ok(())
    }

    async fn write_from(
        &mut self,
        file_id: FileId,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64> {
        let mut buf = vec![0u8; self.max_write];
        let mut offset = 0u64;
        loop {
            let n = fill(source, &mut buf).await?;
            if n == 0 {
                return Ok(offset);
            }
            let resp = self
                .conn
                .request(
                    Command::Write,
                    self.tree_id,
                    &wire::write_request(file_id, offset, &buf[..n]),
                )
                .await?
                .ok("write")?;
            let count = wire::parse_write_response(&resp.message)? as usize;
            if count != n {
                return Err(protocol(format!("short write: {count} of {n} bytes")));
            }
            offset += n as u64;
        }
    }
}

impl<S> ShareSession for SmbSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn create_directory<'a>(&'a mut self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let created = self.open(path, CreateSpec::MKDIR, "create_directory").await?;
            self.close_handle(created.file_id).await
        })
    }

    fn probe<'a>(&'a mut self, path: &'a str) -> BoxFuture<'a, Result<Option<RemoteAttributes>>> {
        Box::pin(async move {
            let opened = match self.open(path, CreateSpec::PROBE, "probe").await {
                Ok(opened) => opened,
                Err(e) if e.status().is_some_and(NtStatus::is_not_found) => return Ok(None),
                Err(e) => return Err(e),
            };
            if let Err(e) = self.close_handle(opened.file_id).await {
                debug!(event = "smb.close_failed", path, error = %e, "smb.close_failed");
            }
            Ok(Some(RemoteAttributes {
                is_directory: opened.is_directory(),
                size: opened.end_of_file,
            }))
        })
    }

    fn store_file<'a>(
        &'a mut self,
        path: &'a str,
        source: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let opened = self.open(path, CreateSpec::STORE, "store_file").await?;
            let written = self.write_from(opened.file_id, source).await;
            let closed = self.close_handle(opened.file_id).await;
            let written = written?;
            closed?;
            Ok(written)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;

            let tree = self
                .conn
                .request(Command::TreeDisconnect, self.tree_id, &wire::empty_request())
                .await
                .and_then(|r| r.ok("tree disconnect"));
            let logoff = self
                .conn
                .request(Command::Logoff, 0, &wire::empty_request())
                .await
                .and_then(|r| r.ok("logoff"));
            if let Err(e) = self.conn.shutdown().await {
                debug!(event = "smb.shutdown_failed", error = %e, "smb.shutdown_failed");
            }
            tree?;
            logoff?;
            Ok(())
        })
    }
}

async fn authenticate<S>(
    conn: &mut Connection<S>,
    config: &RemoteShareConfig,
    server_security_mode: u16,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let security_mode = wire::SIGNING_ENABLED as u8;

    let init = spnego::wrap_init(&ntlm::negotiate_message());
    let first = conn
        .request(
            Command::SessionSetup,
            0,
            &wire::session_setup_request(security_mode, &init)?,
        )
        .await?;
    if first.status() != NtStatus::MORE_PROCESSING_REQUIRED {
        return Err(Error::Status {
            op: "session setup",
            status: first.status(),
        });
    }
    conn.set_session_id(first.header.session_id);

    let setup = wire::parse_session_setup_response(&first.message)?;
    let challenge = ntlm::parse_challenge(&spnego::unwrap_response(&setup.security_buffer)?)?;

    let mut client_challenge = [0u8; 8];
    random_bytes(&mut client_challenge)?;
    let creds = ntlm::Credentials {
        user: config.username(),
        password: config.password(),
        domain: config.domain(),
        workstation: CLIENT_NAME,
    };
    let auth = ntlm::authenticate_message(&creds, &challenge, client_challenge, filetime_now());

    let second = conn
        .request(
            Command::SessionSetup,
            0,
            &wire::session_setup_request(security_mode, &spnego::wrap_response(&auth.message))?,
        )
        .await?
        .ok("session setup")?;
    let done = wire::parse_session_setup_response(&second.message)?;

    if server_security_mode & wire::SIGNING_REQUIRED != 0 {
        if done.session_flags & (wire::SESSION_FLAG_IS_GUEST | wire::SESSION_FLAG_IS_NULL) != 0 {
            return Err(protocol(
                "server requires signing but granted a guest or anonymous session",
            ));
        }
        conn.enable_signing(auth.session_key);
    }
    Ok(())
}

/// Reads until `buf` is full or the source is exhausted.
async fn fill(source: &mut (dyn AsyncRead + Unpin + Send), buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn random_bytes(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|e| Error::Connection {
        message: format!("random source unavailable: {e}"),
    })
}

fn filetime_now() -> u64 {
    let now = chrono::Utc::now();
    let secs = u64::try_from(now.timestamp()).unwrap_or_default();
    (secs + FILETIME_UNIX_OFFSET_SECS) * 10_000_000 + u64::from(now.timestamp_subsec_nanos() / 100)
}
