use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::NtStatus;
use super::ntlm::hmac_sha256;
use super::wire::{
    Command, DIALECT_2_0_2, FLAG_SIGNED, HEADER_LEN, Header, MAX_FRAME_LEN, SIGNATURE_OFFSET,
    protocol,
};
use crate::{Error, Result};

const CREDITS_REQUESTED: u16 = 64;

/// One SMB2 message exchange at a time over a direct-TCP stream.
pub struct Connection<S> {
    stream: S,
    next_message_id: u64,
    session_id: u64,
    dialect: u16,
    signing_key: Option<[u8; 16]>,
}

#[derive(Debug)]
pub struct Response {
    pub header: Header,
    pub message: Vec<u8>,
}

impl Response {
    pub fn status(&self) -> NtStatus {
        self.header.status
    }

    /// Fails with the response status unless it is `STATUS_SUCCESS`.
    pub fn ok(self, op: &'static str) -> Result<Self> {
        if self.header.status == NtStatus::SUCCESS {
            Ok(self)
        } else {
            Err(Error::Status {
                op,
                status: self.header.status,
            })
        }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            next_message_id: 0,
            session_id: 0,
            dialect: DIALECT_2_0_2,
            signing_key: None,
        }
    }

    pub fn set_dialect(&mut self, dialect: u16) {
        self.dialect = dialect;
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn set_session_id(&mut self, session_id: u64) {
        self.session_id = session_id;
    }

    pub fn enable_signing(&mut self, key: [u8; 16]) {
        self.signing_key = Some(key);
    }

    pub fn is_signing(&self) -> bool {
        self.signing_key.is_some()
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub async fn request(&mut self, command: Command, tree_id: u32, body: &[u8]) -> Result<Response> {
        let message_id = self.next_message_id;
        self.next_message_id += 1;

        let mut header = Header::request(command, message_id);
        header.credit_charge = if self.dialect == DIALECT_2_0_2 { 0 } else { 1 };
        header.credits = CREDITS_REQUESTED;
        header.tree_id = tree_id;
        header.session_id = self.session_id;
        if self.signing_key.is_some() {
            header.flags |= FLAG_SIGNED;
        }

        let mut msg = Vec::with_capacity(HEADER_LEN + body.len());
        header.encode(&mut msg);
        msg.extend_from_slice(body);
        if let Some(key) = &self.signing_key {
            sign(key, &mut msg);
        }

        self.send_frame(&msg).await?;
        self.read_response(message_id).await
    }

    async fn read_response(&mut self, message_id: u64) -> Result<Response> {
        loop {
            let message = self.read_frame().await?;
            let header = Header::decode(&message)?;
            if header.message_id != message_id {
                debug!(
                    event = "smb.unexpected_message",
                    expected = message_id,
                    got = header.message_id,
                    command = header.command,
                    "smb.unexpected_message"
                );
                continue;
            }
            if header.status == NtStatus::PENDING && header.is_async() {
                continue;
            }
            return Ok(Response { header, message });
        }
    }

    async fn send_frame(&mut self, msg: &[u8]) -> Result<()> {
        if msg.len() > MAX_FRAME_LEN {
            return Err(protocol(format!("message too large: {} bytes", msg.len())));
        }
        let len = (msg.len() as u32).to_be_bytes();
        self.stream.write_all(&len).await?;
        self.stream.write_all(msg).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut prefix = [0u8; 4];
        self.stream.read_exact(&mut prefix).await?;
        if prefix[0] != 0 {
            return Err(protocol(format!("bad frame type 0x{:02x}", prefix[0])));
        }
        let len = u32::from_be_bytes(prefix) as usize;
        let mut msg = vec![0u8; len];
        self.stream.read_exact(&mut msg).await?;
        Ok(msg)
    }
}

/// SMB 2.0.2/2.1 signature: HMAC-SHA256 over the message with a zeroed
/// signature field, truncated to 16 bytes.
pub fn sign(key: &[u8; 16], msg: &mut [u8]) {
    msg[SIGNATURE_OFFSET..HEADER_LEN].fill(0);
    let mac = hmac_sha256(key, &[&msg[..]]);
    msg[SIGNATURE_OFFSET..HEADER_LEN].copy_from_slice(&mac[..16]);
}
