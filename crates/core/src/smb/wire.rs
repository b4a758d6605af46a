//! SMB2 header and the request/response bodies used by the backup client.
//!
//! All integers are little-endian. Buffer offsets inside bodies are measured
//! from the start of the SMB2 header, so builders assume the 64-byte header
//! precedes them.

use super::NtStatus;
use crate::{Error, Result};

pub const HEADER_LEN: usize = 64;
pub const PROTOCOL_ID: [u8; 4] = [0xFE, b'S', b'M', b'B'];
pub const SMB1_PROTOCOL_ID: [u8; 4] = [0xFF, b'S', b'M', b'B'];

/// Largest payload a direct-TCP frame header can describe.
pub const MAX_FRAME_LEN: usize = 0x00FF_FFFF;

pub const DIALECT_2_0_2: u16 = 0x0202;
pub const DIALECT_2_1: u16 = 0x0210;
pub const SUPPORTED_DIALECTS: [u16; 2] = [DIALECT_2_0_2, DIALECT_2_1];

pub const FLAG_SERVER_TO_REDIR: u32 = 0x0000_0001;
pub const FLAG_ASYNC_COMMAND: u32 = 0x0000_0002;
pub const FLAG_SIGNED: u32 = 0x0000_0008;

pub const SIGNING_ENABLED: u16 = 0x0001;
pub const SIGNING_REQUIRED: u16 = 0x0002;

pub const SESSION_FLAG_IS_GUEST: u16 = 0x0001;
pub const SESSION_FLAG_IS_NULL: u16 = 0x0002;

pub const SIGNATURE_OFFSET: usize = 48;

// Access mask bits.
pub const FILE_READ_DATA: u32 = 0x0000_0001;
pub const FILE_WRITE_DATA: u32 = 0x0000_0002;
pub const FILE_APPEND_DATA: u32 = 0x0000_0004;
pub const FILE_WRITE_EA: u32 = 0x0000_0010;
pub const FILE_READ_ATTRIBUTES: u32 = 0x0000_0080;
pub const FILE_WRITE_ATTRIBUTES: u32 = 0x0000_0100;
pub const READ_CONTROL: u32 = 0x0002_0000;
pub const SYNCHRONIZE: u32 = 0x0010_0000;

pub const FILE_SHARE_READ: u32 = 0x1;
pub const FILE_SHARE_WRITE: u32 = 0x2;
pub const FILE_SHARE_DELETE: u32 = 0x4;

pub const FILE_OPEN: u32 = 1;
pub const FILE_CREATE: u32 = 2;
pub const FILE_OVERWRITE_IF: u32 = 5;

pub const FILE_DIRECTORY_FILE: u32 = 0x0000_0001;
pub const FILE_NON_DIRECTORY_FILE: u32 = 0x0000_0040;

pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0000_0080;

const IMPERSONATION_LEVEL_IMPERSONATION: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    Negotiate = 0x0000,
    SessionSetup = 0x0001,
    Logoff = 0x0002,
    TreeConnect = 0x0003,
    TreeDisconnect = 0x0004,
    Create = 0x0005,
    Close = 0x0006,
    Write = 0x0009,
}

impl Command {
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Command {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x0000 => Ok(Self::Negotiate),
            0x0001 => Ok(Self::SessionSetup),
            0x0002 => Ok(Self::Logoff),
            0x0003 => Ok(Self::TreeConnect),
            0x0004 => Ok(Self::TreeDisconnect),
            0x0005 => Ok(Self::Create),
            0x0006 => Ok(Self::Close),
            0x0009 => Ok(Self::Write),
            other => Err(protocol(format!("unsupported command 0x{other:04x}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub credit_charge: u16,
    pub status: NtStatus,
    pub command: u16,
    pub credits: u16,
    pub flags: u32,
    pub next_command: u32,
    pub message_id: u64,
    pub async_id: u64,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Header {
    pub fn request(command: Command, message_id: u64) -> Self {
        Self {
            credit_charge: 0,
            status: NtStatus::SUCCESS,
            command: command.as_u16(),
            credits: 0,
            flags: 0,
            next_command: 0,
            message_id,
            async_id: 0,
            tree_id: 0,
            session_id: 0,
            signature: [0; 16],
        }
    }

    pub fn is_async(&self) -> bool {
        self.flags & FLAG_ASYNC_COMMAND != 0
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&PROTOCOL_ID);
        out.extend_from_slice(&(HEADER_LEN as u16).to_le_bytes());
        out.extend_from_slice(&self.credit_charge.to_le_bytes());
        out.extend_from_slice(&self.status.0.to_le_bytes());
        out.extend_from_slice(&self.command.to_le_bytes());
        out.extend_from_slice(&self.credits.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.next_command.to_le_bytes());
        out.extend_from_slice(&self.message_id.to_le_bytes());
        if self.is_async() {
            out.extend_from_slice(&self.async_id.to_le_bytes());
        } else {
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&self.tree_id.to_le_bytes());
        }
        out.extend_from_slice(&self.session_id.to_le_bytes());
        out.extend_from_slice(&self.signature);
    }

    pub fn decode(msg: &[u8]) -> Result<Self> {
        if msg.len() < HEADER_LEN {
            return Err(protocol(format!("message shorter than header: {}", msg.len())));
        }
        if msg[..4] == SMB1_PROTOCOL_ID {
            return Err(protocol("server answered with SMB1; SMB2 is required"));
        }
        if msg[..4] != PROTOCOL_ID {
            return Err(protocol("bad SMB2 protocol id"));
        }
        if u16_at(msg, 4)? as usize != HEADER_LEN {
            return Err(protocol("bad SMB2 header structure size"));
        }

        let flags = u32_at(msg, 16)?;
        let (async_id, tree_id) = if flags & FLAG_ASYNC_COMMAND != 0 {
            (u64_at(msg, 32)?, 0)
        } else {
            (0, u32_at(msg, 36)?)
        };
        let mut signature = [0u8; 16];
        signature.copy_from_slice(&msg[SIGNATURE_OFFSET..HEADER_LEN]);

        Ok(Self {
            credit_charge: u16_at(msg, 6)?,
            status: NtStatus(u32_at(msg, 8)?),
            command: u16_at(msg, 12)?,
            credits: u16_at(msg, 14)?,
            flags,
            next_command: u32_at(msg, 20)?,
            message_id: u64_at(msg, 24)?,
            async_id,
            tree_id,
            session_id: u64_at(msg, 40)?,
            signature,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileId(pub [u8; 16]);

pub fn negotiate_request(client_guid: [u8; 16], security_mode: u16) -> Vec<u8> {
    let mut b = Vec::with_capacity(36 + SUPPORTED_DIALECTS.len() * 2);
    b.extend_from_slice(&36u16.to_le_bytes());
    b.extend_from_slice(&(SUPPORTED_DIALECTS.len() as u16).to_le_bytes());
    b.extend_from_slice(&security_mode.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&client_guid);
    b.extend_from_slice(&0u64.to_le_bytes());
    for dialect in SUPPORTED_DIALECTS {
        b.extend_from_slice(&dialect.to_le_bytes());
    }
    b
}

#[derive(Debug, Clone)]
pub struct NegotiateResponse {
    pub security_mode: u16,
    pub dialect: u16,
    pub max_write_size: u32,
    pub security_buffer: Vec<u8>,
}

pub fn parse_negotiate_response(msg: &[u8]) -> Result<NegotiateResponse> {
    let body = body_of(msg, 64)?;
    Ok(NegotiateResponse {
        security_mode: u16_at(body, 2)?,
        dialect: u16_at(body, 4)?,
        max_write_size: u32_at(body, 36)?,
        security_buffer: buffer_at(msg, u16_at(body, 56)?, u16_at(body, 58)? as u32)?,
    })
}

pub fn session_setup_request(security_mode: u8, token: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(token.len())
        .map_err(|_| protocol("security token exceeds 64 KiB"))?;
    let mut b = Vec::with_capacity(24 + token.len());
    b.extend_from_slice(&25u16.to_le_bytes());
    b.push(0);
    b.push(security_mode);
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&((HEADER_LEN + 24) as u16).to_le_bytes());
    b.extend_from_slice(&len.to_le_bytes());
    b.extend_from_slice(&0u64.to_le_bytes());
    b.extend_from_slice(token);
    Ok(b)
}

#[derive(Debug, Clone)]
pub struct SessionSetupResponse {
    pub session_flags: u16,
    pub security_buffer: Vec<u8>,
}

pub fn parse_session_setup_response(msg: &[u8]) -> Result<SessionSetupResponse> {
    let body = body_of(msg, 8)?;
    Ok(SessionSetupResponse {
        session_flags: u16_at(body, 2)?,
        security_buffer: buffer_at(msg, u16_at(body, 4)?, u16_at(body, 6)? as u32)?,
    })
}

pub fn tree_connect_request(unc_path: &str) -> Result<Vec<u8>> {
    let path = utf16le(unc_path);
    let len = u16::try_from(path.len()).map_err(|_| protocol("share path too long"))?;
    let mut b = Vec::with_capacity(8 + path.len());
    b.extend_from_slice(&9u16.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&((HEADER_LEN + 8) as u16).to_le_bytes());
    b.extend_from_slice(&len.to_le_bytes());
    b.extend_from_slice(&path);
    Ok(b)
}

#[derive(Debug, Clone, Copy)]
pub struct CreateSpec {
    pub desired_access: u32,
    pub file_attributes: u32,
    pub share_access: u32,
    pub disposition: u32,
    pub options: u32,
}

impl CreateSpec {
    /// Opens whatever exists, for reading its attributes only.
    pub const PROBE: Self = Self {
        desired_access: FILE_READ_ATTRIBUTES | SYNCHRONIZE,
        file_attributes: 0,
        share_access: FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
        disposition: FILE_OPEN,
        options: 0,
    };

    pub const MKDIR: Self = Self {
        desired_access: FILE_READ_DATA | FILE_READ_ATTRIBUTES | SYNCHRONIZE,
        file_attributes: FILE_ATTRIBUTE_DIRECTORY,
        share_access: FILE_SHARE_READ | FILE_SHARE_WRITE,
        disposition: FILE_CREATE,
        options: FILE_DIRECTORY_FILE,
    };

    /// Create-or-replace a regular file for writing.
    pub const STORE: Self = Self {
        desired_access: FILE_WRITE_DATA
            | FILE_APPEND_DATA
            | FILE_WRITE_EA
            | FILE_READ_ATTRIBUTES
            | FILE_WRITE_ATTRIBUTES
            | READ_CONTROL
            | SYNCHRONIZE,
        file_attributes: FILE_ATTRIBUTE_NORMAL,
        share_access: FILE_SHARE_READ,
        disposition: FILE_OVERWRITE_IF,
        options: FILE_NON_DIRECTORY_FILE,
    };
}

pub fn create_request(name: &str, spec: CreateSpec) -> Result<Vec<u8>> {
    let name = utf16le(name);
    let len = u16::try_from(name.len()).map_err(|_| protocol("path too long"))?;
    let mut b = Vec::with_capacity(56 + name.len().max(1));
    b.extend_from_slice(&57u16.to_le_bytes());
    b.push(0);
    b.push(0);
    b.extend_from_slice(&IMPERSONATION_LEVEL_IMPERSONATION.to_le_bytes());
    b.extend_from_slice(&0u64.to_le_bytes());
    b.extend_from_slice(&0u64.to_le_bytes());
    b.extend_from_slice(&spec.desired_access.to_le_bytes());
    b.extend_from_slice(&spec.file_attributes.to_le_bytes());
    b.extend_from_slice(&spec.share_access.to_le_bytes());
    b.extend_from_slice(&spec.disposition.to_le_bytes());
    b.extend_from_slice(&spec.options.to_le_bytes());
    b.extend_from_slice(&((HEADER_LEN + 56) as u16).to_le_bytes());
    b.extend_from_slice(&len.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    if name.is_empty() {
        // The variable part must be at least one byte long.
        b.push(0);
    } else {
        b.extend_from_slice(&name);
    }
    Ok(b)
}

#[derive(Debug, Clone, Copy)]
pub struct CreateResponse {
    pub create_action: u32,
    pub end_of_file: u64,
    pub file_attributes: u32,
    pub file_id: FileId,
}

impl CreateResponse {
    pub fn is_directory(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }
}

pub fn parse_create_response(msg: &[u8]) -> Result<CreateResponse> {
    let body = body_of(msg, 88)?;
    let mut file_id = [0u8; 16];
    file_id.copy_from_slice(&body[64..80]);
    Ok(CreateResponse {
        create_action: u32_at(body, 4)?,
        end_of_file: u64_at(body, 48)?,
        file_attributes: u32_at(body, 56)?,
        file_id: FileId(file_id),
    })
}

pub fn write_request(file_id: FileId, offset: u64, data: &[u8]) -> Vec<u8> {
    let mut b = Vec::with_capacity(48 + data.len());
    b.extend_from_slice(&49u16.to_le_bytes());
    b.extend_from_slice(&((HEADER_LEN + 48) as u16).to_le_bytes());
    b.extend_from_slice(&(data.len() as u32).to_le_bytes());
    b.extend_from_slice(&offset.to_le_bytes());
    b.extend_from_slice(&file_id.0);
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(data);
    b
}

pub fn parse_write_response(msg: &[u8]) -> Result<u32> {
    let body = body_of(msg, 8)?;
    u32_at(body, 4)
}

pub fn close_request(file_id: FileId) -> Vec<u8> {
    let mut b = Vec::with_capacity(24);
    b.extend_from_slice(&24u16.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&file_id.0);
    b
}

/// TREE_DISCONNECT and LOGOFF share this four-byte body.
pub fn empty_request() -> Vec<u8> {
    let mut b = Vec::with_capacity(4);
    b.extend_from_slice(&4u16.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b
}

/// Converts a `/`-separated share path into the backslash form CREATE
/// expects, without a leading separator.
pub fn share_relative_name(path: &str) -> String {
    path.trim_matches('/').replace('/', "\\")
}

pub fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

pub fn utf16le_to_string(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(protocol("odd-length UTF-16 string"));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| protocol("invalid UTF-16 string"))
}

fn body_of(msg: &[u8], min_len: usize) -> Result<&[u8]> {
    let body = msg.get(HEADER_LEN..).unwrap_or_default();
    if body.len() < min_len {
        return Err(protocol(format!(
            "response body too short: {} < {min_len}",
            body.len()
        )));
    }
    Ok(body)
}

fn buffer_at(msg: &[u8], offset: u16, len: u32) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    let start = offset as usize;
    let end = start + len as usize;
    msg.get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| protocol("security buffer outside message"))
}

pub fn u16_at(b: &[u8], off: usize) -> Result<u16> {
    b.get(off..off + 2)
        .map(|s| u16::from_le_bytes([s[0], s[1]]))
        .ok_or_else(|| protocol(format!("truncated u16 at {off}")))
}

pub fn u32_at(b: &[u8], off: usize) -> Result<u32> {
    b.get(off..off + 4)
        .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
        .ok_or_else(|| protocol(format!("truncated u32 at {off}")))
}

pub fn u64_at(b: &[u8], off: usize) -> Result<u64> {
    b.get(off..off + 8)
        .map(|s| {
            let mut a = [0u8; 8];
            a.copy_from_slice(s);
            u64::from_le_bytes(a)
        })
        .ok_or_else(|| protocol(format!("truncated u64 at {off}")))
}

pub(crate) fn protocol(message: impl Into<String>) -> Error {
    Error::Protocol {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_matches_wire_offsets() {
        let mut h = Header::request(Command::Create, 7);
        h.credits = 64;
        h.tree_id = 0x1122_3344;
        h.session_id = 0x0102_0304_0506_0708;
        h.flags = FLAG_SIGNED;

        let mut out = Vec::new();
        h.encode(&mut out);
        assert_eq!(out.len(), HEADER_LEN);
        assert_eq!(&out[..4], &PROTOCOL_ID);
        assert_eq!(u16_at(&out, 12).unwrap(), 0x0005);
        assert_eq!(u16_at(&out, 14).unwrap(), 64);
        assert_eq!(u64_at(&out, 24).unwrap(), 7);
        assert_eq!(u32_at(&out, 36).unwrap(), 0x1122_3344);
        assert_eq!(u64_at(&out, 40).unwrap(), 0x0102_0304_0506_0708);

        assert_eq!(Header::decode(&out).unwrap(), h);
    }

    #[test]
    fn async_header_carries_async_id_instead_of_tree_id() {
        let mut h = Header::request(Command::Write, 3);
        h.flags = FLAG_SERVER_TO_REDIR | FLAG_ASYNC_COMMAND;
        h.status = NtStatus::PENDING;
        h.async_id = 99;
        let mut out = Vec::new();
        h.encode(&mut out);
        let back = Header::decode(&out).unwrap();
        assert!(back.is_async());
        assert_eq!(back.async_id, 99);
        assert_eq!(back.tree_id, 0);
    }

    #[test]
    fn smb1_reply_is_rejected_with_a_clear_message() {
        let mut msg = vec![0u8; HEADER_LEN];
        msg[..4].copy_from_slice(&SMB1_PROTOCOL_ID);
        let err = Header::decode(&msg).unwrap_err();
        assert!(err.to_string().contains("SMB1"));
    }

    #[test]
    fn fixed_request_parts_have_their_structure_sizes() {
        let id = FileId([1; 16]);
        assert_eq!(negotiate_request([0; 16], SIGNING_ENABLED).len(), 36 + 4);
        assert_eq!(session_setup_request(1, b"tok").unwrap().len(), 24 + 3);
        assert_eq!(create_request("", CreateSpec::PROBE).unwrap().len(), 57);
        assert_eq!(create_request("a", CreateSpec::PROBE).unwrap().len(), 58);
        assert_eq!(write_request(id, 0, b"xyz").len(), 48 + 3);
        assert_eq!(close_request(id).len(), 24);
        assert_eq!(empty_request().len(), 4);
    }

    #[test]
    fn share_names_use_backslashes_without_leading_separator() {
        assert_eq!(share_relative_name("/backups/report.pdf"), r"backups\report.pdf");
        assert_eq!(share_relative_name("/"), "");
        assert_eq!(utf16le_to_string(&utf16le("résumé.pdf")).unwrap(), "résumé.pdf");
    }

    #[test]
    fn truncated_response_body_is_a_protocol_error() {
        let mut msg = Vec::new();
        Header::request(Command::Create, 1).encode(&mut msg);
        msg.extend_from_slice(&[0u8; 10]);
        assert!(matches!(
            parse_create_response(&msg),
            Err(Error::Protocol { .. })
        ));
    }
}
