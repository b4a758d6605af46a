//! NTLMv2 client messages (MS-NLMP), without key exchange or MIC.

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use sha2::Sha256;

use super::wire::{protocol, u16_at, u32_at, u64_at, utf16le};
use crate::Result;

type HmacMd5 = Hmac<Md5>;
type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const MESSAGE_NEGOTIATE: u32 = 1;
const MESSAGE_CHALLENGE: u32 = 2;
const MESSAGE_AUTHENTICATE: u32 = 3;

pub const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
pub const REQUEST_TARGET: u32 = 0x0000_0004;
pub const NEGOTIATE_SIGN: u32 = 0x0000_0010;
pub const NEGOTIATE_NTLM: u32 = 0x0000_0200;
pub const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
pub const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
pub const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
pub const NEGOTIATE_128: u32 = 0x2000_0000;
pub const NEGOTIATE_56: u32 = 0x8000_0000;

pub const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_SIGN
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

const AV_EOL: u16 = 0;
const AV_TIMESTAMP: u16 = 7;

const NEGOTIATE_LEN: usize = 32;
const AUTHENTICATE_HEADER_LEN: usize = 64;

pub fn negotiate_message() -> Vec<u8> {
    let mut m = Vec::with_capacity(NEGOTIATE_LEN);
    m.extend_from_slice(SIGNATURE);
    m.extend_from_slice(&MESSAGE_NEGOTIATE.to_le_bytes());
    m.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    // Empty domain and workstation fields.
    for _ in 0..2 {
        push_field(&mut m, 0, NEGOTIATE_LEN);
    }
    m
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
    /// `MsvAvTimestamp` from the target info, when the server sent one.
    pub timestamp: Option<u64>,
}

pub fn parse_challenge(msg: &[u8]) -> Result<Challenge> {
    if msg.len() < 48 || &msg[..8] != SIGNATURE {
        return Err(protocol("not an NTLMSSP message"));
    }
    if u32_at(msg, 8)? != MESSAGE_CHALLENGE {
        return Err(protocol("expected NTLMSSP CHALLENGE message"));
    }
    let flags = u32_at(msg, 20)?;
    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(&msg[24..32]);

    let info_len = u16_at(msg, 40)? as usize;
    let info_off = u32_at(msg, 44)? as usize;
    let target_info = if info_len == 0 {
        Vec::new()
    } else {
        msg.get(info_off..info_off + info_len)
            .ok_or_else(|| protocol("target info outside CHALLENGE message"))?
            .to_vec()
    };
    let timestamp = find_av_timestamp(&target_info)?;

    Ok(Challenge {
        flags,
        server_challenge,
        target_info,
        timestamp,
    })
}

fn find_av_timestamp(info: &[u8]) -> Result<Option<u64>> {
    let mut pos = 0;
    while pos + 4 <= info.len() {
        let id = u16_at(info, pos)?;
        let len = u16_at(info, pos + 2)? as usize;
        pos += 4;
        if id == AV_EOL {
            break;
        }
        if id == AV_TIMESTAMP && len == 8 {
            return Ok(Some(u64_at(info, pos)?));
        }
        pos += len;
    }
    Ok(None)
}

pub struct Credentials<'a> {
    pub user: &'a str,
    pub password: &'a str,
    pub domain: &'a str,
    pub workstation: &'a str,
}

pub struct Authenticate {
    pub message: Vec<u8>,
    /// Exported session key; signs SMB2 messages for 2.x dialects.
    pub session_key: [u8; 16],
}

pub fn authenticate_message(
    creds: &Credentials<'_>,
    challenge: &Challenge,
    client_challenge: [u8; 8],
    now_filetime: u64,
) -> Authenticate {
    let response_key = nt_owf_v2(creds.user, creds.password, creds.domain);
    let time = challenge.timestamp.unwrap_or(now_filetime);
    let blob = client_blob(time, client_challenge, &challenge.target_info);

    let nt_proof = hmac_md5(&response_key, &[&challenge.server_challenge, &blob]);
    let mut nt_response = nt_proof.to_vec();
    nt_response.extend_from_slice(&blob);

    // With a server timestamp the LMv2 response must be zeroed.
    let lm_response = if challenge.timestamp.is_some() {
        vec![0u8; 24]
    } else {
        let mut lm = hmac_md5(
            &response_key,
            &[&challenge.server_challenge, &client_challenge],
        )
        .to_vec();
        lm.extend_from_slice(&client_challenge);
        lm
    };

    let session_key = hmac_md5(&response_key, &[&nt_proof]);
    let flags = challenge.flags & CLIENT_FLAGS | NEGOTIATE_UNICODE;

    let domain = utf16le(creds.domain);
    let user = utf16le(creds.user);
    let workstation = utf16le(creds.workstation);

    let mut payload = Vec::new();
    let mut offsets = [0usize; 5];
    for (i, part) in [&domain, &user, &workstation, &lm_response, &nt_response]
        .into_iter()
        .enumerate()
    {
        offsets[i] = AUTHENTICATE_HEADER_LEN + payload.len();
        payload.extend_from_slice(part);
    }
    let key_offset = AUTHENTICATE_HEADER_LEN + payload.len();

    let mut m = Vec::with_capacity(AUTHENTICATE_HEADER_LEN + payload.len());
    m.extend_from_slice(SIGNATURE);
    m.extend_from_slice(&MESSAGE_AUTHENTICATE.to_le_bytes());
    push_field(&mut m, lm_response.len(), offsets[3]);
    push_field(&mut m, nt_response.len(), offsets[4]);
    push_field(&mut m, domain.len(), offsets[0]);
    push_field(&mut m, user.len(), offsets[1]);
    push_field(&mut m, workstation.len(), offsets[2]);
    push_field(&mut m, 0, key_offset);
    m.extend_from_slice(&flags.to_le_bytes());
    m.extend_from_slice(&payload);

    Authenticate {
        message: m,
        session_key,
    }
}

fn client_blob(time: u64, client_challenge: [u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(32 + target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
    blob.extend_from_slice(&time.to_le_bytes());
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0; 4]);
    blob
}

fn push_field(m: &mut Vec<u8>, len: usize, offset: usize) {
    m.extend_from_slice(&(len as u16).to_le_bytes());
    m.extend_from_slice(&(len as u16).to_le_bytes());
    m.extend_from_slice(&(offset as u32).to_le_bytes());
}

pub fn nt_owf_v1(password: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md4::digest(utf16le(password)));
    out
}

pub fn nt_owf_v2(user: &str, password: &str, domain: &str) -> [u8; 16] {
    let identity = utf16le(&format!("{}{domain}", user.to_uppercase()));
    hmac_md5(&nt_owf_v1(password), &[&identity])
}

pub fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    let mut mac = HmacMd5::new_from_slice(key).expect("hmac accepts any key length");
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}
