//! Minimal SPNEGO (RFC 4178) framing around NTLMSSP tokens.

use super::ntlm;
use super::wire::protocol;
use crate::Result;

const SPNEGO_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
const NTLMSSP_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

const TAG_APPLICATION_0: u8 = 0x60;
const TAG_OID: u8 = 0x06;
const TAG_ENUMERATED: u8 = 0x0a;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_CTX_0: u8 = 0xa0;
const TAG_CTX_1: u8 = 0xa1;
const TAG_CTX_2: u8 = 0xa2;

const NEG_STATE_REJECT: u8 = 2;

/// GSS-API InitialContextToken carrying a NegTokenInit that offers NTLMSSP.
pub fn wrap_init(mech_token: &[u8]) -> Vec<u8> {
    let mech_types = der(TAG_CTX_0, &der(TAG_SEQUENCE, &der(TAG_OID, NTLMSSP_OID)));
    let token = der(TAG_CTX_2, &der(TAG_OCTET_STRING, mech_token));
    let init = der(TAG_SEQUENCE, &[mech_types, token].concat());

    let mut inner = der(TAG_OID, SPNEGO_OID);
    inner.extend_from_slice(&der(TAG_CTX_0, &init));
    der(TAG_APPLICATION_0, &inner)
}

/// NegTokenResp carrying the next mechanism token.
pub fn wrap_response(mech_token: &[u8]) -> Vec<u8> {
    let token = der(TAG_CTX_2, &der(TAG_OCTET_STRING, mech_token));
    der(TAG_CTX_1, &der(TAG_SEQUENCE, &token))
}

/// Extracts the responseToken from a server NegTokenResp. Raw NTLMSSP
/// blobs are passed through unchanged.
pub fn unwrap_response(blob: &[u8]) -> Result<Vec<u8>> {
    if blob.starts_with(ntlm::SIGNATURE) {
        return Ok(blob.to_vec());
    }

    let (tag, resp, _) = read_tlv(blob)?;
    if tag != TAG_CTX_1 {
        return Err(protocol(format!("expected NegTokenResp, got tag 0x{tag:02x}")));
    }
    let (tag, mut fields, _) = read_tlv(resp)?;
    if tag != TAG_SEQUENCE {
        return Err(protocol("NegTokenResp is not a SEQUENCE"));
    }

    let mut token = None;
    while !fields.is_empty() {
        let (tag, value, rest) = read_tlv(fields)?;
        match tag {
            TAG_CTX_0 => {
                let (inner_tag, state, _) = read_tlv(value)?;
                if inner_tag == TAG_ENUMERATED && state.first() == Some(&NEG_STATE_REJECT) {
                    return Err(protocol("server rejected the SPNEGO negotiation"));
                }
            }
            TAG_CTX_2 => {
                let (inner_tag, octets, _) = read_tlv(value)?;
                if inner_tag != TAG_OCTET_STRING {
                    return Err(protocol("responseToken is not an OCTET STRING"));
                }
                token = Some(octets.to_vec());
            }
            _ => {}
        }
        fields = rest;
    }
    token.ok_or_else(|| protocol("NegTokenResp carries no responseToken"))
}

pub(crate) fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = (len as u32).to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (4 - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// Returns `(tag, value, remainder)`.
pub(crate) fn read_tlv(buf: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    let (&tag, rest) = buf.split_first().ok_or_else(|| protocol("empty DER element"))?;
    let (&first, mut rest) = rest
        .split_first()
        .ok_or_else(|| protocol("DER element without length"))?;
    let len = if first & 0x80 == 0 {
        first as usize
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 4 || rest.len() < n {
            return Err(protocol("unsupported DER length"));
        }
        let len = rest[..n].iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        rest = &rest[n..];
        len
    };
    if rest.len() < len {
        return Err(protocol("truncated DER element"));
    }
    Ok((tag, &rest[..len], &rest[len..]))
}
