//! GSS-API initial context token framing (RFC 2743 section 3.1).
//!
//! ```text
//! 0x60 | DER length | 0x06 OID | token id (2 bytes) | mechanism data
//! ```

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::{Error, ErrorKind, Result};

pub const GSS_APPLICATION_TAG: u8 = 0x60;
const OID_TAG: u8 = 0x06;

/// DER encoding of `1.2.840.113554.1.2.2`.
pub const KRB5_OID_DER: [u8; 11] = [0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x12, 0x01, 0x02, 0x02];

pub const TOK_ID_AP_REQ: [u8; 2] = [0x01, 0x00];
pub const TOK_ID_AP_REP: [u8; 2] = [0x02, 0x00];
pub const TOK_ID_KRB_ERROR: [u8; 2] = [0x03, 0x00];

/// A decoded GSS token borrowing from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GssToken<'a> {
    /// The mechanism OID in DER form, tag and length included.
    pub oid: &'a [u8],
    pub tok_id: [u8; 2],
    pub body: &'a [u8],
}

pub(crate) fn sizeof_length(length: usize) -> usize {
    match length {
        0..=0x7f => 1,
        0x80..=0xff => 2,
        0x100..=0xffff => 3,
        0x1_0000..=0xff_ffff => 4,
        _ => 5,
    }
}

pub(crate) fn write_length(mut stream: impl Write, length: usize) -> io::Result<usize> {
    let size = sizeof_length(length);
    if size == 1 {
        stream.write_u8(length as u8)?;
    } else {
        let octets = size - 1;
        stream.write_u8(0x80 | octets as u8)?;
        let bytes = (length as u64).to_be_bytes();
        stream.write_all(&bytes[bytes.len() - octets..])?;
    }

    Ok(size)
}

pub(crate) fn read_length(mut stream: impl Read) -> io::Result<usize> {
    let byte = stream.read_u8()?;
    if byte & 0x80 == 0 {
        return Ok(usize::from(byte));
    }

    let octets = usize::from(byte & 0x7f);
    if octets == 0 || octets > 4 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid length of the length"));
    }

    let mut length = 0usize;
    for _ in 0..octets {
        length = (length << 8) | usize::from(stream.read_u8()?);
    }

    Ok(length)
}

/// Total size of a DER TLV starting at `data[0]`, or `None` if the header is truncated.
pub(crate) fn der_element_size(data: &[u8]) -> Option<usize> {
    let mut cursor = io::Cursor::new(data.get(1..)?);
    let length = read_length(&mut cursor).ok()?;

    Some(1 + cursor.position() as usize + length)
}

/// Splits the DER element at the start of `data` into its tag, its contents and the bytes after it.
pub(crate) fn split_der_element(data: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    let truncated = || Error::new(ErrorKind::DefectiveToken, "truncated DER element");

    let tag = *data.first().ok_or_else(truncated)?;
    let mut cursor = io::Cursor::new(&data[1..]);
    let length = read_length(&mut cursor).map_err(|_| truncated())?;
    let header = 1 + cursor.position() as usize;
    let end = header.checked_add(length).filter(|end| *end <= data.len()).ok_or_else(truncated)?;

    Ok((tag, &data[header..end], &data[end..]))
}

/// Builds the application tag, length and OID for a token whose mechanism part,
/// token id included, is `inner_len` bytes long.
pub fn encode_header(oid_der: &[u8], inner_len: usize) -> Vec<u8> {
    let total = oid_der.len() + inner_len;
    let mut header = Vec::with_capacity(1 + sizeof_length(total) + oid_der.len());
    header.push(GSS_APPLICATION_TAG);
    // writes into a Vec cannot fail
    let _ = write_length(&mut header, total);
    header.extend_from_slice(oid_der);

    header
}

pub fn encode(oid_der: &[u8], tok_id: [u8; 2], body: &[u8]) -> Vec<u8> {
    let mut token = encode_header(oid_der, tok_id.len() + body.len());
    token.extend_from_slice(&tok_id);
    token.extend_from_slice(body);

    token
}

fn parse(data: &[u8], detached_len: usize) -> Result<GssToken<'_>> {
    let defective = |msg: &str| Error::new(ErrorKind::DefectiveToken, format!("invalid GSS token: {}", msg));

    let mut cursor = io::Cursor::new(data);
    if cursor.read_u8().map_err(|_| defective("empty"))? != GSS_APPLICATION_TAG {
        return Err(defective("missing application tag"));
    }
    let declared = read_length(&mut cursor).map_err(|_| defective("bad length"))?;
    let start = cursor.position() as usize;
    let available = data.len() - start;

    if declared != available + detached_len {
        return Err(defective("length mismatch"));
    }

    let rest = &data[start..];
    if rest.first() != Some(&OID_TAG) {
        return Err(defective("missing mechanism OID"));
    }
    let oid_len = der_element_size(rest).ok_or_else(|| defective("truncated OID"))?;
    if rest.len() < oid_len + 2 {
        return Err(defective("truncated token id"));
    }

    let tok_id = [rest[oid_len], rest[oid_len + 1]];

    Ok(GssToken {
        oid: &rest[..oid_len],
        tok_id,
        body: &rest[oid_len + 2..],
    })
}

/// Decodes a token whose declared length covers exactly the bytes present.
pub fn decode(data: &[u8]) -> Result<GssToken<'_>> {
    parse(data, 0)
}

/// Decodes a token whose declared length also covers `detached_len` bytes of payload
/// carried outside of `data`.
pub fn decode_with_detached(data: &[u8], detached_len: usize) -> Result<GssToken<'_>> {
    parse(data, detached_len)
}

/// Decodes a Kerberos token and checks the token id.
pub fn decode_krb5(data: &[u8], expected: [u8; 2]) -> Result<&[u8]> {
    let token = decode(data)?;
    if token.oid != KRB5_OID_DER {
        return Err(Error::new(ErrorKind::DefectiveToken, "GSS token is not a Kerberos token"));
    }
    if token.tok_id != expected {
        return Err(Error::new(
            ErrorKind::DefectiveToken,
            format!("unexpected GSS token id {:02x?}", token.tok_id),
        ));
    }

    Ok(token.body)
}
