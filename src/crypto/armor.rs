//! ASCII armor
//!
//! Line-delimited text wrapping for binary key and message packets, laid out
//! like OpenPGP armor (RFC 4880 section 6): a BEGIN line, optional
//! `Key: value` headers, a blank line, 64-column base64, a CRC-24 checksum
//! line and an END line.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

const LINE_WIDTH: usize = 64;
const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;

const BEGIN_PREFIX: &str = "-----BEGIN ";
const END_PREFIX: &str = "-----END ";
const DASHES: &str = "-----";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArmorError {
    #[error("unknown armor block type: {0}")]
    UnknownKind(String),

    #[error("armor block {0} has no END line")]
    MissingEnd(&'static str),

    #[error("invalid base64 in armor body: {0}")]
    InvalidBase64(String),

    #[error("armor checksum mismatch")]
    ChecksumMismatch,

    #[error("expected {expected} block, found {found}")]
    UnexpectedKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("no armor block found")]
    NoBlock,
}

/// Kind of armored block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmorKind {
    PublicKey,
    PrivateKey,
    Message,
}

impl ArmorKind {
    pub fn label(self) -> &'static str {
        match self {
            ArmorKind::PublicKey => "KILID PUBLIC KEY BLOCK",
            ArmorKind::PrivateKey => "KILID PRIVATE KEY BLOCK",
            ArmorKind::Message => "KILID MESSAGE",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        [ArmorKind::PublicKey, ArmorKind::PrivateKey, ArmorKind::Message]
            .into_iter()
            .find(|kind| kind.label() == label)
    }
}

/// One decoded armor block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmorBlock {
    pub kind: ArmorKind,
    pub data: Vec<u8>,
}

/// Armor binary data
pub fn encode(kind: ArmorKind, data: &[u8]) -> String {
    let body = STANDARD.encode(data);
    let crc = crc24(data).to_be_bytes();

    let mut out = String::with_capacity(body.len() + body.len() / LINE_WIDTH + 128);
    out.push_str(BEGIN_PREFIX);
    out.push_str(kind.label());
    out.push_str(DASHES);
    out.push_str("\n\n");

    // base64 output is ASCII, so byte chunks are char boundaries
    for line in body.as_bytes().chunks(LINE_WIDTH) {
        out.push_str(std::str::from_utf8(line).unwrap_or_default());
        out.push('\n');
    }

    out.push('=');
    out.push_str(&STANDARD.encode(&crc[1..]));
    out.push('\n');
    out.push_str(END_PREFIX);
    out.push_str(kind.label());
    out.push_str(DASHES);
    out.push('\n');
    out
}

/// Whether the text starts with an armor BEGIN line
pub fn is_armored(data: &[u8]) -> bool {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    data[start..].starts_with(BEGIN_PREFIX.as_bytes())
}

/// Decode the first block, which must be of `kind`
pub fn decode(kind: ArmorKind, text: &str) -> Result<Vec<u8>, ArmorError> {
    let block = decode_all(text)?
        .into_iter()
        .next()
        .ok_or(ArmorError::NoBlock)?;

    if block.kind != kind {
        return Err(ArmorError::UnexpectedKind {
            expected: kind.label(),
            found: block.kind.label(),
        });
    }
    Ok(block.data)
}

/// Decode every armor block in the text, in order.
///
/// Text outside blocks is ignored. Text with no BEGIN line decodes to an
/// empty list.
pub fn decode_all(text: &str) -> Result<Vec<ArmorBlock>, ArmorError> {
    let mut blocks = Vec::new();
    let mut lines = text.lines().map(str::trim_end);

    while let Some(line) = lines.next() {
        let Some(label) = line
            .trim_start()
            .strip_prefix(BEGIN_PREFIX)
            .and_then(|rest| rest.strip_suffix(DASHES))
        else {
            continue;
        };

        let kind =
            ArmorKind::from_label(label).ok_or_else(|| ArmorError::UnknownKind(label.to_string()))?;
        blocks.push(decode_block(kind, &mut lines)?);
    }

    Ok(blocks)
}

fn decode_block<'a>(
    kind: ArmorKind,
    lines: &mut impl Iterator<Item = &'a str>,
) -> Result<ArmorBlock, ArmorError> {
    let end_line = format!("{END_PREFIX}{}{DASHES}", kind.label());
    let mut body = String::new();
    let mut checksum: Option<&str> = None;
    let mut in_headers = true;

    for line in lines.by_ref() {
        let line = line.trim_start();

        if line == end_line {
            let data = STANDARD
                .decode(body.as_bytes())
                .map_err(|e| ArmorError::InvalidBase64(e.to_string()))?;

            if let Some(encoded) = checksum {
                verify_checksum(encoded, &data)?;
            }
            return Ok(ArmorBlock { kind, data });
        }

        if in_headers {
            if line.is_empty() {
                in_headers = false;
                continue;
            }
            if line.contains(": ") {
                continue;
            }
            // no header section
            in_headers = false;
        }

        if line.is_empty() {
            continue;
        }
        if let Some(crc) = line.strip_prefix('=') {
            checksum = Some(crc);
        } else if checksum.is_some() {
            return Err(ArmorError::InvalidBase64("data after checksum line".into()));
        } else {
            body.push_str(line);
        }
    }

    Err(ArmorError::MissingEnd(kind.label()))
}

fn verify_checksum(encoded: &str, data: &[u8]) -> Result<(), ArmorError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| ArmorError::InvalidBase64(e.to_string()))?;
    if bytes.len() != 3 {
        return Err(ArmorError::ChecksumMismatch);
    }

    let expected = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]);
    if crc24(data) != expected {
        return Err(ArmorError::ChecksumMismatch);
    }
    Ok(())
}

/// OpenPGP CRC-24
pub fn crc24(data: &[u8]) -> u32 {
    let mut crc = CRC24_INIT;
    for &byte in data {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}
