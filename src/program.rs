//! Program image representation and readers.
//!
//! A program is a sequence of 16-bit words. Two source forms are accepted:
//! a hex text form of whitespace-separated tokens, and raw little-endian
//! bytes.
//!
//! # Hex text grammar
//!
//! Tokens are separated by any whitespace. Each token is either `0x` (or
//! `0X`) followed by 1–4 hex digits, or a bare sequence of exactly 4 hex
//! digits; prefixed tokens shorter than four digits are zero-padded to the
//! left. A `;` starts a comment running to the end of the line.

use crate::errors::VmError;

/// A loadable sequence of instruction words.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProgramImage {
    pub words: Vec<u16>,
}

impl ProgramImage {
    /// Parses the whitespace-separated hex text form.
    pub fn from_hex_text(source: &str) -> Result<Self, VmError> {
        let mut words = Vec::new();
        for (index, line) in source.lines().enumerate() {
            let line = match line.find(';') {
                Some(pos) => &line[..pos],
                None => line,
            };
            for token in line.split_whitespace() {
                words.push(parse_token(token).ok_or_else(|| VmError::BadHexToken {
                    line: index + 1,
                    token: token.to_string(),
                })?);
            }
        }
        Ok(ProgramImage { words })
    }

    /// Interprets raw bytes as little-endian words.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, VmError> {
        if bytes.len() % 2 != 0 {
            return Err(VmError::OddImageLength { len: bytes.len() });
        }
        let words = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(ProgramImage { words })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

fn parse_token(token: &str) -> Option<u16> {
    let (digits, prefixed) = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(rest) => (rest, true),
        None => (token, false),
    };
    let valid_len = if prefixed {
        (1..=4).contains(&digits.len())
    } else {
        digits.len() == 4
    };
    // from_str_radix also accepts a sign, which the token grammar does not.
    if !valid_len || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}
