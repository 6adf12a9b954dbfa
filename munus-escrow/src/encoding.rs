//! Key material decoding
//!
//! Worker keys and signatures arrive as text in one of three encodings. The
//! decoder tries them in a fixed order and returns the first one that parses
//! to a byte string. Length is the caller's concern.

use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use std::fmt;

/// Text encodings accepted for key material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Encoding {
    /// `0x`-prefixed hexadecimal
    Hex,
    /// Bitcoin-alphabet base58
    Base58,
    /// Standard base64 with padding
    Base64,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hex => "hex",
            Self::Base58 => "base58",
            Self::Base64 => "base64",
        };
        f.write_str(name)
    }
}

/// Decode attempts, tried in this order
pub const DECODE_ORDER: [Encoding; 3] = [Encoding::Hex, Encoding::Base58, Encoding::Base64];

impl Encoding {
    /// Try to decode `text` with this encoding alone
    pub fn decode(self, text: &str) -> Option<Vec<u8>> {
        match self {
            Self::Hex => text.strip_prefix("0x").and_then(|digits| hex::decode(digits).ok()),
            Self::Base58 => bs58::decode(text).into_vec().ok(),
            Self::Base64 => general_purpose::STANDARD.decode(text).ok(),
        }
    }

    pub fn encode(self, bytes: &[u8]) -> String {
        match self {
            Self::Hex => format!("0x{}", hex::encode(bytes)),
            Self::Base58 => bs58::encode(bytes).into_string(),
            Self::Base64 => general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// Decode key material, returning the bytes and the encoding that matched
///
/// Empty input never decodes.
pub fn decode_key_material(text: &str) -> Option<(Vec<u8>, Encoding)> {
    if text.is_empty() {
        return None;
    }
    DECODE_ORDER
        .iter()
        .find_map(|encoding| encoding.decode(text).map(|bytes| (bytes, *encoding)))
}
