// =============================================================================
// TOTP — RFC-6238 time-based one-time passwords for the login challenge
// =============================================================================
//
// HMAC-SHA1 over the 30-second time counter, dynamic truncation, 6 digits.
// The generated code is returned to the login flow and never logged.
// =============================================================================

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{TradingError, TradingResult};

type HmacSha1 = Hmac<Sha1>;

const STEP_SECONDS: i64 = 30;
const DIGITS: u32 = 6;

fn decode_secret(secret_b32: &str) -> Option<Vec<u8>> {
    let normalized: String = secret_b32
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| *c != '=')
        .collect();
    if normalized.is_empty() {
        return None;
    }
    base32::decode(base32::Alphabet::RFC4648 { padding: false }, &normalized)
}

/// Whether `secret` is usable as a base32-encoded challenge secret.
pub fn is_valid_secret(secret: &str) -> bool {
    decode_secret(secret).is_some()
}

/// Generate the challenge response code for `now`.
pub fn generate(secret_b32: &str, now: DateTime<Utc>) -> TradingResult<String> {
    let key = decode_secret(secret_b32)
        .ok_or_else(|| TradingError::auth("challenge secret is not valid base32"))?;

    let counter = (now.timestamp().max(0) / STEP_SECONDS) as u64;
    let mut mac = HmacSha1::new_from_slice(&key)
        .map_err(|_| TradingError::auth("challenge secret rejected by HMAC"))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((u32::from(digest[offset]) & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    Ok(format!("{:06}", binary % 10u32.pow(DIGITS)))
}
