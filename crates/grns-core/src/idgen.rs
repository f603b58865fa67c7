//! SHA-256 based slug ID generation.
//!
//! Minted IDs have the shape `<prefix>-<slug>` where the slug is drawn from a
//! reduced alphabet that excludes visually ambiguous glyphs (0/1/i/l/o/u).

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};

/// Slug alphabet: 30 glyphs, no 0/1/i/l/o/u.
pub const SLUG_ALPHABET: &[u8; 30] = b"23456789abcdefghjkmnpqrstvwxyz";

/// Length of a minted slug.
pub const SLUG_LEN: usize = 4;

/// Converts a byte slice to a slug string of the specified length.
///
/// Repeated division by the alphabet size, most significant digit first.
pub fn encode_slug(data: &[u8], length: usize) -> String {
    let mut num = BigUint::from_bytes_be(data);
    let base = BigUint::from(SLUG_ALPHABET.len() as u32);
    let zero = BigUint::zero();

    // Build the string in reverse.
    let mut chars: Vec<u8> = Vec::with_capacity(length);
    while num > zero {
        let rem = &num % &base;
        num /= &base;
        let digits = rem.to_u32_digits();
        let i = if digits.is_empty() { 0 } else { digits[0] as usize };
        chars.push(SLUG_ALPHABET[i]);
    }
    chars.reverse();

    let mut s = String::from_utf8(chars).expect("slug chars are valid UTF-8");

    // Pad with the zero glyph if needed.
    if s.len() < length {
        let pad = (SLUG_ALPHABET[0] as char)
            .to_string()
            .repeat(length - s.len());
        s = pad + &s;
    }

    // Truncate to exact length (keep least significant digits).
    if s.len() > length {
        s = s[s.len() - length..].to_owned();
    }

    s
}

/// Mints a hash-based task ID.
///
/// The slug derives from the title, the creation timestamp, and a nonce that
/// the caller bumps on collision.
pub fn mint_id(prefix: &str, title: &str, timestamp: DateTime<Utc>, nonce: u32) -> String {
    let content = format!(
        "{}|{}|{}",
        title,
        timestamp.timestamp_nanos_opt().unwrap_or(0),
        nonce
    );
    let hash = Sha256::digest(content.as_bytes());

    // 3 bytes = 24 bits, comfortably more than 30^4 slugs.
    let slug = encode_slug(&hash[..3], SLUG_LEN);
    format!("{prefix}-{slug}")
}

/// Returns `true` if `id` looks like a minted ID for the given prefix.
pub fn is_minted_id(id: &str, prefix: &str) -> bool {
    let Some(slug) = id
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };
    slug.len() == SLUG_LEN && slug.bytes().all(|b| SLUG_ALPHABET.contains(&b))
}
