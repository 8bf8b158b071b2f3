use crate::{config, shared};
use anyhow::{anyhow, Result};
use md5::{Digest, Md5};
use rayon::prelude::*;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub const TASK: &str = "sqrt_leak";

const LEAK_DIGITS: i32 = 22;

#[derive(Deserialize)]
struct Challenge {
    leak: String,
    key_hash: String,
    min_integer_part: u64,
    max_integer_part: u64,
    ciphertext: String,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let fraction = leak_fraction(&challenge.leak)?;
    let hash = hex::decode(&challenge.key_hash)?;

    info!("Searching for the correct K...");
    let secret = find_secret(
        fraction,
        &hash,
        challenge.min_integer_part..=challenge.max_integer_part,
    )
    .ok_or_else(|| anyhow!("No K in range matches the key hash"))?;
    info!("The secret number K is: {}", secret);

    let key = Md5::digest(secret.to_string().as_bytes());
    let plaintext = shared::aes_ecb_decrypt(&key, &hex::decode(&challenge.ciphertext)?, true)?;
    println!("{}", String::from_utf8_lossy(&plaintext));

    Ok(())
}

/// Interpret the leaked digits as the fractional part of the square root.
pub fn leak_fraction(digits: &str) -> Result<f64> {
    let digits = digits.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(anyhow!("Leak must be a string of digits"));
    }
    let value: f64 = digits.parse()?;
    Ok(value / 10_f64.powi(LEAK_DIGITS))
}

/// Find `K` with `sqrt(K) = I.fraction...` for some `I` in `integer_parts` and
/// `MD5(str(K)) = hash`.
///
/// Squaring the approximate root lands within one of `K`.
pub fn find_secret(
    fraction: f64,
    hash: &[u8],
    integer_parts: std::ops::RangeInclusive<u64>,
) -> Option<u64> {
    integer_parts.into_par_iter().find_map_any(|integer| {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let approx = ((integer as f64 + fraction).powi(2)).round() as u64;
        (approx.saturating_sub(1)..=approx + 1)
            .find(|candidate| Md5::digest(candidate.to_string().as_bytes()).as_slice() == hash)
    })
}
