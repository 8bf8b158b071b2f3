use crate::{config, shared};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

pub const TASK: &str = "quartic_mitm";

#[derive(Deserialize)]
struct Challenge {
    limit: u64,
    offset: u64,
    ciphertext: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Solution {
    pub a: u64,
    pub b: u64,
    pub c: u64,
    pub d: u64,
}

impl Solution {
    /// AES key: the product `a b c d` as 16 zero-padded decimal digits.
    pub fn key(&self) -> Result<[u8; 16]> {
        let product = [self.b, self.c, self.d]
            .iter()
            .try_fold(self.a, |acc, &v| acc.checked_mul(v))
            .ok_or_else(|| anyhow!("Product of {:?} overflows", self))?;
        let digits = format!("{:016}", product);
        digits
            .as_bytes()
            .try_into()
            .map_err(|_| anyhow!("Product {} does not fit in 16 digits", digits))
    }
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let solution = solve(challenge.limit, challenge.offset)?
        .ok_or_else(|| anyhow!("No solution below {}", challenge.limit))?;
    info!("Found integer solution (a,b,c,d): {:?}", solution);

    let key = solution.key()?;
    info!("Derived AES key: {}", String::from_utf8_lossy(&key));
    let plaintext = shared::aes_ecb_decrypt(&key, &hex::decode(&challenge.ciphertext)?, false)?;
    let plaintext = String::from_utf8_lossy(&plaintext);
    println!("{}", plaintext.trim_matches(|c: char| c.is_whitespace() || c.is_control()));

    Ok(())
}

/// Meet in the middle on `a^4 + b^4 = c^4 + d^4 + offset` with all terms below `limit`.
pub fn solve(limit: u64, offset: u64) -> Result<Option<Solution>> {
    // the largest left side must fit, then nothing below it overflows
    limit
        .saturating_sub(1)
        .checked_pow(4)
        .and_then(|max| max.checked_mul(2))
        .and_then(|max| max.checked_add(offset))
        .ok_or_else(|| anyhow!("Limit {} with offset {} overflows 64 bits", limit, offset))?;
    let fourth = |v: u64| v.pow(4);

    info!("Starting pre-computation with limit = {}...", limit);
    let mut sums = HashMap::new();
    for c in 1..limit {
        for d in 1..=c {
            sums.insert(fourth(c) + fourth(d) + offset, (c, d));
        }
    }
    info!("Pre-computation finished with {} sums", sums.len());

    for a in 1..limit {
        for b in 1..=a {
            if let Some(&(c, d)) = sums.get(&(fourth(a) + fourth(b))) {
                return Ok(Some(Solution { a, b, c, d }));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_instance() {
        let solution = solve(10, 194).unwrap().unwrap();
        assert_eq!(solution, Solution { a: 5, b: 3, c: 4, d: 4 });
        assert_eq!(&solution.key().unwrap(), b"0000000000000240");
    }

    #[test]
    fn decrypts_with_derived_key() {
        let solution = solve(10, 194).unwrap().unwrap();
        let key = solution.key().unwrap();
        let ciphertext = shared::aes_ecb_encrypt(&key, b"uiuctf{dioph4nt1ne_aes_c0mbo}   ", false);
        let plaintext = shared::aes_ecb_decrypt(&key, &ciphertext, false).unwrap();
        assert_eq!(
            String::from_utf8_lossy(&plaintext).trim_end(),
            "uiuctf{dioph4nt1ne_aes_c0mbo}"
        );
    }

    #[test]
    fn no_solution_below_limit() {
        assert_eq!(solve(4, 194).unwrap(), None);
    }

    #[test]
    fn oversized_limit_is_an_error() {
        assert!(solve(65_536, 0).is_err());
        assert!(solve(50_000, u64::MAX).is_err());
        assert!(solve(0, u64::MAX).unwrap().is_none());
    }

    #[test]
    fn overflowing_product_is_an_error() {
        let solution = Solution {
            a: u64::MAX,
            b: 2,
            c: 1,
            d: 1,
        };
        assert!(solution.key().is_err());
        let solution = Solution {
            a: 12_345_678,
            b: 1_000_000_000,
            c: 1,
            d: 1,
        };
        assert!(solution.key().is_err());
    }
}
