use crate::number::{is_perfect_square, mod_inverse};
use crate::{config, shared};
use anyhow::{anyhow, Result};
use num_bigint::{BigInt, BigUint};
use num_traits::Signed;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub const TASK: &str = "phi_leak";

#[derive(Deserialize)]
struct Challenge {
    #[serde(with = "shared::biguint")]
    n: BigUint,
    #[serde(with = "shared::biguint")]
    e: BigUint,
    #[serde(with = "shared::biguint")]
    ciphertext: BigUint,
    #[serde(with = "shared::biguint")]
    hint: BigUint,
    leak_bits: u64,
    search_range: u64,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let (p, q) = factor_from_phi_leak(
        &challenge.n,
        &challenge.hint,
        challenge.leak_bits,
        challenge.search_range,
    )?;
    info!("Found factors p = {}, q = {}", p, q);

    let phi = (&p - 1_u32) * (&q - 1_u32);
    let d = mod_inverse(&challenge.e, &phi).ok_or_else(|| anyhow!("e is not invertible mod phi"))?;
    let message = challenge.ciphertext.modpow(&d, &challenge.n);
    println!("{}", shared::decode_message(&message));

    Ok(())
}

/// Factor `n = p q` knowing `phi(n) mod 2^leak_bits`.
///
/// `phi = n - (p + q) + 1` and `p + q` is close to `2 sqrt(n)`, so the unknown
/// high part `k` of `phi = k 2^leak_bits + hint` is near
/// `(n - 2 sqrt(n) + 1) >> leak_bits`. Each guess gives `s = p + q`, and the
/// right one makes `s^2 - 4n` a perfect square.
pub fn factor_from_phi_leak(
    n: &BigUint,
    hint: &BigUint,
    leak_bits: u64,
    search_range: u64,
) -> Result<(BigUint, BigUint)> {
    let n_int = BigInt::from(n.clone());
    let phi_guess = n - (n.sqrt() << 1_u32) + 1_u32;
    let k_guess = BigInt::from(phi_guess >> leak_bits);
    let base = &n_int - BigInt::from(hint.clone()) + 1_u32;
    let scale = BigInt::from(1_u8) << leak_bits;

    for i in 0..search_range {
        for sign in [-1_i64, 1] {
            if i == 0 && sign == 1 {
                continue;
            }
            let k = &k_guess + BigInt::from(sign) * BigInt::from(i);
            if k.is_negative() {
                continue;
            }
            let s = &base - &k * &scale;
            let discriminant = &s * &s - &n_int * 4_u32;
            let (Some(s), Some(discriminant)) = (s.to_biguint(), discriminant.to_biguint()) else {
                continue;
            };
            let Some(delta) = is_perfect_square(&discriminant) else {
                continue;
            };
            if s < delta {
                continue;
            }
            let p = (&s + &delta) >> 1_u32;
            let q = (&s - &delta) >> 1_u32;
            if &p * &q == *n {
                info!("Found factors with k = {}", k);
                return Ok((p, q));
            }
        }
    }

    Err(anyhow!("No factors within {} of the guess", search_range))
}
