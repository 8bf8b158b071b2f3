use crate::number::{is_probable_prime, mod_inverse, next_prime, prev_prime};
use crate::{config, shared};
use anyhow::{anyhow, Result};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::{One, Zero};
use rayon::prelude::*;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

pub const TASK: &str = "consecutive_primes";

#[derive(Deserialize)]
struct Challenge {
    #[serde(with = "shared::biguint")]
    n: BigUint,
    #[serde(with = "shared::biguint")]
    e: BigUint,
    #[serde(with = "shared::biguint")]
    ciphertext: BigUint,
    prime_counts: Vec<u32>,
    max_offset: u64,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let factors = factor_consecutive(&challenge.n, &challenge.prime_counts, challenge.max_offset)?;
    info!("Factored N into {} primes", factors.len());

    let message = decrypt(&factors, &challenge.e, &challenge.ciphertext)?;
    println!("{}", shared::decode_message(&message));

    Ok(())
}

/// Factor `n`, a product of `k` consecutive primes for one of the given `k`.
///
/// The k-th root of `n` falls between the smallest and largest factor, so a
/// divisor sits close to it; from there the rest are its prime neighbours.
pub fn factor_consecutive(n: &BigUint, prime_counts: &[u32], max_offset: u64) -> Result<Vec<BigUint>> {
    if prime_counts.contains(&0) {
        return Err(anyhow!("A modulus needs at least one prime factor"));
    }
    for &k in prime_counts {
        info!("Trying with {} prime factors...", k);
        let expected = usize::try_from(k)?;
        let approx = n.nth_root(k);
        let centre = if approx.is_odd() { approx } else { approx - 1_u32 };

        let found = (0..max_offset).into_par_iter().find_map_any(|offset| {
            let step = BigUint::from(offset) * 2_u32;
            let up = &centre + &step;
            if divides(&up, n) {
                return Some(up);
            }
            if centre > step {
                let down = &centre - &step;
                if divides(&down, n) {
                    return Some(down);
                }
            }
            None
        });

        let Some(prime) = found else {
            warn!("No factor within {} of the {}-th root", max_offset, k);
            continue;
        };
        info!("Found a prime factor: {}", prime);

        let factors = walk_neighbours(n, prime);
        if factors.len() == expected {
            return Ok(factors);
        }
        warn!("Walk found {} factors, expected {}", factors.len(), k);
    }

    Err(anyhow!("Factorization failed for every prime count"))
}

fn divides(candidate: &BigUint, n: &BigUint) -> bool {
    candidate > &BigUint::one()
        && (n % candidate).is_zero()
        && is_probable_prime(candidate)
}

fn walk_neighbours(n: &BigUint, prime: BigUint) -> Vec<BigUint> {
    let mut rest = n / &prime;
    let mut factors = vec![prime.clone()];

    let mut current = prime.clone();
    while !rest.is_one() {
        let next = next_prime(&current);
        if !(&rest % &next).is_zero() {
            break;
        }
        rest /= &next;
        factors.push(next.clone());
        current = next;
    }

    let mut current = prime;
    while !rest.is_one() {
        let Some(prev) = prev_prime(&current) else {
            break;
        };
        if !(&rest % &prev).is_zero() {
            break;
        }
        rest /= &prev;
        factors.push(prev.clone());
        current = prev;
    }

    if !rest.is_one() {
        return Vec::new();
    }
    factors.sort();
    factors
}

/// RSA decryption for a square-free multi-prime modulus.
pub fn decrypt(factors: &[BigUint], e: &BigUint, ciphertext: &BigUint) -> Result<BigUint> {
    let n: BigUint = factors.iter().product();
    let phi: BigUint = factors.iter().map(|p| p - 1_u32).product();
    let d = mod_inverse(e, &phi).ok_or_else(|| anyhow!("e is not invertible mod phi"))?;
    Ok(ciphertext.modpow(&d, &n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number::random_prime;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn factors_and_decrypts() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut primes = vec![random_prime(64, &mut rng)];
        for _ in 1..6 {
            let last = primes.last().unwrap().clone();
            primes.push(next_prime(&last));
        }
        let n: BigUint = primes.iter().product();
        let e = BigUint::from(65_537_u32);
        let message = shared::bytes_to_int(b"uiuctf{t00_m4ny_pr1m3s}");
        let ciphertext = message.modpow(&e, &n);

        let factors = factor_consecutive(&n, &[5, 6, 7], 10_000).unwrap();
        assert_eq!(factors, primes);
        assert_eq!(decrypt(&factors, &e, &ciphertext).unwrap(), message);
    }

    #[test]
    fn non_consecutive_modulus_fails() {
        let p = next_prime(&BigUint::from(1_000_000_u32));
        let q = next_prime(&BigUint::from(5_000_000_u32));
        assert!(factor_consecutive(&(p * q), &[2], 100).is_err());
    }

    #[test]
    fn zero_prime_count_is_rejected() {
        let p = next_prime(&BigUint::from(1_000_000_u32));
        let q = next_prime(&p);
        let n = &p * &q;
        assert!(factor_consecutive(&n, &[0, 2], 100).is_err());
        assert_eq!(factor_consecutive(&n, &[2], 100).unwrap(), vec![p, q]);
    }
}
