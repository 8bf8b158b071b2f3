use crate::shared::{self, Remote};
use crate::config;
use anyhow::{anyhow, Result};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

pub const TASK: &str = "sign_oracle";

const BANNER_END: &[u8] = b"service...\n";
const SIGN_PROMPT: &[u8] = b"sign: ";
const REJECTED: &str = "bad input";

#[derive(Deserialize)]
struct Challenge {
    host: String,
    port: u16,
    #[serde(with = "shared::biguint")]
    e: BigUint,
    modulus_bits: u64,
    leaked_bits: u64,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let mut remote = Remote::connect(&challenge.host, challenge.port)?;
    let flag = solve_remote(
        &mut remote,
        &challenge.e,
        challenge.modulus_bits,
        challenge.leaked_bits,
    )?;
    println!("{}", flag);
    Ok(())
}

/// Ask the service to sign `value`. `None` means it refused, which it does for `value >= n`.
fn sign(remote: &mut Remote, value: &BigUint) -> Result<Option<String>> {
    remote.recv_until(SIGN_PROMPT)?;
    remote.send_line(&value.to_string())?;
    let line = remote.recv_line()?;
    if line.contains(REJECTED) {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

pub fn solve_remote(
    remote: &mut Remote,
    e: &BigUint,
    modulus_bits: u64,
    leaked_bits: u64,
) -> Result<String> {
    if leaked_bits == 0 || leaked_bits.saturating_mul(2) > modulus_bits {
        return Err(anyhow!(
            "{} leaked bits do not fit twice into a {} bit modulus",
            leaked_bits,
            modulus_bits
        ));
    }
    let banner = remote.recv_until(BANNER_END)?;
    debug!("Banner: {}", String::from_utf8_lossy(&banner));
    let ciphertext = shared::parse_biguint(&remote.recv_line()?)?;
    info!("Encrypted flag: {}", ciphertext);

    let n = find_modulus(modulus_bits, |value| sign(remote, value))?;
    info!("Found modulus n = {}", n);

    let message = recover_low_bits(&ciphertext, e, &n, leaked_bits, |value| sign(remote, value))?;
    Ok(shared::decode_message(&message))
}

/// Binary search for `n` between `2^(bits-1)` and `2^bits`: the service signs
/// anything below `n` and rejects the rest.
pub fn find_modulus<F>(bits: u64, mut sign: F) -> Result<BigUint>
where
    F: FnMut(&BigUint) -> Result<Option<String>>,
{
    if bits == 0 {
        return Err(anyhow!("Modulus must have at least one bit"));
    }
    let mut low = BigUint::one() << (bits - 1);
    let mut high = BigUint::one() << bits;
    while high > &low + 1_u32 {
        let mid = (&low + &high) >> 1_u32;
        if sign(&mid)?.is_some() {
            low = mid;
        } else {
            high = mid;
        }
    }
    Ok(high)
}

/// Recover `m mod 2^bits` for the plaintext behind `ciphertext`, one bit per round.
///
/// The signature only depends on the low `bits` bits of the decrypted value.
/// Multiplying the ciphertext by `(2^i)^e` decrypts to `m 2^i`, whose low bits
/// are the `bits - i` lowest bits of `m` shifted up, so the next unknown bit
/// is whichever candidate signs the same way.
pub fn recover_low_bits<F>(
    ciphertext: &BigUint,
    e: &BigUint,
    n: &BigUint,
    bits: u64,
    mut sign: F,
) -> Result<BigUint>
where
    F: FnMut(&BigUint) -> Result<Option<String>>,
{
    let mut known = BigUint::zero();
    for found in 0..bits {
        let shift = bits - 1 - found;
        let multiplier = (BigUint::one() << shift).modpow(e, n);
        let target = sign(&(ciphertext * multiplier % n))?
            .ok_or_else(|| anyhow!("Shifted ciphertext was rejected"))?;

        let zero = &known << shift;
        if sign(&zero.modpow(e, n))?.as_ref() == Some(&target) {
            continue;
        }
        let one = &known | (BigUint::one() << found);
        if sign(&(&one << shift).modpow(e, n))?.as_ref() != Some(&target) {
            return Err(anyhow!("Neither candidate matches bit {}", found));
        }
        known = one;
        if found % 64 == 63 {
            debug!("Recovered {} of {} bits", found + 1, bits);
        }
    }
    Ok(known)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number::{mod_inverse, random_prime};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    const FLAG: &[u8] = b"DEAD{sh1ft_m3}";
    const LEAKED_BITS: u64 = 120;

    struct Instance {
        n: BigUint,
        e: BigUint,
        d: BigUint,
    }

    fn instance(seed: u64) -> Instance {
        let mut rng = StdRng::seed_from_u64(seed);
        let e = BigUint::from(65_537_u32);
        loop {
            let p = random_prime(128, &mut rng);
            let q = random_prime(128, &mut rng);
            let phi = (&p - 1_u32) * (&q - 1_u32);
            if let Some(d) = mod_inverse(&e, &phi) {
                return Instance { n: p * q, e, d };
            }
        }
    }

    // the signature is keyed only on the low bits of the decrypted value
    fn signature(instance: &Instance, value: &BigUint) -> Option<String> {
        if value >= &instance.n {
            return None;
        }
        let low = value.modpow(&instance.d, &instance.n) % (BigUint::one() << LEAKED_BITS);
        let mut block = vec![0_u8; 16];
        let bytes = low.to_bytes_be();
        block[16 - bytes.len()..].copy_from_slice(&bytes);
        Some(hex::encode(shared::aes_ecb_encrypt(&[7_u8; 16], &block, false)))
    }

    #[test]
    fn binary_search_lands_on_modulus() {
        let instance = instance(30);
        let n = find_modulus(instance.n.bits(), |value| Ok(signature(&instance, value))).unwrap();
        assert_eq!(n, instance.n);
        assert!(find_modulus(0, |_| Ok(None)).is_err());
    }

    #[test]
    fn low_bits_from_shifted_signatures() {
        let instance = instance(31);
        let message = BigUint::from_bytes_be(FLAG);
        let ciphertext = message.modpow(&instance.e, &instance.n);
        let mut queries = 0;
        let recovered =
            recover_low_bits(&ciphertext, &instance.e, &instance.n, LEAKED_BITS, |value| {
                queries += 1;
                Ok(signature(&instance, value))
            })
            .unwrap();
        assert_eq!(recovered, message);
        assert!(queries <= 3 * LEAKED_BITS);
    }

    #[test]
    fn rejected_shift_is_an_error() {
        let instance = instance(32);
        let result = recover_low_bits(&BigUint::one(), &instance.e, &instance.n, 8, |_| Ok(None));
        assert!(result.is_err());
    }

    #[test]
    fn talks_to_local_service() {
        let instance = instance(33);
        let ciphertext = BigUint::from_bytes_be(FLAG).modpow(&instance.e, &instance.n);
        let (e, bits) = (instance.e.clone(), instance.n.bits());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            write!(stream, "Welcome to the signing service...\n{}\n", ciphertext).unwrap();
            loop {
                // the client hangs up without reading the last prompt
                if write!(stream, "sign: ").is_err() {
                    break;
                }
                let mut line = String::new();
                if !matches!(reader.read_line(&mut line), Ok(n) if n > 0) {
                    break;
                }
                let reply = shared::parse_biguint(&line)
                    .ok()
                    .and_then(|value| signature(&instance, &value));
                match reply {
                    Some(signature) => writeln!(stream, "{}", signature).unwrap(),
                    None => writeln!(stream, "bad input, exiting").unwrap(),
                }
            }
        });

        let mut remote = Remote::connect("127.0.0.1", port).unwrap();
        let flag = solve_remote(&mut remote, &e, bits, LEAKED_BITS).unwrap();
        assert!(solve_remote(&mut remote, &e, 100, LEAKED_BITS).is_err());
        drop(remote);
        server.join().unwrap();
        assert_eq!(flag.as_bytes(), FLAG);
    }
}
