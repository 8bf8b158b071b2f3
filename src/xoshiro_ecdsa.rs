use crate::curve::{self, Point};
use crate::gf2::{BitRow, System};
use crate::number::mod_inverse;
use crate::{config, shared};
use anyhow::{anyhow, Result};
use num_bigint::BigUint;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

pub const TASK: &str = "xoshiro_ecdsa";

const STATE_BITS: usize = 256;
const LEAKS: usize = 4;

#[derive(Deserialize)]
struct Challenge {
    leaks: [u64; LEAKS],
    #[serde(with = "shared::biguint")]
    public_x: BigUint,
    #[serde(with = "shared::biguint")]
    public_y: BigUint,
    #[serde(with = "shared::biguint")]
    h: BigUint,
    #[serde(with = "shared::biguint")]
    r: BigUint,
    #[serde(with = "shared::biguint")]
    s: BigUint,
    ciphertext: String,
    max_attempts: usize,
}

/// The leaky generator: a xoshiro256 state whose linear output `s0 ^ s1 ^ s2`
/// is leaked, and whose scrambled output is used as the ECDSA nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Xoshiro {
    pub state: [u64; 4],
}

impl Xoshiro {
    pub fn update(&mut self) {
        let [mut s0, mut s1, mut s2, mut s3] = self.state;
        let t = s1 << 17;
        s2 ^= s0;
        s3 ^= s1;
        s1 ^= s2;
        s0 ^= s3;
        s2 ^= t;
        s3 = s3.rotate_left(45);
        self.state = [s0, s1, s2, s3];
    }

    fn raw(&self) -> u64 {
        self.state[0] ^ self.state[1] ^ self.state[2]
    }

    pub fn next_leak(&mut self) -> u64 {
        let out = self.raw();
        self.update();
        out
    }

    pub fn next_nonce(&mut self) -> u64 {
        let out = temper(self.raw());
        self.update();
        out
    }
}

pub fn temper(raw: u64) -> u64 {
    raw.wrapping_mul(5).rotate_left(7).wrapping_mul(9)
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let signature = Signature {
        h: challenge.h,
        r: challenge.r,
        s: challenge.s,
    };
    let public_key = Some((challenge.public_x, challenge.public_y));

    let d = recover_private_key(
        &challenge.leaks,
        &signature,
        &public_key,
        challenge.max_attempts,
    )?;
    info!("Recovered private key {:x}", d);

    let flag = decrypt_flag(&d, &hex::decode(challenge.ciphertext.trim())?)?;
    println!("{}", String::from_utf8_lossy(&flag));

    Ok(())
}

pub struct Signature {
    pub h: BigUint,
    pub r: BigUint,
    pub s: BigUint,
}

/// Invert the generator's linear leak: every output bit is a GF(2) combination of
/// the 256 state bits, so four 64-bit leaks pin down the whole initial state.
pub fn recover_state(leaks: &[u64; LEAKS]) -> Result<Xoshiro> {
    let mut rows = vec![BitRow::zeros(STATE_BITS); LEAKS * 64];
    for k in 0..STATE_BITS {
        let mut state = [0_u64; 4];
        state[k / 64] = 1 << (k % 64);
        let mut rng = Xoshiro { state };
        for output in 0..LEAKS {
            let out = rng.next_leak();
            for bit in 0..64 {
                if out >> bit & 1 == 1 {
                    rows[output * 64 + bit].set(k, true);
                }
            }
        }
    }

    let mut system = System::new(STATE_BITS);
    for (i, row) in rows.into_iter().enumerate() {
        system.push(row, leaks[i / 64] >> (i % 64) & 1 == 1)?;
    }
    let solution = system.solve()?;

    let mut state = [0_u64; 4];
    state.copy_from_slice(solution.words());
    Ok(Xoshiro { state })
}

pub fn recover_private_key(
    leaks: &[u64; LEAKS],
    signature: &Signature,
    public_key: &Point,
    max_attempts: usize,
) -> Result<BigUint> {
    let k1 = curve::secp256k1();
    if public_key.is_none() || !k1.curve.contains(public_key) {
        return Err(anyhow!("Public key is not a point on secp256k1"));
    }
    let mut rng = recover_state(leaks)?;
    for _ in 0..LEAKS {
        rng.update();
    }
    debug!("Generator state after leaks: {:x?}", rng.state);

    for attempt in 0..max_attempts {
        let k = BigUint::from(rng.next_nonce()) % &k1.n;
        let Some((x, _)) = k1.mul_g(&k) else {
            continue;
        };
        if x % &k1.n != signature.r {
            continue;
        }
        info!("Nonce found after {} draws", attempt + 1);

        let r_inv = mod_inverse(&signature.r, &k1.n).ok_or_else(|| anyhow!("r is not invertible"))?;
        let h = &signature.h % &k1.n;
        let sk = &signature.s * &k % &k1.n;
        let d = (sk + &k1.n - h) % &k1.n * r_inv % &k1.n;
        if &k1.mul_g(&d) != public_key {
            return Err(anyhow!("Recovered key does not match the public key"));
        }
        return Ok(d);
    }

    Err(anyhow!("No matching nonce in {} draws", max_attempts))
}

/// The flag is AES-CBC encrypted under `SHA-256(d)`, IV first.
pub fn decrypt_flag(d: &BigUint, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < shared::AES_BLOCK_LEN {
        return Err(anyhow!("Ciphertext is shorter than an IV"));
    }
    let key = Sha256::digest(&shared::int_to_bytes(d));
    let (iv, body) = ciphertext.split_at(shared::AES_BLOCK_LEN);
    shared::aes_cbc_decrypt(&key, iv, body)
}
