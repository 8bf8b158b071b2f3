use crate::config;
use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use blake2::digest::{Update, VariableOutput};
use blake2::VarBlake2b;
use md5::Md5;
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

pub const TASK: &str = "hash_chain_xor";

const MIX: [u32; 8] = [
    0x6745_2301,
    0xEFCD_AB89,
    0x98BA_DCFE,
    0x1032_5476,
    0xC3D2_E1F0,
    0x7654_3210,
    0xFEDC_BA98,
    0x89AB_CDEF,
];

#[derive(Deserialize)]
struct Challenge {
    seed: String,
    rounds: usize,
    message: String,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let key = derive_key(challenge.seed.as_bytes(), challenge.rounds)?;
    info!("Derived {}-byte key {}", key.len(), hex::encode(&key));

    let ciphertext = STANDARD.decode(challenge.message.trim())?;
    let plaintext = decrypt(&ciphertext, &key)?;
    println!("{}", String::from_utf8_lossy(&plaintext));

    Ok(())
}

/// Hash chain cycling through SHA-256, BLAKE2b-256, doubled MD5 and SHA-1 padded with the previous digest.
pub fn derive_key(seed: &[u8], rounds: usize) -> Result<Vec<u8>> {
    let mut digest = seed.to_vec();
    for round in 0..rounds {
        digest = match round % 4 {
            0 => Sha256::digest(&digest).to_vec(),
            1 => blake2b_256(&digest)?,
            2 => Md5::digest(&digest).repeat(2),
            _ => {
                let mut next = Sha1::digest(&digest).to_vec();
                next.extend_from_slice(&digest[..digest.len().min(12)]);
                next
            }
        };
    }
    Ok(digest)
}

fn blake2b_256(data: &[u8]) -> Result<Vec<u8>> {
    let mut hasher = VarBlake2b::new(32).map_err(|e| anyhow!("{:?}: Bad digest size", e))?;
    Update::update(&mut hasher, data);
    let mut out = Vec::new();
    hasher.finalize_variable(|digest| out.extend_from_slice(digest));
    Ok(out)
}

/// Invert `c = rotl3(p ^ key) ^ low byte of MIX`.
pub fn decrypt(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.is_empty() {
        return Err(anyhow!("Empty key"));
    }
    Ok(ciphertext
        .iter()
        .enumerate()
        .map(|(i, &byte)| {
            let unmixed = byte ^ MIX[i % MIX.len()].to_le_bytes()[0];
            unmixed.rotate_right(3) ^ key[i % key.len()]
        })
        .collect())
}
