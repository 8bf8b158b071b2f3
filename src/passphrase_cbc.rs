use crate::{config, shared};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::info;

pub const TASK: &str = "passphrase_cbc";

#[derive(Deserialize)]
struct Challenge {
    input: String,
    passphrase: String,
    key_len: usize,
    output: Option<String>,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let ciphertext = fs::read(config::resource(resources, &challenge.input))?;

    let key = derive_key(challenge.passphrase.as_bytes(), challenge.key_len);
    info!("Derived AES key {}", hex::encode(&key));
    let plaintext = decrypt_log(&key, &ciphertext)?;
    info!("Decrypted {} bytes", plaintext.len());

    let text = String::from_utf8_lossy(&plaintext);
    if let Some(output) = &challenge.output {
        let output = config::resource(resources, output);
        fs::write(&output, text.as_bytes())?;
        info!("Saved decrypted log to {}", output.display());
    }
    println!("{}", text);

    Ok(())
}

/// `D_i = SHA256(D_{i-1} || passphrase)` with `D_0` empty, concatenated and cut to `len`.
pub fn derive_key(passphrase: &[u8], len: usize) -> Vec<u8> {
    let mut derived = Vec::with_capacity(len);
    let mut block = Vec::new();
    while derived.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(&block);
        hasher.update(passphrase);
        block = hasher.finalize().to_vec();
        derived.extend_from_slice(&block);
    }
    derived.truncate(len);
    derived
}

/// AES-CBC with an all-zero IV and PKCS#7 padding.
pub fn decrypt_log(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() % shared::AES_BLOCK_LEN != 0 {
        return Err(anyhow!("Ciphertext is not a whole number of blocks"));
    }
    shared::aes_cbc_decrypt(key, &[0; shared::AES_BLOCK_LEN], ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_block_is_plain_sha256() {
        let key = derive_key(b"VIRELIA-WATER-FAC", 32);
        assert_eq!(key, Sha256::digest(b"VIRELIA-WATER-FAC").to_vec());
    }

    #[test]
    fn longer_keys_chain_blocks() {
        let key = derive_key(b"pass", 48);
        let first = Sha256::digest(b"pass");
        let mut chained = first.to_vec();
        chained.extend_from_slice(b"pass");
        assert_eq!(&key[..32], first.as_slice());
        assert_eq!(&key[32..], &Sha256::digest(&chained)[..16]);
    }

    #[test]
    fn decrypts_log() {
        let key = derive_key(b"VIRELIA-WATER-FAC", 32);
        let log = b"2025-06-27 PUMP1=ON\nTHM{z3r0_1v_15_n0t_a_s3cr3t}\n";
        let ciphertext = shared::aes_cbc_encrypt(&key, &[0; 16], log);
        assert_eq!(decrypt_log(&key, &ciphertext).unwrap(), log);
        assert!(decrypt_log(&key, &ciphertext[..20]).is_err());
    }
}
