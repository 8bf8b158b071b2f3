use crate::config;
use crate::shared::{self, Remote};
use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub const TASK: &str = "keystream_shift";

#[derive(Deserialize)]
struct Challenge {
    host: String,
    port: u16,
    keystream_len: usize,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let mut remote = Remote::connect(&challenge.host, challenge.port)?;
    let (encrypted_flag, keystream) = recover_keystream(&mut remote, challenge.keystream_len)?;

    let candidates = plausible_decryptions(&encrypted_flag, &keystream);
    if candidates.is_empty() {
        println!("No plausible decryptions found");
    }
    for (shift, candidate) in candidates {
        println!("[shift {:03}] {}", shift, candidate);
    }

    Ok(())
}

/// Read the encrypted flag, then encrypt `len` zero bytes to get the raw keystream back.
pub fn recover_keystream(remote: &mut Remote, len: usize) -> Result<(Vec<u8>, Vec<u8>)> {
    let banner = remote.recv_line()?;
    info!("Banner: {}", banner);
    let encrypted_flag = hex::decode(remote.recv_line()?.trim())?;
    info!("Received encrypted flag ({} bytes)", encrypted_flag.len());

    remote.send_line(&"00".repeat(len))?;
    let keystream = hex::decode(remote.recv_line()?.trim())?;
    info!("Recovered keystream ({} bytes)", keystream.len());

    Ok((encrypted_flag, keystream))
}

/// Try every rotation of the keystream against the flag, keeping printable results.
pub fn plausible_decryptions(encrypted_flag: &[u8], keystream: &[u8]) -> Vec<(usize, String)> {
    if keystream.is_empty() {
        return Vec::new();
    }
    (0..keystream.len())
        .filter_map(|shift| {
            let candidate: Vec<u8> = encrypted_flag
                .iter()
                .enumerate()
                .map(|(i, c)| c ^ keystream[(i + shift) % keystream.len()])
                .collect();
            shared::is_printable(&candidate)
                .then(|| (shift, String::from_utf8_lossy(&candidate).into_owned()))
        })
        .collect()
}
