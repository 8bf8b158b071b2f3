use crate::{config, shared};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const TASK: &str = "known_header";

// PNG signature followed by the IHDR chunk length and type
pub const PNG_HEADER: &[u8; 16] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

const ENCRYPTED_EXTENSION: &str = "enc";

#[derive(Deserialize)]
struct Challenge {
    directory: String,
    sample: String,
    flag_prefix: String,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let directory = config::resource(resources, &challenge.directory);

    let sample = fs::read(directory.join(&challenge.sample))?;
    let key = recover_key(&sample, PNG_HEADER)?;
    info!("Recovered the key: {}", hex::encode(&key));

    let decrypted = decrypt_directory(&directory, &key)?;
    info!("Decrypted {} files", decrypted.len());

    for path in &decrypted {
        if let Some(flag) = shared::find_flag(&fs::read(path)?, challenge.flag_prefix.as_bytes()) {
            info!("Found the flag in {}", path.display());
            println!("{}", flag);
            return Ok(());
        }
    }
    Err(anyhow!("No decrypted file contains '{}'", challenge.flag_prefix))
}

/// XOR key whose length equals the known header's.
pub fn recover_key(ciphertext: &[u8], header: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < header.len() {
        return Err(anyhow!("Ciphertext is shorter than the known header"));
    }
    Ok(shared::xor(&ciphertext[..header.len()], header))
}

pub fn repeating_xor(data: &[u8], key: &[u8]) -> Vec<u8> {
    data.iter().zip(key.iter().cycle()).map(|(d, k)| d ^ k).collect()
}

/// Decrypt every `*.enc` file below `directory` next to its original, returning the new paths.
pub fn decrypt_directory(directory: &Path, key: &[u8]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for path in encrypted_files(directory)? {
        let plaintext = repeating_xor(&fs::read(&path)?, key);
        let output = path.with_extension("");
        fs::write(&output, plaintext)?;
        debug!("Decrypted {} -> {}", path.display(), output.display());
        written.push(output);
    }
    Ok(written)
}

fn encrypted_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_dir() {
            files.extend(encrypted_files(&path)?);
        } else if path.extension().map_or(false, |ext| ext == ENCRYPTED_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
