use crate::config;
use crate::shared::Remote;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

pub const TASK: &str = "distinct_key_xor";

#[derive(Deserialize)]
struct Challenge {
    host: String,
    port: u16,
    samples: usize,
    first_byte: char,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let mut remote = Remote::connect(&challenge.host, challenge.port)?;
    let ciphertexts = collect(&mut remote, challenge.samples)?;

    let deltas = resolve_deltas(&ciphertexts)?;
    let flag = reconstruct(first_byte_value(challenge.first_byte)?, &deltas);
    println!("{}", String::from_utf8_lossy(&flag));

    Ok(())
}

/// The flag's first byte is configured as a character and must fit in one byte.
pub fn first_byte_value(first_byte: char) -> Result<u8> {
    u8::try_from(first_byte)
        .map_err(|_| anyhow!("First byte {:?} does not fit in a byte", first_byte))
}

pub fn collect(remote: &mut Remote, samples: usize) -> Result<Vec<Vec<u8>>> {
    let banner = remote.recv_line()?;
    info!("Server: {}", banner);
    let mut ciphertexts = Vec::with_capacity(samples);
    for i in 0..samples {
        remote.send_line("go")?;
        ciphertexts.push(hex::decode(remote.recv_line()?.trim())?);
        if (i + 1) % 100 == 0 {
            info!("Collected {}/{} ciphertexts", i + 1, samples);
        }
    }
    Ok(ciphertexts)
}

/// Candidate set of a single byte value.
#[derive(Clone)]
struct Candidates([bool; 256]);

impl Candidates {
    fn count(&self) -> usize {
        self.0.iter().filter(|&&b| b).count()
    }

    fn single(&self) -> Option<u8> {
        if self.count() != 1 {
            return None;
        }
        self.0
            .iter()
            .position(|&b| b)
            .and_then(|v| u8::try_from(v).ok())
    }
}

/// Recover `flag[0] ^ flag[i]` for every position.
///
/// Each key has pairwise distinct bytes, so `ct[i] ^ ct[j]` takes every value
/// except `flag[i] ^ flag[j]`. Pairs left ambiguous by sampling are settled
/// through a third position whose deltas are already known.
pub fn resolve_deltas(ciphertexts: &[Vec<u8>]) -> Result<Vec<u8>> {
    let len = ciphertexts
        .first()
        .map(Vec::len)
        .ok_or_else(|| anyhow!("No ciphertexts"))?;
    if ciphertexts.iter().any(|ct| ct.len() != len) {
        return Err(anyhow!("Ciphertexts differ in length"));
    }

    let mut deltas = vec![vec![Candidates([true; 256]); len]; len];
    for ct in ciphertexts {
        for i in 0..len {
            for j in i + 1..len {
                deltas[i][j].0[usize::from(ct[i] ^ ct[j])] = false;
            }
        }
    }
    for i in 0..len {
        for j in i + 1..len {
            deltas[j][i] = deltas[i][j].clone();
        }
    }

    loop {
        let mut changed = false;
        for i in 0..len {
            for j in i + 1..len {
                if deltas[i][j].count() <= 1 {
                    continue;
                }
                let known = (0..len)
                    .filter(|&k| k != i && k != j)
                    .find_map(|k| Some(deltas[i][k].single()? ^ deltas[j][k].single()?));
                if let Some(delta) = known {
                    if !deltas[i][j].0[usize::from(delta)] {
                        return Err(anyhow!("Contradicting deltas at ({}, {})", i, j));
                    }
                    let mut resolved = Candidates([false; 256]);
                    resolved.0[usize::from(delta)] = true;
                    deltas[i][j] = resolved.clone();
                    deltas[j][i] = resolved;
                    changed = true;
                }
            }
        }

        let worst = (0..len)
            .flat_map(|i| (i + 1..len).map(move |j| (i, j)))
            .map(|(i, j)| deltas[i][j].count())
            .max()
            .unwrap_or(1);
        info!("Propagation pass complete, max candidates remaining: {}", worst);
        if worst == 0 {
            return Err(anyhow!("Every delta was observed for some pair"));
        }
        if worst == 1 {
            break;
        }
        if !changed {
            return Err(anyhow!("Could not resolve deltas, collect more samples"));
        }
    }

    Ok((0..len)
        .map(|i| if i == 0 { 0 } else { deltas[0][i].single().unwrap_or(0) })
        .collect())
}

pub fn reconstruct(first_byte: u8, deltas: &[u8]) -> Vec<u8> {
    deltas.iter().map(|d| first_byte ^ d).collect()
}
