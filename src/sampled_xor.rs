use crate::config;
use anyhow::{anyhow, Result};
use itertools::Itertools;
use serde::Deserialize;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const TASK: &str = "sampled_xor";

// shortest hex run taken for a ciphertext
const MIN_HEX_LEN: usize = 70;

#[derive(Deserialize)]
struct Challenge {
    input: String,
    repeats: usize,
    known_prefix: String,
    known_suffix: String,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let text = fs::read_to_string(config::resource(resources, &challenge.input))?;
    let ciphertexts = parse_ciphertexts(&text)?;
    info!("Parsed {} ciphertexts", ciphertexts.len());

    let flag_len = flag_length(ciphertexts[0].len(), challenge.repeats)?;
    info!("Expected flag length: {}", flag_len);

    let mut known: Vec<(usize, u8)> = challenge.known_prefix.bytes().enumerate().collect();
    let suffix_start = flag_len
        .checked_sub(challenge.known_suffix.len())
        .ok_or_else(|| anyhow!("Suffix longer than the flag"))?;
    known.extend(
        challenge
            .known_suffix
            .bytes()
            .enumerate()
            .map(|(i, b)| (suffix_start + i, b)),
    );

    let recovered = recover(&ciphertexts, flag_len, &known)?;
    let unknown = recovered.iter().filter(|b| b.is_none()).count();
    if unknown > 0 {
        warn!("{} positions are not linked to a known byte", unknown);
    }
    let flag: Vec<u8> = recovered.iter().map(|b| b.unwrap_or(b'?')).collect();
    if unknown == 0 {
        let broken = inconsistencies(&flag, &ciphertexts);
        if broken > 0 {
            return Err(anyhow!("Recovered flag breaks {} relations", broken));
        }
        info!("Flag is consistent with all XOR relationships");
    }
    println!("{}", String::from_utf8_lossy(&flag));

    Ok(())
}

/// Each ciphertext covers the flag `repeats` times.
pub fn flag_length(ciphertext_len: usize, repeats: usize) -> Result<usize> {
    if repeats == 0 {
        return Err(anyhow!("The flag must be repeated at least once"));
    }
    Ok(ciphertext_len / repeats)
}

/// Hex runs of at least `MIN_HEX_LEN` characters, in order of appearance.
pub fn parse_ciphertexts(text: &str) -> Result<Vec<Vec<u8>>> {
    let ciphertexts = text
        .split(|c: char| !c.is_ascii_hexdigit())
        .filter(|run| run.len() >= MIN_HEX_LEN)
        .map(hex::decode)
        .collect::<Result<Vec<_>, _>>()?;
    if ciphertexts.is_empty() {
        return Err(anyhow!("No ciphertexts found"));
    }
    Ok(ciphertexts)
}

/// XOR relations `flag[a] ^ flag[b] = delta` implied by every pair of strides.
///
/// Ciphertext `s` (stride `s + 1`) encrypts `flag[(s+1) i mod len]` under the shared `K[i]`.
fn relations(ciphertexts: &[Vec<u8>], flag_len: usize) -> Vec<Vec<(usize, u8)>> {
    let mut edges = vec![Vec::new(); flag_len];
    for ((s1, c1), (s2, c2)) in ciphertexts.iter().enumerate().tuple_combinations() {
        for (i, (a, b)) in c1.iter().zip(c2).enumerate() {
            let p1 = (s1 + 1) * i % flag_len;
            let p2 = (s2 + 1) * i % flag_len;
            edges[p1].push((p2, a ^ b));
            edges[p2].push((p1, a ^ b));
        }
    }
    edges
}

/// Propagate known bytes along the relations. Unreached positions stay `None`.
pub fn recover(
    ciphertexts: &[Vec<u8>],
    flag_len: usize,
    known: &[(usize, u8)],
) -> Result<Vec<Option<u8>>> {
    if flag_len == 0 {
        return Err(anyhow!("Empty flag"));
    }
    let edges = relations(ciphertexts, flag_len);
    let mut flag = vec![None; flag_len];
    let mut queue = VecDeque::new();

    for &(position, byte) in known {
        match flag.get(position).copied().flatten() {
            Some(existing) if existing != byte => {
                return Err(anyhow!("Known bytes disagree at {}", position));
            }
            _ if position >= flag_len => return Err(anyhow!("Known byte {} is past the end", position)),
            _ => {
                flag[position] = Some(byte);
                queue.push_back(position);
            }
        }
    }

    while let Some(position) = queue.pop_front() {
        let Some(value) = flag[position] else {
            continue;
        };
        for &(neighbour, delta) in &edges[position] {
            match flag[neighbour] {
                None => {
                    flag[neighbour] = Some(value ^ delta);
                    queue.push_back(neighbour);
                }
                Some(existing) if existing != value ^ delta => {
                    return Err(anyhow!(
                        "Contradiction between positions {} and {}",
                        position,
                        neighbour
                    ));
                }
                Some(_) => {}
            }
        }
    }

    Ok(flag)
}

/// Number of relations a full candidate flag violates.
pub fn inconsistencies(flag: &[u8], ciphertexts: &[Vec<u8>]) -> usize {
    relations(ciphertexts, flag.len())
        .iter()
        .enumerate()
        .flat_map(|(p1, edges)| edges.iter().map(move |&(p2, delta)| (p1, p2, delta)))
        .filter(|&(p1, p2, delta)| flag[p1] ^ flag[p2] != delta)
        .count()
        / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const FLAG: &[u8] = b"DUCTF{the_hungry_little_p_smooth_caterpillar_won_an_allegory_for_life}";

    fn challenge(seed: u64) -> Vec<Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let padded = FLAG.repeat(7);
        let key: Vec<u8> = (0..padded.len()).map(|_| rng.gen()).collect();
        (1..=7)
            .map(|stride| {
                padded
                    .iter()
                    .step_by(stride)
                    .zip(&key)
                    .map(|(f, k)| f ^ k)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn recovers_from_prefix() {
        let ciphertexts = challenge(12);
        let known: Vec<(usize, u8)> = b"DUCTF{".iter().copied().enumerate().collect();
        let flag = recover(&ciphertexts, FLAG.len(), &known).unwrap();
        let flag: Vec<u8> = flag.into_iter().map(|b| b.unwrap()).collect();
        assert_eq!(flag, FLAG);
        assert_eq!(inconsistencies(&flag, &ciphertexts), 0);
    }

    #[test]
    fn wrong_candidate_is_flagged() {
        let ciphertexts = challenge(13);
        let mut flag = FLAG.to_vec();
        flag[20] ^= 1;
        assert!(inconsistencies(&flag, &ciphertexts) > 0);

        let known = [(0, b'D'), (1, b'X')];
        assert!(recover(&ciphertexts, FLAG.len(), &known).is_err());
    }

    #[test]
    fn flag_length_from_repeats() {
        let ciphertexts = challenge(15);
        assert_eq!(flag_length(ciphertexts[0].len(), 7).unwrap(), FLAG.len());
        assert!(flag_length(ciphertexts[0].len(), 0).is_err());
    }

    #[test]
    fn parses_hex_runs() {
        let ciphertexts = challenge(14);
        let text: String = ciphertexts
            .iter()
            .enumerate()
            .map(|(i, ct)| format!("c{} = {}\n", i + 1, hex::encode(ct)))
            .collect();
        assert_eq!(parse_ciphertexts(&text).unwrap(), ciphertexts);
        assert!(parse_ciphertexts("c1 = abcd").is_err());
    }
}
