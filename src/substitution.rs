use crate::{config, shared};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const TASK: &str = "substitution";

#[derive(Deserialize)]
struct Challenge {
    input: String,
    from: String,
    to: String,
    flag_prefix: String,
    crib: Option<Crib>,
}

#[derive(Deserialize)]
struct Crib {
    ciphertext: String,
    plaintext: String,
}

/// Monoalphabetic substitution over `a..=z`, applied to both cases.
pub struct Table {
    map: [Option<u8>; 26],
}

impl Table {
    pub fn new(from: &str, to: &str) -> Result<Self> {
        if from.len() != to.len() {
            return Err(anyhow!("Alphabets differ in length"));
        }
        let mut table = Self { map: [None; 26] };
        for (c, p) in from.bytes().zip(to.bytes()) {
            table.learn(c, p)?;
        }
        Ok(table)
    }

    /// Partial key from ciphertext known to decrypt to `plaintext`.
    pub fn from_crib(ciphertext: &str, plaintext: &str) -> Result<Self> {
        if ciphertext.len() != plaintext.len() {
            return Err(anyhow!("Crib halves differ in length"));
        }
        let mut table = Self { map: [None; 26] };
        for (c, p) in ciphertext.bytes().zip(plaintext.bytes()) {
            if c.is_ascii_alphabetic() && p.is_ascii_alphabetic() {
                table.learn(c, p)?;
            } else if c != p {
                return Err(anyhow!("Crib maps '{}' to '{}'", c as char, p as char));
            }
        }
        Ok(table)
    }

    fn learn(&mut self, cipher: u8, plain: u8) -> Result<()> {
        let (cipher, plain) = (cipher.to_ascii_lowercase(), plain.to_ascii_lowercase());
        if !cipher.is_ascii_lowercase() || !plain.is_ascii_lowercase() {
            return Err(anyhow!("Only letters can be substituted"));
        }
        let index = usize::from(cipher - b'a');
        if let Some(existing) = self.map[index] {
            if existing != plain {
                return Err(anyhow!(
                    "'{}' maps to both '{}' and '{}'",
                    cipher as char,
                    existing as char,
                    plain as char
                ));
            }
        }
        let taken = self
            .map
            .iter()
            .enumerate()
            .any(|(i, &m)| m == Some(plain) && i != index);
        if taken {
            return Err(anyhow!("'{}' has two preimages", plain as char));
        }
        self.map[index] = Some(plain);
        Ok(())
    }

    pub fn known(&self) -> usize {
        self.map.iter().flatten().count()
    }

    /// Whether every letter this table and `other` both know maps the same way.
    pub fn agrees_with(&self, other: &Table) -> bool {
        self.map
            .iter()
            .zip(&other.map)
            .all(|pair| match pair {
                (Some(a), Some(b)) => a == b,
                _ => true,
            })
    }

    /// Decrypt, keeping case; letters without a known mapping become `?`.
    pub fn decrypt(&self, text: &str) -> String {
        text.chars()
            .map(|ch| {
                if !ch.is_ascii_alphabetic() {
                    return ch;
                }
                let Ok(byte) = u8::try_from(ch.to_ascii_lowercase()) else {
                    return ch;
                };
                let index = usize::from(byte - b'a');
                match self.map[index] {
                    Some(plain) if ch.is_ascii_uppercase() => char::from(plain.to_ascii_uppercase()),
                    Some(plain) => char::from(plain),
                    None => '?',
                }
            })
            .collect()
    }
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let text = fs::read_to_string(config::resource(resources, &challenge.input))?;
    let table = Table::new(&challenge.from, &challenge.to)?;

    if let Some(crib) = &challenge.crib {
        let partial = Table::from_crib(&crib.ciphertext, &crib.plaintext)?;
        info!("Crib fixes {} of 26 letters", partial.known());
        if !table.agrees_with(&partial) {
            warn!("Key table contradicts the crib");
        }
    }

    let plaintext = table.decrypt(&text);
    info!("Decrypted {} characters", plaintext.len());
    let flag = shared::find_flag(plaintext.as_bytes(), challenge.flag_prefix.as_bytes())
        .ok_or_else(|| anyhow!("No '{}' in the decrypted text", challenge.flag_prefix))?;
    println!("{}", flag);

    Ok(())
}
