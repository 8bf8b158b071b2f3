use crate::{config, shared};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const TASK: &str = "nonce_reuse";

#[derive(Deserialize)]
struct Challenge {
    first: String,
    second: String,
    known_plaintext: String,
    layout: Layout,
}

/// Captured packet framing: `[nonce][body][tag]`.
#[derive(Deserialize, Clone, Copy)]
pub struct Layout {
    pub nonce_len: usize,
    pub body_len: usize,
    pub tag_len: usize,
}

pub struct Packet<'a> {
    pub nonce: &'a [u8],
    pub body: &'a [u8],
}

impl Layout {
    pub fn split<'a>(&self, packet: &'a [u8]) -> Result<Packet<'a>> {
        let expected = self.nonce_len + self.body_len + self.tag_len;
        if packet.len() != expected {
            return Err(anyhow!(
                "Packet is {} bytes, expected {}",
                packet.len(),
                expected
            ));
        }
        let (nonce, rest) = packet.split_at(self.nonce_len);
        Ok(Packet {
            nonce,
            body: &rest[..self.body_len],
        })
    }
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let first = fs::read(config::resource(resources, &challenge.first))?;
    let second = fs::read(config::resource(resources, &challenge.second))?;

    let plaintext = recover_second(
        challenge.layout,
        &first,
        &second,
        challenge.known_plaintext.as_bytes(),
    )?;
    println!("{}", String::from_utf8_lossy(&plaintext));

    Ok(())
}

/// Under a reused nonce both bodies share a keystream, so `P2 = P1 ^ C1 ^ C2`.
pub fn recover_second(layout: Layout, first: &[u8], second: &[u8], known: &[u8]) -> Result<Vec<u8>> {
    let first = layout.split(first)?;
    let second = layout.split(second)?;
    if first.nonce != second.nonce {
        warn!("Packets carry different nonces, recovery will likely fail");
    }
    if known.len() != layout.body_len {
        return Err(anyhow!(
            "Known plaintext is {} bytes, the body is {}",
            known.len(),
            layout.body_len
        ));
    }
    info!("Recovering {} bytes of the second packet", layout.body_len);

    Ok(shared::xor(&shared::xor(known, first.body), second.body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xsalsa20poly1305::aead::generic_array::GenericArray;
    use xsalsa20poly1305::aead::{AeadInPlace, NewAead};
    use xsalsa20poly1305::XSalsa20Poly1305;

    const KNOWN: &[u8] =
        b"BEGIN TELEMETRY VIRELIA;ID=ZTRX0110393939DC;PUMP1=OFF;VALVE1=CLOSED;PUMP2=ON;VALVE2=CLOSED;END;\x00";
    const SECRET: &[u8] =
        b"BEGIN TELEMETRY VIRELIA;ID=ZTRX0110393939DC;THM{n0nc3_r3u53_k1ll5_str34m_c1ph3r5};PUMP2=OFF;END;";

    const LAYOUT: Layout = Layout {
        nonce_len: 24,
        body_len: 96,
        tag_len: 16,
    };

    fn seal(cipher: &XSalsa20Poly1305, nonce: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let mut body = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(nonce), b"", &mut body)
            .unwrap();
        let mut packet = nonce.to_vec();
        packet.extend_from_slice(&body);
        packet.extend_from_slice(&tag);
        packet
    }

    #[test]
    fn recovers_plaintext_under_reused_nonce() {
        assert_eq!(KNOWN.len(), 96);
        assert_eq!(SECRET.len(), 96);
        let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(&[7; 32]));
        let nonce = [42_u8; 24];
        let first = seal(&cipher, &nonce, KNOWN);
        let second = seal(&cipher, &nonce, SECRET);

        assert_eq!(recover_second(LAYOUT, &first, &second, KNOWN).unwrap(), SECRET);
    }

    #[test]
    fn rejects_bad_framing() {
        let packet = vec![0_u8; 136];
        assert!(recover_second(LAYOUT, &packet[..100], &packet, KNOWN).is_err());
        assert!(recover_second(LAYOUT, &packet, &packet, b"short").is_err());
    }
}
