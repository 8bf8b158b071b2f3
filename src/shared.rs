use aes::{Aes128, Aes256};
use anyhow::{anyhow, Result};
use block_modes::block_padding::{NoPadding, Pkcs7};
use block_modes::{BlockMode, Cbc, Ecb};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use tracing::{debug, info};

// Remotes that go quiet are treated as done talking
const READ_TIMEOUT: Duration = Duration::from_secs(10);

// Python's string.printable whitespace
const PRINTABLE_WHITESPACE: &[u8] = b" \t\n\r\x0b\x0c";

pub const AES_BLOCK_LEN: usize = 16;

/// Line-oriented TCP connection to a challenge service.
pub struct Remote {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Remote {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        info!("Attempting connection to {}:{}...", host, port);
        let stream = TcpStream::connect((host, port))?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        info!("Connected!");

        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Read one line, stripped of its terminator.
    pub fn recv_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(anyhow!("Connection closed by remote"));
        }
        let line = line.trim_end_matches(|c| c == '\r' || c == '\n').to_string();
        debug!("<- {}", line);
        Ok(line)
    }

    /// Read until `marker` has been seen, returning everything read (marker included).
    pub fn recv_until(&mut self, marker: &[u8]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut byte = [0_u8; 1];
        while !buf.ends_with(marker) {
            self.reader.read_exact(&mut byte)?;
            buf.push(byte[0]);
        }
        debug!("<- {}", String::from_utf8_lossy(&buf));
        Ok(buf)
    }

    /// Drain the connection until the remote closes it or stops talking.
    pub fn recv_to_end(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self.reader.read_to_end(&mut buf) {
            Ok(_) => Ok(buf),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(buf)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn send_line(&mut self, line: &str) -> Result<()> {
        debug!("-> {}", line);
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

pub fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

pub fn is_printable(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|b| b.is_ascii_graphic() || PRINTABLE_WHITESPACE.contains(b))
}

#[cfg(test)]
pub fn bytes_to_int(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

pub fn int_to_bytes(value: &BigUint) -> Vec<u8> {
    value.to_bytes_be()
}

/// Unpack an integer as consecutive `width`-bit characters, most significant first.
///
/// Some challenges pack 7-bit ASCII into the RSA message, which decodes to
/// garbage when read as bytes.
pub fn int_to_text(value: &BigUint, width: u32) -> Result<String> {
    if !(1..=8).contains(&width) {
        return Err(anyhow!("Character width {} is not between 1 and 8 bits", width));
    }
    let bits = value.bits();
    let chunks = bits.div_ceil(u64::from(width));
    let mask = BigUint::from((1_u32 << width) - 1);
    Ok((0..chunks)
        .rev()
        .map(|i| {
            let chunk = (value >> (i * u64::from(width))) & &mask;
            char::from(chunk.to_u8().unwrap_or_default())
        })
        .collect())
}

/// Render a decrypted RSA message, falling back to 7-bit packing when the bytes are not text.
pub fn decode_message(value: &BigUint) -> String {
    let bytes = int_to_bytes(value);
    if is_printable(&bytes) {
        return String::from_utf8_lossy(&bytes).into_owned();
    }
    if let Ok(packed) = int_to_text(value, 7) {
        if is_printable(packed.as_bytes()) {
            debug!("Message decodes as 7-bit text");
            return packed;
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Locate `prefix` in `haystack` and return it through the first closing brace.
pub fn find_flag(haystack: &[u8], prefix: &[u8]) -> Option<String> {
    let start = haystack.windows(prefix.len()).position(|w| w == prefix)?;
    let end = haystack[start..].iter().position(|&b| b == b'}')?;
    Some(String::from_utf8_lossy(&haystack[start..=start + end]).into_owned())
}

pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let plaintext = match key.len() {
        16 => Cbc::<Aes128, Pkcs7>::new_from_slices(key, iv)
            .map_err(|e| anyhow!("{:?}: Bad key or iv", e))?
            .decrypt_vec(ciphertext),
        32 => Cbc::<Aes256, Pkcs7>::new_from_slices(key, iv)
            .map_err(|e| anyhow!("{:?}: Bad key or iv", e))?
            .decrypt_vec(ciphertext),
        n => return Err(anyhow!("Unsupported AES key length {}", n)),
    };
    plaintext.map_err(|e| anyhow!("{:?}: Failed to decrypt", e))
}

/// ECB decryption; `padded` strips PKCS#7, otherwise the raw blocks are returned.
pub fn aes_ecb_decrypt(key: &[u8], ciphertext: &[u8], padded: bool) -> Result<Vec<u8>> {
    if key.len() != 16 {
        return Err(anyhow!("Unsupported AES key length {}", key.len()));
    }
    let plaintext = if padded {
        Ecb::<Aes128, Pkcs7>::new_from_slices(key, &[])
            .map_err(|e| anyhow!("{:?}: Bad key", e))?
            .decrypt_vec(ciphertext)
    } else {
        Ecb::<Aes128, NoPadding>::new_from_slices(key, &[])
            .map_err(|e| anyhow!("{:?}: Bad key", e))?
            .decrypt_vec(ciphertext)
    };
    plaintext.map_err(|e| anyhow!("{:?}: Failed to decrypt", e))
}

#[cfg(test)]
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Vec<u8> {
    match key.len() {
        16 => Cbc::<Aes128, Pkcs7>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_vec(plaintext),
        _ => Cbc::<Aes256, Pkcs7>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_vec(plaintext),
    }
}

#[cfg(test)]
pub fn aes_ecb_encrypt(key: &[u8], plaintext: &[u8], padded: bool) -> Vec<u8> {
    if padded {
        Ecb::<Aes128, Pkcs7>::new_from_slices(key, &[])
            .unwrap()
            .encrypt_vec(plaintext)
    } else {
        Ecb::<Aes128, NoPadding>::new_from_slices(key, &[])
            .unwrap()
            .encrypt_vec(plaintext)
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer.
pub fn parse_biguint(text: &str) -> Result<BigUint> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x") {
        Some(digits) => BigUint::parse_bytes(digits.as_bytes(), 16),
        None => BigUint::parse_bytes(text.as_bytes(), 10),
    };
    parsed.ok_or_else(|| anyhow!("Invalid integer '{}'", text))
}

/// Serde adapter for big integers stored as strings in challenge files.
pub mod biguint {
    use num_bigint::BigUint;
    use serde::{de, Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_biguint(&text).map_err(de::Error::custom)
    }
}
