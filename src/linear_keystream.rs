use crate::{config, shared};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

pub const TASK: &str = "linear_keystream";

#[derive(Deserialize)]
struct Challenge {
    input: String,
    output: String,
    body_len: usize,
    pixel_len: usize,
    background_hex: String,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let data = fs::read(config::resource(resources, &challenge.input))?;
    let background = hex::decode(&challenge.background_hex)?;
    if background.len() != challenge.pixel_len {
        return Err(anyhow!("Background guess must be one pixel long"));
    }
    let header_len = data
        .len()
        .checked_sub(challenge.body_len)
        .ok_or_else(|| anyhow!("Image is shorter than its pixel data"))?;
    info!(
        "Attempting decryption with guessed background color {}",
        challenge.background_hex
    );

    let (header, body) = data.split_at(header_len);
    let mut decrypted = header.to_vec();
    decrypted.extend(decrypt_pixels(body, &background)?);

    let output = config::resource(resources, &challenge.output);
    fs::write(&output, decrypted)?;
    println!("Decrypted image written to {}", output.display());

    Ok(())
}

/// Decrypt pixel data whose keystream is affine in the bits of the pixel index.
///
/// Assuming pixel 0 and every power-of-two pixel show `background`, the
/// keystream for pixel `j` is `K0 ^ XOR(Y_i for each set bit i of j)` with
/// `K0 = C_0 ^ P` and `Y_i = K0 ^ C_{2^i} ^ P`.
pub fn decrypt_pixels(body: &[u8], background: &[u8]) -> Result<Vec<u8>> {
    let width = background.len();
    if width == 0 || body.len() % width != 0 {
        return Err(anyhow!("Pixel data is not a whole number of pixels"));
    }
    let pixels: Vec<&[u8]> = body.chunks(width).collect();
    if pixels.is_empty() {
        return Ok(Vec::new());
    }

    let k0 = shared::xor(pixels[0], background);
    let mut basis = Vec::new();
    let mut index = 1;
    while index < pixels.len() {
        let k_index = shared::xor(pixels[index], background);
        basis.push(shared::xor(&k0, &k_index));
        index <<= 1;
    }
    info!("Built keystream basis with {} vectors", basis.len());

    // keystream[j] = keystream[j without its lowest set bit] ^ Y_lowest
    let mut keystream: Vec<Vec<u8>> = Vec::with_capacity(pixels.len());
    keystream.push(k0);
    for j in 1..pixels.len() {
        let low = usize::try_from(j.trailing_zeros())?;
        let key = shared::xor(&keystream[j & (j - 1)], &basis[low]);
        keystream.push(key);
    }

    Ok(pixels
        .iter()
        .zip(&keystream)
        .flat_map(|(pixel, key)| shared::xor(pixel, key))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn affine_keystream_is_rebuilt() {
        let mut rng = StdRng::seed_from_u64(8);
        let pixels = 1 << 10;
        let k0: [u8; 3] = rng.gen();
        let basis: Vec<[u8; 3]> = (0..10).map(|_| rng.gen()).collect();

        let mut image = vec![0_u8; pixels * 3];
        // scribble on pixels that are not powers of two
        for j in [3_usize, 5, 6, 7, 100, 1000, 1023] {
            image[j * 3..j * 3 + 3].copy_from_slice(&[0xff, 0x10, 0x20]);
        }

        let mut body = Vec::new();
        for j in 0..pixels {
            let mut key = k0.to_vec();
            for (i, y) in basis.iter().enumerate() {
                if j >> i & 1 == 1 {
                    key = shared::xor(&key, y);
                }
            }
            body.extend(shared::xor(&image[j * 3..j * 3 + 3], &key));
        }

        assert_eq!(decrypt_pixels(&body, &[0, 0, 0]).unwrap(), image);
    }

    #[test]
    fn rejects_partial_pixels() {
        assert!(decrypt_pixels(&[1, 2, 3, 4], &[0, 0, 0]).is_err());
        assert!(decrypt_pixels(&[1, 2, 3], &[]).is_err());
    }
}
