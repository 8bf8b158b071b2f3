use crate::number::mod_inverse;
use crate::shared::{self, Remote};
use crate::config;
use anyhow::{anyhow, Result};
use num_bigint::BigUint;
use num_integer::Integer;
use num_traits::One;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

pub const TASK: &str = "lcg_modp_oracle";

const PROMPT: &[u8] = b"> ";
const WORD_LEN: usize = 8;
// enough consecutive outputs to find an odd difference and verify it
const MIN_STATES: usize = 8;
const VERIFY_STEPS: usize = 5;

#[derive(Deserialize)]
struct Challenge {
    host: String,
    port: u16,
    #[serde(with = "shared::biguint")]
    e: BigUint,
    known_plaintexts: Vec<String>,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let mut remote = Remote::connect(&challenge.host, challenge.port)?;
    let flag = solve_remote(&mut remote, &challenge.e, &challenge.known_plaintexts)?;
    println!("{}", flag);
    Ok(())
}

/// `x -> a x + c (mod 2^64)`, emitted big-endian one state at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lcg {
    pub a: u64,
    pub c: u64,
}

impl Lcg {
    pub fn step(self, x: u64) -> u64 {
        self.a.wrapping_mul(x).wrapping_add(self.c)
    }

    /// Step backwards; only defined for odd `a`.
    pub fn step_back(self, x: u64) -> Option<u64> {
        Some(inverse_mod_2_64(self.a)?.wrapping_mul(x.wrapping_sub(self.c)))
    }

    /// Parameters from consecutive outputs, using the first window whose
    /// difference is odd and therefore invertible.
    pub fn recover(states: &[u64]) -> Result<Self> {
        for window in states.windows(3) {
            let (x1, x2, x3) = (window[0], window[1], window[2]);
            let Some(inv) = inverse_mod_2_64(x2.wrapping_sub(x1)) else {
                continue;
            };
            let a = x3.wrapping_sub(x2).wrapping_mul(inv);
            let lcg = Self {
                a,
                c: x2.wrapping_sub(a.wrapping_mul(x1)),
            };
            if states
                .windows(2)
                .take(VERIFY_STEPS)
                .all(|pair| lcg.step(pair[0]) == pair[1])
            {
                return Ok(lcg);
            }
        }
        Err(anyhow!("No consistent LCG in {} states, collect more", states.len()))
    }
}

/// Newton iteration; each round doubles the number of correct low bits.
fn inverse_mod_2_64(value: u64) -> Option<u64> {
    if value % 2 == 0 {
        return None;
    }
    let mut inv = value;
    for _ in 0..5 {
        inv = inv.wrapping_mul(2_u64.wrapping_sub(value.wrapping_mul(inv)));
    }
    Some(inv)
}

pub fn words(bytes: &[u8]) -> Result<Vec<u64>> {
    if bytes.len() % WORD_LEN != 0 {
        return Err(anyhow!("{} bytes is not a whole number of states", bytes.len()));
    }
    Ok(bytes
        .chunks_exact(WORD_LEN)
        .map(|chunk| {
            let mut word = [0_u8; WORD_LEN];
            word.copy_from_slice(chunk);
            u64::from_be_bytes(word)
        })
        .collect())
}

pub fn keystream(states: &[u64]) -> Vec<u8> {
    states.iter().flat_map(|x| x.to_be_bytes()).collect()
}

/// Menu option 1: the encrypted flag in hex, then `n` in decimal.
fn flag_and_modulus(remote: &mut Remote) -> Result<(Vec<u8>, BigUint)> {
    remote.send_line("1")?;
    let reply = String::from_utf8_lossy(&remote.recv_until(PROMPT)?).into_owned();
    let mut lines = reply.lines().map(str::trim).filter(|l| !l.is_empty()).rev();
    let n = lines
        .by_ref()
        .find(|l| l.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| anyhow!("No modulus in the reply"))?;
    let n = shared::parse_biguint(n)?;
    let encrypted_flag = lines
        .find_map(|l| hex::decode(l).ok())
        .ok_or_else(|| anyhow!("No encrypted flag in the reply"))?;
    Ok((encrypted_flag, n))
}

/// Menu option 2: `m^e mod p` XORed with the next keystream states.
fn encrypt_mod_p(remote: &mut Remote, plaintext: &str) -> Result<Vec<u8>> {
    remote.send_line("2")?;
    remote.recv_until(PROMPT)?;
    remote.send_line(plaintext)?;
    let reply = String::from_utf8_lossy(&remote.recv_until(PROMPT)?).into_owned();
    reply
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .find_map(|l| hex::decode(l).ok())
        .ok_or_else(|| anyhow!("No ciphertext in the reply"))
}

/// Strip the keystream off the flag, then factor `n` with the mod-p oracle.
///
/// An empty plaintext encrypts to zero, so those replies are raw LCG output;
/// the flag used the states right before them. A known `m` yields
/// `C = m^e mod p`, and `gcd(n, m^e mod n - C)` is then `p`.
pub fn solve_remote(remote: &mut Remote, e: &BigUint, known_plaintexts: &[String]) -> Result<String> {
    let banner = remote.recv_until(PROMPT)?;
    debug!("Menu: {}", String::from_utf8_lossy(&banner));

    let (encrypted_flag, n) = flag_and_modulus(remote)?;
    let flag_states = words(&encrypted_flag)?.len();
    info!("Encrypted flag spans {} states, n has {} bits", flag_states, n.bits());

    let mut states = Vec::new();
    while states.len() < MIN_STATES {
        let chunk = words(&encrypt_mod_p(remote, "")?)?;
        if chunk.is_empty() {
            return Err(anyhow!("Encrypting nothing returned no keystream"));
        }
        states.extend(chunk);
    }
    let lcg = Lcg::recover(&states)?;
    info!("Recovered LCG a = {:#x}, c = {:#x}", lcg.a, lcg.c);

    let mut flag_stream = Vec::with_capacity(flag_states);
    let mut x = states[0];
    for _ in 0..flag_states {
        x = lcg.step_back(x).ok_or_else(|| anyhow!("LCG multiplier is even"))?;
        flag_stream.push(x);
    }
    flag_stream.reverse();
    let ciphertext =
        BigUint::from_bytes_be(&shared::xor(&encrypted_flag, &keystream(&flag_stream)));

    let mut last = states[states.len() - 1];
    let mut factor = None;
    for plaintext in known_plaintexts {
        let reply = encrypt_mod_p(remote, plaintext)?;
        let stream: Vec<u64> = (0..reply.len() / WORD_LEN)
            .map(|_| {
                last = lcg.step(last);
                last
            })
            .collect();
        let c_mod_p = BigUint::from_bytes_be(&shared::xor(&reply, &keystream(&stream)));

        let m = BigUint::from_bytes_be(plaintext.as_bytes());
        let difference = (m.modpow(e, &n) + &n - c_mod_p % &n) % &n;
        let g = n.gcd(&difference);
        if !g.is_one() && g != n {
            info!("Factor found with plaintext {:?}", plaintext);
            factor = Some(g);
            break;
        }
        debug!("Plaintext {:?} gave a trivial gcd", plaintext);
    }
    let p = factor.ok_or_else(|| anyhow!("No known plaintext split n"))?;
    let q = &n / &p;

    let phi = (&p - 1_u32) * (&q - 1_u32);
    let d = mod_inverse(e, &phi).ok_or_else(|| anyhow!("e is not invertible mod phi"))?;
    Ok(shared::decode_message(&ciphertext.modpow(&d, &n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number::random_prime;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    const FLAG: &[u8] = b"flag{lcg_0p3ra}";

    fn padded(value: &BigUint, len: usize) -> Vec<u8> {
        let bytes = value.to_bytes_be();
        let mut out = vec![0_u8; len - bytes.len()];
        out.extend(bytes);
        out
    }

    #[test]
    fn inverse_mod_2_64_is_exact() {
        for value in [1_u64, 3, 0x9e37_79b9_7f4a_7c15, u64::MAX] {
            assert_eq!(value.wrapping_mul(inverse_mod_2_64(value).unwrap()), 1);
        }
        assert_eq!(inverse_mod_2_64(42), None);
    }

    #[test]
    fn recovers_lcg_and_steps_back() {
        let mut rng = StdRng::seed_from_u64(20);
        let lcg = Lcg {
            a: rng.gen::<u64>() | 1,
            c: rng.gen(),
        };
        let seed: u64 = rng.gen();
        let mut states = vec![lcg.step(seed)];
        for _ in 1..MIN_STATES {
            states.push(lcg.step(states[states.len() - 1]));
        }

        let recovered = Lcg::recover(&states).unwrap();
        assert_eq!(recovered, lcg);
        assert_eq!(recovered.step_back(states[0]), Some(seed));
    }

    #[test]
    fn constant_output_is_not_an_lcg() {
        assert!(Lcg::recover(&[7; MIN_STATES]).is_err());
        assert!(words(&[0_u8; 12]).is_err());
    }

    #[test]
    fn talks_to_local_service() {
        let mut rng = StdRng::seed_from_u64(21);
        let p = random_prime(128, &mut rng);
        let q = random_prime(128, &mut rng);
        let n = &p * &q;
        let e = BigUint::from(65_537_u32);
        let lcg = Lcg {
            a: rng.gen::<u64>() | 1,
            c: rng.gen(),
        };
        let seed: u64 = rng.gen();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (server_n, server_e) = (n.clone(), e.clone());
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut state = seed;
            let mut next_stream = |len: usize| -> Vec<u8> {
                (0..len / WORD_LEN)
                    .flat_map(|_| {
                        state = lcg.step(state);
                        state.to_be_bytes()
                    })
                    .collect()
            };
            let n_len = usize::try_from(server_n.bits().div_ceil(8)).unwrap();
            let p_len = usize::try_from(p.bits().div_ceil(8)).unwrap();

            let flag_ct = padded(
                &BigUint::from_bytes_be(FLAG).modpow(&server_e, &server_n),
                n_len,
            );
            let encrypted_flag = shared::xor(&flag_ct, &next_stream(n_len));

            write!(stream, "opera\n1. flag\n2. encrypt\n> ").unwrap();
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                match line.trim() {
                    "1" => write!(
                        stream,
                        "{}\n{}\n> ",
                        hex::encode(&encrypted_flag),
                        server_n
                    )
                    .unwrap(),
                    "2" => {
                        write!(stream, "> ").unwrap();
                        line.clear();
                        reader.read_line(&mut line).unwrap();
                        let m = BigUint::from_bytes_be(line.trim_end_matches('\n').as_bytes());
                        let c = padded(&m.modpow(&server_e, &p), p_len);
                        let out = shared::xor(&c, &next_stream(p_len));
                        write!(stream, "{}\n> ", hex::encode(out)).unwrap();
                    }
                    _ => write!(stream, "?\n> ").unwrap(),
                }
                line.clear();
            }
        });

        let mut remote = Remote::connect("127.0.0.1", port).unwrap();
        let plaintexts = vec!["A".to_string(), "B".to_string()];
        let flag = solve_remote(&mut remote, &e, &plaintexts).unwrap();
        drop(remote);
        server.join().unwrap();
        assert_eq!(flag.as_bytes(), FLAG);
    }
}
