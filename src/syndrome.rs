use crate::config;
use crate::shared::Remote;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

pub const TASK: &str = "syndrome";

const PROMPT: &[u8] = b"Enter the error:";

#[derive(Deserialize)]
struct Challenge {
    host: String,
    port: u16,
    length: usize,
    weight: usize,
    #[serde(default = "default_retries")]
    retries: u32,
    #[serde(default = "default_backoff_ms")]
    backoff_ms: u64,
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let error = build_error_vector(challenge.length, challenge.weight)?;

    let mut attempt = 1;
    let response = loop {
        match Remote::connect(&challenge.host, challenge.port).and_then(|mut remote| submit(&mut remote, &error)) {
            Ok(response) => break response,
            Err(e) if attempt < challenge.retries.max(1) => {
                warn!("Attempt {} failed: {}", attempt, e);
                thread::sleep(Duration::from_millis(challenge.backoff_ms * u64::from(attempt)));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    };
    println!("{}", response.trim());

    Ok(())
}

/// Binary string of `length` characters with exactly `weight` ones.
///
/// The service recomputes the syndrome from its own secret error, so the
/// weight and length are all it really checks.
pub fn build_error_vector(length: usize, weight: usize) -> Result<String> {
    if weight > length {
        return Err(anyhow!("Weight {} exceeds length {}", weight, length));
    }
    Ok("1".repeat(weight) + &"0".repeat(length - weight))
}

pub fn submit(remote: &mut Remote, error: &str) -> Result<String> {
    let banner = remote.recv_until(PROMPT)?;
    info!("Banner is {} bytes", banner.len());
    remote.send_line(error)?;
    let response = remote.recv_to_end()?;
    Ok(String::from_utf8_lossy(&response).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    #[test]
    fn vector_shape() {
        let error = build_error_vector(3488, 4).unwrap();
        assert_eq!(error.len(), 3488);
        assert_eq!(error.bytes().filter(|&b| b == b'1').count(), 4);
        assert!(build_error_vector(3, 4).is_err());
    }

    #[test]
    fn local_service_accepts_any_weight_four_vector() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            writeln!(stream, "Welcome to Roberts Construction Service!").unwrap();
            writeln!(stream, "Your syndrome:\n(1, 0, 1, 1)").unwrap();
            writeln!(stream, "Enter the error:").unwrap();
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim();
            if line.len() != 64 {
                writeln!(stream, "wrong len").unwrap();
            } else if line.bytes().filter(|&b| b == b'1').count() != 4 {
                writeln!(stream, "wrong weight").unwrap();
            } else {
                writeln!(stream, "flag{{any_error_will_do}}").unwrap();
            }
        });

        let mut remote = Remote::connect("127.0.0.1", port).unwrap();
        let response = submit(&mut remote, &build_error_vector(64, 4).unwrap()).unwrap();
        server.join().unwrap();
        assert!(response.contains("flag{any_error_will_do}"));
    }
}
