use crate::number::{lagrange_at_zero, mod_inverse};
use crate::shared::{self, Remote};
use crate::config;
use anyhow::{anyhow, Result};
use num_bigint::BigUint;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

pub const TASK: &str = "shamir_odd";

#[derive(Deserialize)]
struct Challenge {
    host: String,
    port: u16,
    #[serde(with = "shared::biguint")]
    p: BigUint,
    queries: u32,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let mut remote = Remote::connect(&challenge.host, challenge.port)?;
    let flag = solve_remote(&mut remote, &challenge.p, challenge.queries)?;
    println!("{}", flag);
    Ok(())
}

pub fn solve_remote(remote: &mut Remote, p: &BigUint, queries: u32) -> Result<String> {
    let banner = remote.recv_line()?;
    info!("Server: {}", banner);

    let secret = recover_linear_coefficient(p, queries, |x| {
        remote.send_line(&x.to_string())?;
        shared::parse_biguint(&remote.recv_line()?)
    })?;
    info!("Calculated secret = {}", secret);

    // the prompt has no trailing newline
    remote.recv_until(b"? ")?;
    remote.send_line(&secret.to_string())?;
    remote.recv_line()
}

/// Recover the coefficient of `x` in the hidden polynomial `f` from its values.
///
/// `f(x) - f(-x) = 2x R(x^2)` where `R` holds the odd coefficients, so each
/// pair of queries yields one point `(i^2, R(i^2))`; `R(0)` is the linear
/// coefficient. `queries` pairs handle polynomials of degree below `2 * queries`.
pub fn recover_linear_coefficient<F>(p: &BigUint, queries: u32, mut evaluate: F) -> Result<BigUint>
where
    F: FnMut(&BigUint) -> Result<BigUint>,
{
    let mut points = Vec::new();
    for i in 1..=queries {
        let x = BigUint::from(i);
        let y_pos = evaluate(&x)?;
        let y_neg = evaluate(&(p - &x))?;

        let difference = (y_pos % p + p - y_neg % p) % p;
        let two_x_inv = mod_inverse(&(BigUint::from(2_u8) * &x), p)
            .ok_or_else(|| anyhow!("2x is not invertible"))?;
        let point = (&x * &x % p, difference * two_x_inv % p);
        debug!("Point for R: ({}, {})", point.0, point.1);
        points.push(point);
    }

    lagrange_at_zero(&points, p).ok_or_else(|| anyhow!("Interpolation points collide"))
}
