use crate::curve::{Curve, Point};
use crate::number::{discrete_log, legendre, mod_inverse, sqrt_mod};
use crate::{config, shared};
use anyhow::{anyhow, Result};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

pub const TASK: &str = "singular_curve";

#[derive(Deserialize)]
struct Challenge {
    #[serde(with = "shared::biguint")]
    p: BigUint,
    #[serde(with = "shared::biguint")]
    a: BigUint,
    #[serde(with = "shared::biguint")]
    gx: BigUint,
    #[serde(with = "shared::biguint")]
    qx: BigUint,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    let candidates = recover_scalars(&challenge.p, &challenge.a, &challenge.gx, &challenge.qx)?;

    let mut found = false;
    for scalar in &candidates {
        let bytes = shared::int_to_bytes(scalar);
        if shared::is_printable(&bytes) {
            println!("{}", String::from_utf8_lossy(&bytes));
            found = true;
        }
    }
    if !found {
        warn!("None of the {} candidate scalars decode to text", candidates.len());
        for scalar in &candidates {
            println!("{}", scalar);
        }
    }

    Ok(())
}

/// Every scalar `k` with `Q = k G` consistent with the given x coordinates.
///
/// The curve's `b` is not published, but a singular curve has its singular
/// point at `(x0, 0)` with `3 x0^2 + a = 0`, which fixes `b = 2 x0^3`. Both
/// square roots for `x0` are tried, and both lifts of `Q`.
pub fn recover_scalars(p: &BigUint, a: &BigUint, gx: &BigUint, qx: &BigUint) -> Result<Vec<BigUint>> {
    let inv3 = mod_inverse(&BigUint::from(3_u8), p).ok_or_else(|| anyhow!("p must not be 3"))?;
    let x0_squared = (p - a % p) % p * inv3 % p;
    let x0 = sqrt_mod(&x0_squared, p).ok_or_else(|| anyhow!("-a/3 is not a square mod p"))?;

    let mut roots = vec![x0.clone()];
    if !x0.is_zero() {
        roots.push(p - &x0);
    }

    let mut candidates = Vec::new();
    for x0 in roots {
        let curve = Curve {
            p: p.clone(),
            a: a % p,
            b: BigUint::from(2_u8) * x0.modpow(&BigUint::from(3_u8), p) % p,
        };
        let (Some(g), Some(q)) = (curve.lift_x(gx), curve.lift_x(qx)) else {
            debug!("x0 = {} does not put both points on the curve", x0);
            continue;
        };
        info!("Singular point at x0 = {}, b = {}", x0, curve.b);

        let result = if x0.is_zero() {
            cusp_log(&curve, &g, &q)
        } else {
            node_logs(&curve, &x0, &g, &q)
        };
        let (g, q) = (Some(g), Some(q));
        match result {
            Ok(found) => candidates.extend(found.into_iter().filter(|k| matches(&curve, k, &g, &q))),
            Err(e) => warn!("x0 = {}: {}", x0, e),
        }
    }

    if candidates.is_empty() {
        return Err(anyhow!("No singular curve model solved the discrete log"));
    }
    Ok(candidates)
}

/// Node `y^2 = (x - x0)^2 (x + 2 x0)`: the tangent slopes `±m` at the node map
/// the group onto the multiplicative group of `F_p`.
fn node_logs(
    curve: &Curve,
    x0: &BigUint,
    g: &(BigUint, BigUint),
    q: &(BigUint, BigUint),
) -> Result<Vec<BigUint>> {
    let p = &curve.p;
    let slope_squared = BigUint::from(3_u8) * x0 % p;
    if legendre(&slope_squared, p) != 1 {
        return Err(anyhow!("Tangent slopes live in F_p^2, not supported"));
    }
    let m = sqrt_mod(&slope_squared, p).ok_or_else(|| anyhow!("No tangent slope"))?;
    debug!("Tangent slope m = {}", m);

    let map = |(x, y): &(BigUint, BigUint)| -> Option<BigUint> {
        let t = &m * ((x + p - x0) % p) % p;
        let numerator = (y + p - &t) % p;
        let denominator = (y + &t) % p;
        Some(numerator * mod_inverse(&denominator, p)? % p)
    };
    let alpha = map(g).ok_or_else(|| anyhow!("G maps to infinity"))?;
    let beta = map(q).ok_or_else(|| anyhow!("Q maps to infinity"))?;
    info!("Mapped to DLP alpha = {}, beta = {}", alpha, beta);

    // -Q maps to beta^-1
    let beta_inv = mod_inverse(&beta, p).ok_or_else(|| anyhow!("beta is not invertible"))?;
    let mut logs = Vec::new();
    for target in [&beta, &beta_inv] {
        match discrete_log(&alpha, target, p) {
            Ok(k) => logs.push(k),
            Err(e) => debug!("Discrete log failed: {}", e),
        }
    }
    if logs.is_empty() {
        return Err(anyhow!("Discrete log failed for both lifts of Q"));
    }
    Ok(logs)
}

/// Cusp `y^2 = x^3`: `(x, y) -> x / y` is additive, so the log is a division.
fn cusp_log(curve: &Curve, g: &(BigUint, BigUint), q: &(BigUint, BigUint)) -> Result<Vec<BigUint>> {
    let p = &curve.p;
    let map = |(x, y): &(BigUint, BigUint)| -> Option<BigUint> { Some(x * mod_inverse(y, p)? % p) };
    let u = map(g).ok_or_else(|| anyhow!("G has y = 0"))?;
    let v = map(q).ok_or_else(|| anyhow!("Q has y = 0"))?;
    let k = v * mod_inverse(&u, p).ok_or_else(|| anyhow!("G maps to zero"))? % p;
    Ok(vec![(p - &k) % p, k])
}

/// Lifted points are only defined up to sign, so check a scalar against both.
pub fn matches(curve: &Curve, k: &BigUint, g: &Point, q: &Point) -> bool {
    let kg = curve.mul(k, g);
    kg == *q || kg == curve.neg(q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn big(n: u64) -> BigUint {
        BigUint::from(n)
    }

    #[test]
    fn node_reduces_to_field_dlp() {
        let p = big(1_000_000_007);
        let mut x0 = big(2);
        while legendre(&(big(3) * &x0), &p) != 1 {
            x0 += 1_u32;
        }
        let a = (&p - big(3) * &x0 * &x0 % &p) % &p;
        let curve = Curve {
            p: p.clone(),
            a: a.clone(),
            b: big(2) * x0.modpow(&big(3), &p) % &p,
        };

        let mut gx = &x0 + 1_u32;
        while curve.lift_x(&gx).is_none() {
            gx += 1_u32;
        }
        let g = curve.lift_x(&gx);
        let k = big(StdRng::seed_from_u64(3).gen_range(2..500_000_000));
        let q = curve.mul(&k, &g);
        let (qx, _) = q.clone().unwrap();

        let candidates = recover_scalars(&p, &a, &gx, &qx).unwrap();
        assert!(candidates.iter().any(|c| curve.mul(c, &g) == q));
    }

    #[test]
    fn cusp_is_a_division() {
        let p = big(1_000_003);
        let curve = Curve {
            p: p.clone(),
            a: big(0),
            b: big(0),
        };
        let u = big(1234);
        let g = Some((&u * &u % &p, u.modpow(&big(3), &p)));
        assert!(curve.contains(&g));
        let k = big(777_777);
        let q = curve.mul(&k, &g);
        let (qx, _) = q.clone().unwrap();
        let (gx, _) = g.clone().unwrap();

        let candidates = recover_scalars(&p, &big(0), &gx, &qx).unwrap();
        assert!(candidates.contains(&k));
        assert!(candidates.iter().all(|c| matches(&curve, c, &g, &q)));
    }

    #[test]
    fn rejects_non_residue_parameter() {
        // -a/3 = 5 has no square root mod 7
        let p = big(7);
        let a = (&p - big(15) % &p) % &p;
        assert!(recover_scalars(&p, &a, &big(1), &big(2)).is_err());
    }
}
