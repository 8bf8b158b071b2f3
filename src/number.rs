use anyhow::{anyhow, Result};
use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::{Integer, Roots};
use num_traits::{One, ToPrimitive, Zero};
use rand::Rng;
use std::collections::HashMap;
use tracing::debug;

// Witness rounds for Miller-Rabin
const MR_ROUNDS: usize = 32;

// Trial division bound before handing a cofactor to Pollard rho
const TRIAL_DIVISION_BOUND: u32 = 10_000;

// Rho gives up once its cycle length passes this many steps
const RHO_MAX_STEPS: u64 = 1 << 26;

// Largest prime subgroup baby-step giant-step will attempt
const BSGS_MAX_BITS: u64 = 44;

const SMALL_PRIMES: [u32; 46] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199,
];

pub fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let modulus = BigInt::from(m.clone());
    let (mut old_r, mut r) = (BigInt::from(a % m), modulus.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    while !r.is_zero() {
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }
    if !old_r.is_one() {
        return None;
    }
    old_s.mod_floor(&modulus).to_biguint()
}

pub fn is_probable_prime(n: &BigUint) -> bool {
    let two = BigUint::from(2_u8);
    if n < &two {
        return false;
    }
    for &p in &SMALL_PRIMES {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1_u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;
    let mut rng = rand::thread_rng();
    'witness: for _ in 0..MR_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = &x * &x % n;
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Smallest prime strictly greater than `n`.
pub fn next_prime(n: &BigUint) -> BigUint {
    let mut candidate = n + 1_u32;
    if candidate <= BigUint::from(2_u8) {
        return BigUint::from(2_u8);
    }
    if candidate.is_even() {
        candidate += 1_u32;
    }
    while !is_probable_prime(&candidate) {
        candidate += 2_u32;
    }
    candidate
}

/// Largest prime strictly smaller than `n`.
pub fn prev_prime(n: &BigUint) -> Option<BigUint> {
    if n <= &BigUint::from(2_u8) {
        return None;
    }
    if n == &BigUint::from(3_u8) {
        return Some(BigUint::from(2_u8));
    }
    let mut candidate = n - 1_u32;
    if candidate.is_even() {
        candidate -= 1_u32;
    }
    while !is_probable_prime(&candidate) {
        candidate -= 2_u32;
    }
    Some(candidate)
}

#[cfg(test)]
pub fn random_prime<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> BigUint {
    loop {
        let mut candidate = rng.gen_biguint(bits);
        candidate |= BigUint::one() << (bits - 1);
        candidate |= BigUint::one();
        if is_probable_prime(&candidate) {
            return candidate;
        }
    }
}

pub fn is_perfect_square(n: &BigUint) -> Option<BigUint> {
    let root = n.sqrt();
    if &root * &root == *n {
        Some(root)
    } else {
        None
    }
}

/// Euler's criterion: 1 for residues, -1 for non-residues, 0 for multiples of p.
pub fn legendre(a: &BigUint, p: &BigUint) -> i8 {
    let a = a % p;
    if a.is_zero() {
        return 0;
    }
    let exp = (p - 1_u32) >> 1;
    if a.modpow(&exp, p).is_one() {
        1
    } else {
        -1
    }
}

/// Tonelli-Shanks square root modulo an odd prime.
pub fn sqrt_mod(a: &BigUint, p: &BigUint) -> Option<BigUint> {
    let a = a % p;
    if a.is_zero() {
        return Some(a);
    }
    if p == &BigUint::from(2_u8) {
        return Some(a);
    }
    if legendre(&a, p) != 1 {
        return None;
    }
    if p % 4_u32 == BigUint::from(3_u8) {
        return Some(a.modpow(&((p + 1_u32) >> 2), p));
    }

    let p_minus_one = p - 1_u32;
    let s = p_minus_one.trailing_zeros().unwrap_or(0);
    let q = &p_minus_one >> s;
    let mut z = BigUint::from(2_u8);
    while legendre(&z, p) != -1 {
        z += 1_u32;
    }

    let mut m = s;
    let mut c = z.modpow(&q, p);
    let mut t = a.modpow(&q, p);
    let mut r = a.modpow(&((&q + 1_u32) >> 1), p);
    while !t.is_one() {
        let mut i = 0;
        let mut t2 = t.clone();
        while !t2.is_one() {
            t2 = &t2 * &t2 % p;
            i += 1;
        }
        let b = c.modpow(&(BigUint::one() << (m - i - 1)), p);
        m = i;
        c = &b * &b % p;
        t = t * &c % p;
        r = r * &b % p;
    }
    Some(r)
}

/// Prime factorisation as sorted `(prime, exponent)` pairs.
pub fn factor(n: &BigUint) -> Result<Vec<(BigUint, u32)>> {
    let mut factors: Vec<(BigUint, u32)> = Vec::new();
    let mut rest = n.clone();

    let mut d = 2_u32;
    while d < TRIAL_DIVISION_BOUND && !rest.is_one() {
        let divisor = BigUint::from(d);
        let mut exponent = 0;
        while (&rest % &divisor).is_zero() {
            rest /= &divisor;
            exponent += 1;
        }
        if exponent > 0 {
            factors.push((divisor, exponent));
        }
        d += if d == 2 { 1 } else { 2 };
    }

    let mut pending = vec![rest];
    let mut rng = rand::thread_rng();
    while let Some(m) = pending.pop() {
        if m.is_one() {
            continue;
        }
        if is_probable_prime(&m) {
            match factors.iter_mut().find(|(p, _)| *p == m) {
                Some((_, exponent)) => *exponent += 1,
                None => factors.push((m, 1)),
            }
            continue;
        }
        debug!("Running Pollard rho on a {} bit cofactor", m.bits());
        let divisor = pollard_brent(&m, &mut rng)?;
        pending.push(&m / &divisor);
        pending.push(divisor);
    }

    factors.sort();
    Ok(factors)
}

fn abs_diff(a: &BigUint, b: &BigUint) -> BigUint {
    if a > b {
        a - b
    } else {
        b - a
    }
}

fn pollard_brent<R: Rng + ?Sized>(n: &BigUint, rng: &mut R) -> Result<BigUint> {
    const BATCH: u64 = 128;
    if n.is_even() {
        return Ok(BigUint::from(2_u8));
    }
    loop {
        let c = rng.gen_biguint_range(&BigUint::one(), n);
        let step = |x: &BigUint| (x * x + &c) % n;

        let mut y = rng.gen_biguint_below(n);
        let mut x = y.clone();
        let mut ys = y.clone();
        let mut q = BigUint::one();
        let mut g = BigUint::one();
        let mut r = 1_u64;
        while g.is_one() {
            x = y.clone();
            for _ in 0..r {
                y = step(&y);
            }
            let mut k = 0;
            while k < r && g.is_one() {
                ys = y.clone();
                for _ in 0..BATCH.min(r - k) {
                    y = step(&y);
                    q = q * abs_diff(&x, &y) % n;
                }
                g = q.gcd(n);
                k += BATCH;
            }
            r *= 2;
            if r > RHO_MAX_STEPS {
                return Err(anyhow!("Pollard rho gave up on a {} bit composite", n.bits()));
            }
        }
        if &g == n {
            loop {
                ys = step(&ys);
                g = abs_diff(&x, &ys).gcd(n);
                if !g.is_one() {
                    break;
                }
            }
        }
        if &g != n {
            return Ok(g);
        }
    }
}

/// Order of `g` in the multiplicative group modulo prime `p`, given the factors of p - 1.
pub fn multiplicative_order(g: &BigUint, p: &BigUint, factors: &[(BigUint, u32)]) -> BigUint {
    let mut order = p - 1_u32;
    for (q, exponent) in factors {
        for _ in 0..*exponent {
            let candidate = &order / q;
            if g.modpow(&candidate, p).is_one() {
                order = candidate;
            } else {
                break;
            }
        }
    }
    order
}

/// Solve `g^x = h (mod p)` with Pohlig-Hellman over the order of `g`.
pub fn discrete_log(g: &BigUint, h: &BigUint, p: &BigUint) -> Result<BigUint> {
    let group_factors = factor(&(p - 1_u32))?;
    let order = multiplicative_order(g, p, &group_factors);
    let g_inv = mod_inverse(g, p).ok_or_else(|| anyhow!("Generator is not invertible"))?;
    debug!("Generator order has {} bits", order.bits());

    let mut residues = Vec::new();
    for (q, _) in &group_factors {
        let mut exponent = 0;
        let mut rest = order.clone();
        while (&rest % q).is_zero() {
            rest /= q;
            exponent += 1;
        }
        if exponent == 0 {
            continue;
        }

        let gamma = g.modpow(&(&order / q), p);
        let mut x = BigUint::zero();
        let mut q_k = BigUint::one();
        for _ in 0..exponent {
            let shifted = g_inv.modpow(&x, p) * h % p;
            let h_k = shifted.modpow(&(&order / (&q_k * q)), p);
            let d_k = baby_step_giant_step(&gamma, &h_k, q, p)?;
            x += d_k * &q_k;
            q_k *= q;
        }
        residues.push((x, q_k));
    }

    let x = crt(&residues).ok_or_else(|| anyhow!("Residues are not coprime"))?;
    if g.modpow(&x, p) != h % p {
        return Err(anyhow!("Target is not in the subgroup generated by g"));
    }
    Ok(x)
}

fn baby_step_giant_step(g: &BigUint, h: &BigUint, n: &BigUint, p: &BigUint) -> Result<BigUint> {
    if n.bits() > BSGS_MAX_BITS {
        return Err(anyhow!("Subgroup of order {} is too large for BSGS", n));
    }
    let n = n.to_u64().unwrap_or(u64::MAX);
    let m = n.sqrt() + 1;

    let mut table = HashMap::with_capacity(usize::try_from(m)?);
    let mut value = BigUint::one();
    for j in 0..m {
        table.entry(value.clone()).or_insert(j);
        value = value * g % p;
    }

    let factor = mod_inverse(&g.modpow(&BigUint::from(m), p), p)
        .ok_or_else(|| anyhow!("Generator is not invertible"))?;
    let mut gamma = h % p;
    for i in 0..m {
        if let Some(j) = table.get(&gamma) {
            return Ok(BigUint::from(i * m + j));
        }
        gamma = gamma * &factor % p;
    }
    Err(anyhow!("No discrete log in subgroup of order {}", n))
}

/// Chinese remainder theorem over pairwise coprime moduli.
pub fn crt(residues: &[(BigUint, BigUint)]) -> Option<BigUint> {
    let modulus: BigUint = residues.iter().map(|(_, m)| m).product();
    let mut x = BigUint::zero();
    for (r, m) in residues {
        let partial = &modulus / m;
        let inverse = mod_inverse(&(&partial % m), m)?;
        x += r * &partial * inverse;
    }
    Some(x % modulus)
}

/// Evaluate the polynomial through `points` at zero, modulo prime `p`.
pub fn lagrange_at_zero(points: &[(BigUint, BigUint)], p: &BigUint) -> Option<BigUint> {
    let mut total = BigUint::zero();
    for (j, (x_j, y_j)) in points.iter().enumerate() {
        let mut numerator = BigUint::one();
        let mut denominator = BigUint::one();
        for (i, (x_i, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator = numerator * (p - x_i % p) % p;
            denominator = denominator * ((x_j % p + p - x_i % p) % p) % p;
        }
        let basis = numerator * mod_inverse(&denominator, p)? % p;
        total = (total + y_j * basis) % p;
    }
    Some(total)
}
