use crate::number::mod_inverse;
use num_bigint::BigUint;
use num_traits::Zero;

/// Affine point; `None` is the point at infinity.
pub type Point = Option<(BigUint, BigUint)>;

/// Short Weierstrass curve `y^2 = x^3 + a x + b` over a prime field.
///
/// The group law is computed with the plain chord-and-tangent formulas, so it
/// also works on the non-singular points of a singular curve.
#[derive(Clone, Debug)]
pub struct Curve {
    pub p: BigUint,
    pub a: BigUint,
    pub b: BigUint,
}

pub struct Secp256k1 {
    pub curve: Curve,
    pub g: Point,
    pub n: BigUint,
}

pub fn secp256k1() -> Secp256k1 {
    let hex = |s: &str| BigUint::parse_bytes(s.as_bytes(), 16).unwrap_or_default();
    Secp256k1 {
        curve: Curve {
            p: hex("FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFC2F"),
            a: BigUint::zero(),
            b: BigUint::from(7_u8),
        },
        g: Some((
            hex("79BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798"),
            hex("483ADA7726A3C4655DA4FBFC0E1108A8FD17B448A68554199C47D08FFB10D4B8"),
        )),
        n: hex("FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEBAAEDCE6AF48A03BBFD25E8CD0364141"),
    }
}

impl Curve {
    pub fn contains(&self, point: &Point) -> bool {
        match point {
            None => true,
            Some((x, y)) => self.rhs(x) == y * y % &self.p,
        }
    }

    /// `x^3 + a x + b`
    pub fn rhs(&self, x: &BigUint) -> BigUint {
        (x.modpow(&BigUint::from(3_u8), &self.p) + &self.a * x + &self.b) % &self.p
    }

    pub fn neg(&self, point: &Point) -> Point {
        point
            .as_ref()
            .map(|(x, y)| (x.clone(), (&self.p - y % &self.p) % &self.p))
    }

    pub fn add(&self, lhs: &Point, rhs: &Point) -> Point {
        let p = &self.p;
        let ((x1, y1), (x2, y2)) = match (lhs, rhs) {
            (None, _) => return rhs.clone(),
            (_, None) => return lhs.clone(),
            (Some(l), Some(r)) => (l, r),
        };

        let slope = if x1 == x2 {
            if ((y1 + y2) % p).is_zero() {
                return None;
            }
            let numerator = BigUint::from(3_u8) * x1 * x1 + &self.a;
            numerator * mod_inverse(&(BigUint::from(2_u8) * y1), p)? % p
        } else {
            let numerator = (y2 + p - y1) % p;
            numerator * mod_inverse(&((x2 + p - x1) % p), p)? % p
        };

        let x3 = (&slope * &slope + p + p - x1 - x2) % p;
        let y3 = (slope * ((x1 + p - &x3) % p) + p - y1) % p;
        Some((x3, y3))
    }

    pub fn double(&self, point: &Point) -> Point {
        self.add(point, point)
    }

    pub fn mul(&self, scalar: &BigUint, point: &Point) -> Point {
        let mut result = None;
        let mut addend = point.clone();
        for i in 0..scalar.bits() {
            if scalar.bit(i) {
                result = self.add(&result, &addend);
            }
            addend = self.double(&addend);
        }
        result
    }

    /// Lift an x coordinate to a point, choosing whichever root `sqrt_mod` returns.
    pub fn lift_x(&self, x: &BigUint) -> Point {
        let y = crate::number::sqrt_mod(&self.rhs(x), &self.p)?;
        Some((x % &self.p, y))
    }
}

impl Secp256k1 {
    pub fn mul_g(&self, scalar: &BigUint) -> Point {
        self.curve.mul(scalar, &self.g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secp256k1_generator_is_on_curve() {
        let k1 = secp256k1();
        assert!(k1.curve.contains(&k1.g));
        assert!(k1.mul_g(&k1.n).is_none());
    }

    #[test]
    fn scalar_multiplication_distributes() {
        let k1 = secp256k1();
        let a = BigUint::from(123_456_789_u64);
        let b = BigUint::from(987_654_321_u64);
        let lhs = k1.curve.add(&k1.mul_g(&a), &k1.mul_g(&b));
        let rhs = k1.mul_g(&(a + b));
        assert_eq!(lhs, rhs);
        assert!(k1.curve.contains(&rhs));
    }

    #[test]
    fn negation_cancels() {
        let k1 = secp256k1();
        let point = k1.mul_g(&BigUint::from(42_u8));
        assert!(k1.curve.add(&point, &k1.curve.neg(&point)).is_none());
    }

    #[test]
    fn small_curve_lift() {
        // y^2 = x^3 + 2x + 3 over F_97
        let curve = Curve {
            p: BigUint::from(97_u8),
            a: BigUint::from(2_u8),
            b: BigUint::from(3_u8),
        };
        let point = curve.lift_x(&BigUint::from(3_u8));
        assert!(point.is_some());
        assert!(curve.contains(&point));
        assert!(curve.contains(&curve.mul(&BigUint::from(5_u8), &point)));
    }
}
