use crate::config;
use anyhow::{anyhow, Result};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::info;

pub const TASK: &str = "digit_product";

// x = xl * 1000 + xr (8 digits), y = yl * 1000 + yr (7 digits)
const HALF: i64 = 1000;
const LEFT_Y: RangeInclusive<i64> = 1000..=9999;

#[derive(Deserialize)]
struct Challenge {
    xl_min: i64,
    xl_max: i64,
}

pub fn run(resources: &Path) -> Result<()> {
    let challenge: Challenge = config::load(resources, TASK)?;
    if challenge.xl_min < 10_000 || challenge.xl_max > 99_999 {
        return Err(anyhow!("Left half of x must have five digits"));
    }

    let solutions = search(challenge.xl_min..=challenge.xl_max);
    if solutions.is_empty() {
        return Err(anyhow!("No solution found"));
    }
    info!("{} solution(s) found", solutions.len());
    for (x, y) in solutions {
        println!("x = {}, y = {}", x, y);
    }

    Ok(())
}

pub fn digits(mut n: i64, count: usize) -> Vec<i64> {
    let mut digits = Vec::with_capacity(count);
    for _ in 0..count {
        digits.push(n % 10);
        n /= 10;
    }
    digits.reverse();
    digits
}

/// Concatenate two-digit products, `None` if any product has a single digit.
fn concat_products(lead: Option<i64>, pairs: impl Iterator<Item = (i64, i64)>) -> Option<i64> {
    let mut value = lead.unwrap_or(0);
    for (a, b) in pairs {
        let product = a * b;
        if product < 10 {
            return None;
        }
        value = value * 100 + product;
    }
    Some(value)
}

/// Digit products of the three-digit right halves.
pub fn right_product(xr: i64, yr: i64) -> Option<i64> {
    let a = digits(xr, 3);
    let b = digits(yr, 3);
    concat_products(None, a.into_iter().zip(b))
}

/// The leading digit of `xl` followed by the products of its remaining digits with `yl`'s.
pub fn left_product(xl: i64, yl: i64) -> Option<i64> {
    let a = digits(xl, 5);
    let b = digits(yl, 4);
    concat_products(Some(a[0]), a[1..].iter().copied().zip(b))
}

/// Digit-wise product of an 8-digit `x` and a 7-digit `y`.
#[cfg(test)]
pub fn genni(x: i64, y: i64) -> Option<i64> {
    let a = digits(x, 8);
    let b = digits(y, 7);
    concat_products(Some(a[0]), a[1..].iter().copied().zip(b))
}

/// Right halves whose digit product agrees with `xr * yr` in the last three digits,
/// keyed by `(xr, yr)` with the carry `k = (xr yr - dr) / 1000`.
pub fn right_halves() -> HashMap<(i64, i64), i64> {
    (0..HALF)
        .into_par_iter()
        .flat_map_iter(|xr| {
            (0..HALF).filter_map(move |yr| {
                let dr = right_product(xr, yr)?;
                let carry = xr * yr - dr;
                (carry % HALF == 0).then(|| ((xr, yr), carry / HALF))
            })
        })
        .collect()
}

/// Every `(x, y)` with `x y = genni(x, y)` and the left half of `x` in `xl_range`.
///
/// Splitting `x y = dl 10^6 + dr` at the halves gives
/// `xr yl + k = 1000 (dl - xl yl) - xl yr`. With `|k| < 1000 <= yl` the left
/// side pins `xr` to `floor(lhs / yl)` or one above, checked against the table.
pub fn search(xl_range: RangeInclusive<i64>) -> Vec<(i64, i64)> {
    let table = right_halves();
    info!("Found {} valid right-half pairs", table.len());
    let mut yr_options: Vec<i64> = table.keys().map(|&(_, yr)| yr).collect();
    yr_options.sort_unstable();
    yr_options.dedup();

    xl_range
        .into_par_iter()
        .flat_map_iter(|xl| {
            let table = &table;
            let yr_options = &yr_options;
            LEFT_Y.filter_map(move |yl| Some((yl, left_product(xl, yl)?))).flat_map(move |(yl, dl)| {
                yr_options.iter().filter_map(move |&yr| {
                    let lhs = HALF * (dl - xl * yl) - xl * yr;
                    let base = lhs.div_euclid(yl);
                    (base..=base + 1)
                        .filter(|xr| (0..HALF).contains(xr))
                        .find(|&xr| table.get(&(xr, yr)).map_or(false, |&k| xr * yl + k == lhs))
                        .map(|xr| (xl * HALF + xr, yl * HALF + yr))
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_helpers() {
        assert_eq!(digits(42, 3), vec![0, 4, 2]);
        assert_eq!(right_product(877, 546), Some(402_842));
        assert_eq!(right_product(100, 999), None);
        assert_eq!(left_product(39_876, 9564), Some(381_404_224));
        assert_eq!(genni(39_876_877, 9_564_546), Some(381_404_224_402_842));
    }

    #[test]
    fn known_solutions_are_fixed_points() {
        for (x, y) in [(39_876_877, 9_564_546), (49_228_443, 9_773_647)] {
            assert_eq!(genni(x, y), Some(x * y));
        }
        assert_ne!(genni(39_876_877, 9_564_547), Some(39_876_877 * 9_564_547));
    }

    #[test]
    fn search_finds_solution_in_slice() {
        assert_eq!(search(39_876..=39_876), vec![(39_876_877, 9_564_546)]);
        assert_eq!(search(49_228..=49_228), vec![(49_228_443, 9_773_647)]);
        assert!(search(10_000..=10_001).is_empty());
    }
}
