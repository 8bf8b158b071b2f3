use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("row has {actual} columns but the system has {expected}")]
    Dimension { expected: usize, actual: usize },
    #[error("system has no solution")]
    Inconsistent,
    #[error("system has {0} free variable(s)")]
    Underdetermined(usize),
}

/// Bit vector over GF(2), packed little-endian into 64-bit words.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitRow {
    len: usize,
    words: Vec<u64>,
}

impl BitRow {
    pub fn zeros(len: usize) -> Self {
        Self {
            len,
            words: vec![0; (len + 63) / 64],
        }
    }

    /// Build a row from 64-bit words, word `i` holding bits `64*i..64*i+64`.
    #[cfg(test)]
    pub fn from_words(words: &[u64]) -> Self {
        Self {
            len: words.len() * 64,
            words: words.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn get(&self, bit: usize) -> bool {
        self.words[bit / 64] >> (bit % 64) & 1 == 1
    }

    pub fn set(&mut self, bit: usize, value: bool) {
        let mask = 1 << (bit % 64);
        if value {
            self.words[bit / 64] |= mask;
        } else {
            self.words[bit / 64] &= !mask;
        }
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    fn xor_assign(&mut self, other: &BitRow) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a ^= b;
        }
    }
}

/// Linear system `A x = b` over GF(2).
pub struct System {
    columns: usize,
    rows: Vec<BitRow>,
    rhs: Vec<bool>,
}

impl System {
    pub fn new(columns: usize) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            rhs: Vec::new(),
        }
    }

    pub fn push(&mut self, row: BitRow, rhs: bool) -> Result<(), Error> {
        if row.len() != self.columns {
            return Err(Error::Dimension {
                expected: self.columns,
                actual: row.len(),
            });
        }
        self.rows.push(row);
        self.rhs.push(rhs);
        Ok(())
    }

    /// Gauss-Jordan elimination; succeeds only when the solution is unique.
    pub fn solve(mut self) -> Result<BitRow, Error> {
        let mut pivots = Vec::with_capacity(self.columns);
        let mut free = 0;

        for col in 0..self.columns {
            let next = pivots.len();
            let found = (next..self.rows.len()).find(|&r| self.rows[r].get(col));
            let Some(pivot) = found else {
                free += 1;
                continue;
            };
            self.rows.swap(next, pivot);
            self.rhs.swap(next, pivot);

            let pivot_row = self.rows[next].clone();
            let pivot_rhs = self.rhs[next];
            for r in 0..self.rows.len() {
                if r != next && self.rows[r].get(col) {
                    self.rows[r].xor_assign(&pivot_row);
                    self.rhs[r] ^= pivot_rhs;
                }
            }
            pivots.push(col);
        }

        // leftover rows are all zero after elimination
        if self.rhs[pivots.len()..].iter().any(|&b| b) {
            return Err(Error::Inconsistent);
        }
        if free > 0 {
            return Err(Error::Underdetermined(free));
        }

        let mut solution = BitRow::zeros(self.columns);
        for (row, &col) in pivots.iter().enumerate() {
            solution.set(col, self.rhs[row]);
        }
        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn row(bits: &[u8]) -> BitRow {
        let mut r = BitRow::zeros(bits.len());
        for (i, &b) in bits.iter().enumerate() {
            r.set(i, b == 1);
        }
        r
    }

    #[test]
    fn small_unique_solution() {
        // the first three rows only have rank two; x2 = 1 pins the solution
        let mut system = System::new(3);
        system.push(row(&[1, 1, 0]), true).unwrap();
        system.push(row(&[0, 1, 1]), false).unwrap();
        system.push(row(&[1, 0, 1]), true).unwrap();
        system.push(row(&[0, 0, 1]), true).unwrap();
        let x = system.solve().unwrap();
        assert_eq!((x.get(0), x.get(1), x.get(2)), (false, true, true));
    }

    #[test]
    fn inconsistent_and_free() {
        let mut system = System::new(2);
        system.push(row(&[1, 1]), true).unwrap();
        system.push(row(&[1, 1]), false).unwrap();
        assert_eq!(system.solve(), Err(Error::Inconsistent));

        let mut system = System::new(2);
        system.push(row(&[1, 1]), true).unwrap();
        assert_eq!(system.solve(), Err(Error::Underdetermined(1)));

        let mut system = System::new(2);
        assert_eq!(
            system.push(row(&[1, 1, 0]), true),
            Err(Error::Dimension {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn random_overdetermined_system() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let secret = BitRow::from_words(&[rng.gen(), rng.gen()]);

        let mut system = System::new(128);
        for _ in 0..200 {
            let r = BitRow::from_words(&[rng.gen(), rng.gen()]);
            let parity = r
                .words()
                .iter()
                .zip(secret.words())
                .map(|(a, b)| (a & b).count_ones())
                .sum::<u32>()
                % 2
                == 1;
            system.push(r, parity).unwrap();
        }
        assert_eq!(system.solve().unwrap(), secret);
    }
}
