//! Seeded full-cycle permutation over `[0, N)`.
//!
//! `f(t) = (a·t + b) mod N` with `gcd(a, N) = 1` is a bijection on `[0, N)`, so walking
//! `t = 0, 1, ..` visits every rank exactly once before the cycle repeats. Not a true
//! shuffle, but the order is unpredictable without `(a, b)`, and the whole state fits in
//! a seed plus an offset.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("universe is empty")]
pub struct EmptyUniverse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermutationSampler {
    n: u64,
    a: u64,
    b: u64,
}

impl PermutationSampler {
    /// Derive `(a, b)` for a universe of `n` ranks. `a` comes from the low 32 bits of the
    /// seed, `b` from the high 32 bits.
    pub fn new(seed: i64, n: u64) -> Result<Self, EmptyUniverse> {
        if n == 0 {
            return Err(EmptyUniverse);
        }
        if n == 1 {
            return Ok(Self { n, a: 1, b: 0 });
        }

        let bits = seed as u64;
        let lo = bits & 0xFFFF_FFFF;
        let hi = bits >> 32;

        // Terminates: a = 1 is always coprime.
        let mut a = 1 + lo % (n - 1);
        while gcd(a, n) != 1 {
            a += 1;
            if a >= n {
                a = 1;
            }
        }
        let b = hi % n;

        Ok(Self { n, a, b })
    }

    pub fn universe_size(&self) -> u64 {
        self.n
    }

    /// Rank at position `t` of the cycle.
    #[inline]
    pub fn at(&self, t: u64) -> u64 {
        ((self.a as u128 * t as u128 + self.b as u128) % self.n as u128) as u64
    }

    /// `[f(offset), .., f(offset + count - 1)]`. Positions past `N` simply continue into the
    /// next cycle; callers detect exhaustion themselves.
    pub fn range(&self, offset: u64, count: usize) -> Vec<u64> {
        (0..count as u64)
            .map(|i| self.at(offset.saturating_add(i)))
            .collect()
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}
