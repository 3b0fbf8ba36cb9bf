//! Floyd's sampling algorithm.
//!
//! Draws `sample_size` distinct integers uniformly from `[0, total)` in
//! O(sample_size) draws, however large `total` is.

use crate::models::{FanoutError, Result};
use num_bigint::BigUint;
use rand::Rng;
use std::collections::BTreeSet;

/// Uniform random subset of `[0, total)` with exactly `sample_size` members.
///
/// The set is ordered so that iteration is reproducible for a seeded `rng`.
///
/// # Errors
///
/// `InvalidArgument` if `sample_size > total`.
pub fn floyd_sample<R>(
    total: &BigUint,
    sample_size: usize,
    rng: &mut R,
) -> Result<BTreeSet<BigUint>>
where
    R: Rng + ?Sized,
{
    let size = BigUint::from(sample_size);
    if &size > total {
        return Err(FanoutError::invalid(format!(
            "cannot sample {sample_size} distinct values from {total}"
        )));
    }

    let mut chosen = BTreeSet::new();
    let mut j = total - size;
    while &j < total {
        let t = random_below(&(&j + 1u32), rng);
        // Everything chosen so far is < j, so j itself is always free.
        if !chosen.insert(t) {
            chosen.insert(j.clone());
        }
        j += 1u32;
    }

    Ok(chosen)
}

/// Uniform draw from `[0, bound)`. `bound` must be non-zero.
fn random_below<R>(bound: &BigUint, rng: &mut R) -> BigUint
where
    R: Rng + ?Sized,
{
    match u128::try_from(bound) {
        Ok(bound) => BigUint::from(rng.random_range(0..bound)),
        Err(_) => random_below_wide(bound, rng),
    }
}

/// Rejection sampling over `bits(bound)` random bits; accepts with p > 1/2.
fn random_below_wide<R>(bound: &BigUint, rng: &mut R) -> BigUint
where
    R: Rng + ?Sized,
{
    let bits = bound.bits() as usize;
    let bytes = bits.div_ceil(8);
    let top_mask = 0xFFu8 >> (bytes * 8 - bits);
    let mut buf = vec![0u8; bytes];

    loop {
        rng.fill(buf.as_mut_slice());
        if let Some(top) = buf.last_mut() {
            *top &= top_mask;
        }
        let candidate = BigUint::from_bytes_le(&buf);
        if &candidate < bound {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn big(n: u32) -> BigUint {
        BigUint::from(n)
    }

    #[test]
    fn test_full_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let sample = floyd_sample(&big(10), 10, &mut rng).unwrap();
        assert_eq!(sample, (0..10u32).map(BigUint::from).collect());
    }

    #[test]
    fn test_empty_sample() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(floyd_sample(&big(10), 0, &mut rng).unwrap().is_empty());
        assert!(floyd_sample(&big(0), 0, &mut rng).unwrap().is_empty());
    }

    #[test]
    fn test_oversized_sample_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(matches!(
            floyd_sample(&big(5), 6, &mut rng),
            Err(FanoutError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_distinct_and_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let total = big(1_000);
        let sample = floyd_sample(&total, 250, &mut rng).unwrap();
        assert_eq!(sample.len(), 250);
        assert!(sample.iter().all(|v| v < &total));
    }

    #[test]
    fn test_total_beyond_u128() {
        let mut rng = StdRng::seed_from_u64(42);
        let total = BigUint::from(u128::MAX) * 1_000u32 + 17u32;
        let sample = floyd_sample(&total, 1_000, &mut rng).unwrap();
        assert_eq!(sample.len(), 1_000);
        assert!(sample.iter().all(|v| v < &total));
        // Draws come from the whole range, not just the low 128 bits
        assert!(sample.iter().any(|v| v.bits() > 128));
    }

    #[test]
    fn test_seeded_runs_match() {
        let total = big(1_000_000);
        let a = floyd_sample(&total, 50, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = floyd_sample(&total, 50, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_roughly_uniform() {
        let mut rng = StdRng::seed_from_u64(1234);
        let mut counts = [0u32; 10];
        for _ in 0..20_000 {
            for v in floyd_sample(&big(10), 3, &mut rng).unwrap() {
                counts[usize::try_from(&v).unwrap()] += 1;
            }
        }
        // Each value is expected 6000 times (sd ~ 65)
        for count in counts {
            assert!((5_600..=6_400).contains(&count), "count {count}");
        }
    }

    #[test]
    fn test_wide_draw_is_uniform() {
        let mut rng = StdRng::seed_from_u64(77);
        let bound = big(10);
        let mut counts = [0u32; 10];
        for _ in 0..10_000 {
            let v = random_below_wide(&bound, &mut rng);
            counts[usize::try_from(&v).unwrap()] += 1;
        }
        // ~1000 each (sd ~ 30)
        for count in counts {
            assert!((850..=1_150).contains(&count), "count {count}");
        }
    }

    #[test]
    fn test_wide_draw_stays_below_bound() {
        let mut rng = StdRng::seed_from_u64(5);
        let bound = (BigUint::from(1u32) << 130usize) + 3u32;
        for _ in 0..1_000 {
            assert!(random_below(&bound, &mut rng) < bound);
        }
    }
}
