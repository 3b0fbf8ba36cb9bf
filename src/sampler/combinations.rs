//! Exact-uniform sampling of distinct k-combinations.
//!
//! Epistemic foundation:
//! - K_i: Every k-subset has a unique colex rank in [0, C(n,k))
//! - K_i: Distinct ranks give distinct subsets, so no dedup pass is needed
//! - I^B: C(n,k) may be astronomically larger than the sample, so the space
//!   is never materialized

use crate::models::{FanoutError, Result};
use crate::sampler::{binomial, floyd_sample, unrank};
use num_bigint::BigUint;
use rand::Rng;
use tracing::debug;

/// Draw `count` distinct k-subsets of `{0..n}` uniformly at random.
///
/// Each subset is returned as increasing indices. With `count == C(n,k)` the
/// result is every subset, in colex order.
///
/// # Errors
///
/// `InvalidArgument` if `k > n` or if `count > C(n,k)`.
pub fn sample_index_combinations<R>(
    n: usize,
    k: usize,
    count: usize,
    rng: &mut R,
) -> Result<Vec<Vec<usize>>>
where
    R: Rng + ?Sized,
{
    if k > n {
        return Err(FanoutError::invalid(format!(
            "cannot choose {k} items from {n}"
        )));
    }

    let total = binomial(n, k);
    if BigUint::from(count) > total {
        return Err(FanoutError::invalid(format!(
            "requested {count} combinations but only C({n}, {k}) = {total} exist"
        )));
    }

    debug!(n, k, count, total = %total, "Sampling combinations");

    floyd_sample(&total, count, rng)?
        .into_iter()
        .map(|rank| unrank(n, k, rank))
        .collect()
}

/// Draw `count` distinct k-item groupings of `items` uniformly at random.
///
/// Items are cloned into each grouping in their original relative order.
/// Groupings are distinct by position, so equal items at different positions
/// still count as different members.
pub fn sample_exact_combinations<T, R>(
    items: &[T],
    k: usize,
    count: usize,
    rng: &mut R,
) -> Result<Vec<Vec<T>>>
where
    T: Clone,
    R: Rng + ?Sized,
{
    let indices = sample_index_combinations(items.len(), k, count, rng)?;

    Ok(indices
        .into_iter()
        .map(|combination| combination.into_iter().map(|i| items[i].clone()).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::{BTreeSet, HashMap};

    #[test]
    fn test_full_pair_space_without_duplicates() {
        let n = 300;
        let items: Vec<u32> = (0..n as u32).collect();
        let total = usize::try_from(&binomial(n, 2)).unwrap();

        let mut rng = StdRng::seed_from_u64(11);
        let sample = sample_exact_combinations(&items, 2, total, &mut rng).unwrap();
        assert_eq!(sample.len(), total);

        let distinct: BTreeSet<Vec<u32>> = sample.into_iter().collect();
        assert_eq!(distinct.len(), total);

        let mut expected = BTreeSet::new();
        for a in 0..n as u32 {
            for b in a + 1..n as u32 {
                expected.insert(vec![a, b]);
            }
        }
        assert_eq!(distinct, expected);
    }

    #[test]
    fn test_oversized_request_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let result = sample_exact_combinations(&[1, 2, 3], 2, 4, &mut rng);
        assert!(matches!(result, Err(FanoutError::InvalidArgument(_))));
    }

    #[test]
    fn test_k_larger_than_items_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(sample_exact_combinations(&[1, 2], 3, 0, &mut rng).is_err());
    }

    #[test]
    fn test_sparse_sample_from_huge_space() {
        // C(100_000, 8) is ~2.5e35; only the sample is ever built
        let mut rng = StdRng::seed_from_u64(3);
        let sample = sample_index_combinations(100_000, 8, 200, &mut rng).unwrap();
        assert_eq!(sample.len(), 200);

        let distinct: BTreeSet<&Vec<usize>> = sample.iter().collect();
        assert_eq!(distinct.len(), 200);
        for combination in &sample {
            assert_eq!(combination.len(), 8);
            assert!(combination.windows(2).all(|w| w[0] < w[1]));
            assert!(combination.iter().all(|&i| i < 100_000));
        }
    }

    #[test]
    fn test_space_beyond_u128_samples() {
        // C(200, 50) ~ 4.5e47
        let mut rng = StdRng::seed_from_u64(1);
        let sample = sample_index_combinations(200, 50, 5, &mut rng).unwrap();
        assert_eq!(sample.len(), 5);

        let distinct: BTreeSet<&Vec<usize>> = sample.iter().collect();
        assert_eq!(distinct.len(), 5);
        for combination in &sample {
            assert_eq!(combination.len(), 50);
            assert!(combination.windows(2).all(|w| w[0] < w[1]));
            assert!(combination.iter().all(|&i| i < 200));
        }

        let mut rng = StdRng::seed_from_u64(3);
        let half = sample_index_combinations(1_000, 500, 3, &mut rng).unwrap();
        assert_eq!(half.len(), 3);
        assert!(half.iter().all(|c| c.len() == 500));
    }

    #[test]
    fn test_zero_samples_and_k_zero() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(sample_exact_combinations(&["a", "b"], 1, 0, &mut rng)
            .unwrap()
            .is_empty());
        assert_eq!(
            sample_exact_combinations(&["a", "b"], 0, 1, &mut rng).unwrap(),
            vec![Vec::<&str>::new()]
        );
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let items: Vec<char> = "abcdefghijklmnop".chars().collect();
        let a = sample_exact_combinations(&items, 3, 20, &mut StdRng::seed_from_u64(99)).unwrap();
        let b = sample_exact_combinations(&items, 3, 20, &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_draw_is_uniform() {
        // C(5, 2) = 10 outcomes, 10_000 draws: ~1000 each (sd ~ 30)
        let mut rng = StdRng::seed_from_u64(2024);
        let mut counts: HashMap<Vec<usize>, u32> = HashMap::new();
        for _ in 0..10_000 {
            let sample = sample_index_combinations(5, 2, 1, &mut rng).unwrap();
            *counts.entry(sample[0].clone()).or_default() += 1;
        }
        assert_eq!(counts.len(), 10);
        for (combination, count) in counts {
            assert!((800..=1_200).contains(&count), "{combination:?}: {count}");
        }
    }
}
