//! Colexicographic ranking of k-combinations.
//!
//! Combinations of `{0..n}` are ordered by their largest element first, then
//! the next-largest, and so on. Rank `r` maps to the combination at position
//! `r` in that order, so C(n,k) combinations can be addressed by integers
//! without ever listing them. Counts and ranks are arbitrary precision.

use crate::models::{FanoutError, Result};
use num_bigint::BigUint;

/// Exact binomial coefficient C(n, k); zero when `k > n`.
pub fn binomial(n: usize, k: usize) -> BigUint {
    if k > n {
        return BigUint::ZERO;
    }

    let k = k.min(n - k) as u64;
    let n = n as u64;
    let mut result = BigUint::from(1u32);

    for i in 1..=k {
        // result == C(n - k + i - 1, i - 1), so result * m is divisible by i
        let m = n - k + i;
        result = result * m / i;
    }

    result
}

/// Map `rank` in `[0, C(n,k))` to the k-combination at that colex position.
///
/// The result holds `k` strictly increasing indices in `[0, n)`.
///
/// # Errors
///
/// `InvalidArgument` if `k > n` or if `rank >= C(n,k)`.
pub fn unrank(n: usize, k: usize, rank: impl Into<BigUint>) -> Result<Vec<usize>> {
    let rank = rank.into();
    if k > n {
        return Err(FanoutError::invalid(format!(
            "cannot choose {k} items from {n}"
        )));
    }

    let total = binomial(n, k);
    if rank >= total {
        return Err(FanoutError::invalid(format!(
            "rank {rank} out of range for C({n}, {k}) = {total}"
        )));
    }

    let mut combination = Vec::with_capacity(k);
    let mut remaining = rank;
    // Exclusive upper bound for the next element.
    let mut upper = n;

    for position in (1..=k).rev() {
        // Largest c in [position - 1, upper - 1] with C(c, position) <= remaining.
        // C(position - 1, position) == 0, so the lower bound always qualifies.
        let mut lo = position - 1;
        let mut hi = upper - 1;
        while lo < hi {
            let mid = lo + (hi - lo).div_ceil(2);
            if binomial(mid, position) <= remaining {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        remaining -= binomial(lo, position);
        combination.push(lo);
        upper = lo;
    }

    combination.reverse();
    Ok(combination)
}
