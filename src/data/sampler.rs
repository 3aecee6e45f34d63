// ============================================================
// Layer 4 — Random Limiter
// ============================================================
// Few-shot experiments cap the train/dev sets at a fixed
// number of instances drawn at random. The RNG is passed in
// so a run seeded with --seed always draws the same subset.
//
// Uses rand::seq::SliceRandom::choose_multiple, which samples
// without replacement and keeps the result unbiased.
//
// Reference: rand crate documentation

use rand::{seq::SliceRandom, Rng};

/// Keep at most `limit` items, drawn uniformly without replacement.
/// `None` keeps everything in the original order.
pub fn limit_samples<T: Clone, R: Rng + ?Sized>(
    samples: Vec<T>,
    limit:   Option<usize>,
    rng:     &mut R,
) -> Vec<T> {
    match limit {
        Some(n) if n < samples.len() => {
            let kept: Vec<T> = samples.choose_multiple(rng, n).cloned().collect();
            tracing::debug!("Limited dataset from {} to {} instances", samples.len(), kept.len());
            kept
        }
        _ => samples,
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_limit_keeps_requested_count() {
        let mut rng = StdRng::seed_from_u64(1234);
        let kept = limit_samples((0..100).collect::<Vec<usize>>(), Some(16), &mut rng);
        assert_eq!(kept.len(), 16);
        // sampled without replacement
        let mut sorted = kept.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 16);
    }

    #[test]
    fn test_no_limit_keeps_order() {
        let mut rng = StdRng::seed_from_u64(0);
        let kept = limit_samples(vec![3, 1, 2], None, &mut rng);
        assert_eq!(kept, vec![3, 1, 2]);
    }

    #[test]
    fn test_limit_larger_than_dataset() {
        let mut rng = StdRng::seed_from_u64(0);
        let kept = limit_samples(vec![1, 2], Some(10), &mut rng);
        assert_eq!(kept, vec![1, 2]);
    }

    #[test]
    fn test_same_seed_same_subset() {
        let a = limit_samples((0..50).collect::<Vec<u32>>(), Some(5), &mut StdRng::seed_from_u64(7));
        let b = limit_samples((0..50).collect::<Vec<u32>>(), Some(5), &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
