use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

/// A stable, countable view over the examples of a dataset split.
pub trait SourceIndex {
    /// The amount of examples in the split.
    fn size(&self) -> usize;

    /// The amount of distinct classes, computed once when the index is built.
    fn num_classes(&self) -> usize;

    /// Returns a permutation of `0..size()`.
    ///
    /// # Arguments
    /// * `shuffle` - Whether to shuffle, the identity order is returned otherwise.
    /// * `seed` - The shuffling seed, the same seed always yields the same permutation.
    fn iteration_order(&self, shuffle: bool, seed: u64) -> Vec<usize> {
        permutation(self.size(), shuffle, seed)
    }
}

/// Returns `0..n`, shuffled with a `seed`-ed rng if `shuffle` is set.
pub fn permutation(n: usize, shuffle: bool, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();

    if shuffle {
        let mut rng = StdRng::seed_from_u64(seed);
        order.shuffle(&mut rng);
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_order_without_shuffle() {
        assert_eq!(permutation(5, false, 42), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn same_seed_same_permutation() {
        assert_eq!(permutation(100, true, 3), permutation(100, true, 3));
    }

    #[test]
    fn different_seeds_differ() {
        assert_ne!(permutation(100, true, 3), permutation(100, true, 4));
    }

    #[test]
    fn shuffled_order_is_a_permutation() {
        let mut order = permutation(50, true, 9);
        order.sort_unstable();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }
}
