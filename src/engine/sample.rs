use rand::Rng;

/// Single-pass uniform choice over a stream of unknown length.
#[derive(Debug)]
pub struct Reservoir<T> {
    seen: usize,
    held: Option<T>,
}

impl<T> Default for Reservoir<T> {
    fn default() -> Self {
        Self {
            seen: 0,
            held: None,
        }
    }
}

impl<T> Reservoir<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers the next candidate; the Nth offer is kept with probability 1/N.
    pub fn offer<R: Rng + ?Sized>(&mut self, item: T, rng: &mut R) {
        self.seen += 1;
        if rng.random_range(0..self.seen) == 0 {
            self.held = Some(item);
        }
    }

    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn into_inner(self) -> Option<T> {
        self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn empty_stream_holds_nothing() {
        let reservoir: Reservoir<u8> = Reservoir::new();
        assert_eq!(reservoir.seen(), 0);
        assert!(reservoir.into_inner().is_none());
    }

    #[test]
    fn single_item_is_always_kept() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut reservoir = Reservoir::new();
        reservoir.offer("only", &mut rng);
        assert_eq!(reservoir.into_inner(), Some("only"));
    }

    #[test]
    fn selection_is_uniform() {
        const N: usize = 5;
        const TRIALS: usize = 50_000;
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0usize; N];

        for _ in 0..TRIALS {
            let mut reservoir = Reservoir::new();
            for i in 0..N {
                reservoir.offer(i, &mut rng);
            }
            if let Some(i) = reservoir.into_inner() {
                counts[i] += 1;
            }
        }

        // expected 10_000 each, sd ~89
        let expected = TRIALS / N;
        for count in counts {
            assert!(count.abs_diff(expected) < 500, "counts {:?}", counts);
        }
    }
}
