use rand::Rng;
use std::time::Duration;

/// Draws a random election timeout within the configured range.
///
/// The caller supplies the RNG so a seeded run re-draws the same sequence.
pub fn random_election_timeout<R: Rng>(rng: &mut R, min_ms: u64, max_ms: u64) -> Duration {
    let timeout_ms = rng.gen_range(min_ms..=max_ms);
    Duration::from_millis(timeout_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn timeout_stays_in_band() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..100 {
            let timeout = random_election_timeout(&mut rng, 150, 300);
            assert!(timeout >= Duration::from_millis(150));
            assert!(timeout <= Duration::from_millis(300));
        }
    }

    #[test]
    fn same_seed_same_draws() {
        let mut a = SmallRng::seed_from_u64(42);
        let mut b = SmallRng::seed_from_u64(42);
        for _ in 0..10 {
            assert_eq!(
                random_election_timeout(&mut a, 150, 300),
                random_election_timeout(&mut b, 150, 300)
            );
        }
    }
}
