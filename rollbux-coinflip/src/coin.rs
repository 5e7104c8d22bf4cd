use crate::CoinSide;
use rand::Rng;

/// Source of flip outcomes.
pub trait CoinSource: Send + Sync {
    fn flip(&self) -> CoinSide;
}

/// Fair coin backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCoin;

impl CoinSource for RandomCoin {
    fn flip(&self) -> CoinSide {
        if rand::thread_rng().gen_bool(0.5) {
            CoinSide::Heads
        } else {
            CoinSide::Tails
        }
    }
}

/// Always lands on the same side. For tests and demos.
#[derive(Debug, Clone, Copy)]
pub struct FixedCoin(pub CoinSide);

impl CoinSource for FixedCoin {
    fn flip(&self) -> CoinSide {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_coin_lands_both_ways() {
        let coin = RandomCoin;
        let heads = (0..1_000).filter(|_| coin.flip() == CoinSide::Heads).count();

        // Chance of falling outside this band with a fair coin is negligible.
        assert!(heads > 350 && heads < 650, "heads = {}", heads);
    }

    #[test]
    fn test_fixed_coin() {
        assert_eq!(FixedCoin(CoinSide::Tails).flip(), CoinSide::Tails);
    }
}
