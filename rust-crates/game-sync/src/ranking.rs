use crate::{
    ValidationError,
    events::Address,
    units::wei_to_ether,
};
use rust_decimal::Decimal;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashMap;

/// Win counts and cumulative winnings (in ether) per player.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rankings {
    pub by_wins: HashMap<Address, u64>,
    pub by_winnings: HashMap<Address, Decimal>,
}

impl Rankings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tally one win. Applying the same win twice counts it twice; callers dedup.
    pub fn record_win(
        &self,
        winner: &Address,
        winnings_wei: u128,
    ) -> Result<Rankings, ValidationError> {
        let winnings = wei_to_ether(winnings_wei)?;
        let mut next = self.clone();
        *next.by_wins.entry(winner.clone()).or_insert(0) += 1;
        *next
            .by_winnings
            .entry(winner.clone())
            .or_insert(Decimal::ZERO) += winnings;
        Ok(next)
    }

    pub fn wins(&self, player: &Address) -> u64 {
        self.by_wins.get(player).copied().unwrap_or(0)
    }

    pub fn winnings(&self, player: &Address) -> Decimal {
        self.by_winnings
            .get(player)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn leaderboard_by_wins(&self) -> Vec<(Address, u64)> {
        sorted_descending(&self.by_wins)
    }

    pub fn leaderboard_by_winnings(&self) -> Vec<(Address, Decimal)> {
        sorted_descending(&self.by_winnings)
    }
}

fn sorted_descending<V: Ord + Copy>(scores: &HashMap<Address, V>) -> Vec<(Address, V)> {
    let mut entries: Vec<_> = scores
        .iter()
        .map(|(address, score)| (address.clone(), *score))
        .collect();
    entries.sort_by(|(a_addr, a_score), (b_addr, b_score)| {
        b_score.cmp(a_score).then_with(|| a_addr.cmp(b_addr))
    });
    entries
}
