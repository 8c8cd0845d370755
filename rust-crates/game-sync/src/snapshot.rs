use crate::{
    events::{
        Account,
        Address,
        GameId,
        LogPosition,
    },
    game::{
        Game,
        GameFilter,
    },
    ranking::Rankings,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

/// Everything the client knows about the ledger at one point in time.
///
/// Snapshots are never edited after publication; the reducer derives a new one
/// for every event that changes something.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationState {
    pub games: BTreeMap<GameId, Game>,
    // Same id as its entry in `games`, merged independently on updates.
    pub current_game: Option<Game>,
    pub rankings: Rankings,
    pub accounts: Vec<Account>,
    pub default_account: Option<Address>,
    pub owner: Option<Address>,
    pub commissions_enabled: bool,
    pub fee: u8,
    pub last_game_won: Option<LogPosition>,
}

impl ApplicationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game(&self, id: GameId) -> Option<&Game> {
        self.games.get(&id)
    }

    pub fn current_game_id(&self) -> Option<GameId> {
        self.current_game.as_ref().map(|game| game.id)
    }

    pub fn is_focused(&self, id: GameId) -> bool {
        self.current_game_id() == Some(id)
    }

    pub fn filtered_games<'a>(
        &'a self,
        filter: &'a GameFilter,
    ) -> impl Iterator<Item = &'a Game> + 'a {
        self.games.values().filter(move |game| filter.matches(game))
    }

    pub fn is_contract_owner(&self, address: &Address) -> bool {
        self.owner.as_ref() == Some(address)
    }
}
