use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

pub type GameId = u64;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Opaque ledger account identifier.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn zero() -> Self {
        Self(ZERO_ADDRESS.to_string())
    }

    /// True for the sentinel meaning "no opponent" / "no winner", in full or short form.
    pub fn is_zero(&self) -> bool {
        match self.0.strip_prefix("0x") {
            Some(digits) => !digits.is_empty() && digits.chars().all(|c| c == '0'),
            None => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0xabc...def` form for compact listings.
    pub fn short(&self) -> String {
        let raw = self.0.as_str();
        if raw.len() <= 8 {
            return raw.to_string();
        }
        let head = raw.get(..5).unwrap_or(raw);
        let tail = raw.get(raw.len() - 3..).unwrap_or_default();
        format!("{head}...{tail}")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Position of a log entry in the ledger; strictly increasing along the chain.
#[derive(
    PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Copy, Clone, Default, Serialize, Deserialize,
)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u32,
}

impl LogPosition {
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

/// Game record exactly as the ledger returns it. Cells hold an address, the zero
/// address, or an empty string.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct GameTuple {
    pub id: Option<GameId>,
    pub player_x: Address,
    pub player_y: Address,
    pub bet: Option<u128>,
    pub status_code: u8,
    pub fee_code: Option<u8>,
    pub board: Vec<String>,
    pub winner: Address,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: u128,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub block_number: u64,
    pub logs: Vec<ContractEvent>,
}

impl Receipt {
    /// Id of the game announced by the first `NewGame` log, if any.
    pub fn created_game_id(&self) -> Option<GameId> {
        self.logs.iter().find_map(|log| match log {
            ContractEvent::NewGame(event) => Some(event.game_id),
            _ => None,
        })
    }
}

/// A decoded ledger log together with where it sits in the chain.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub position: LogPosition,
    pub event: ContractEvent,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub enum ContractEvent {
    NewGame(NewGameEvent),
    GameStarted(GameStartedEvent),
    GameUpdate(GameUpdateEvent),
    GameWon(GameWonEvent),
}

impl ContractEvent {
    pub fn game_id(&self) -> Option<GameId> {
        match self {
            ContractEvent::NewGame(event) => Some(event.game_id),
            ContractEvent::GameStarted(event) => Some(event.game_id),
            ContractEvent::GameUpdate(event) => Some(event.game_id),
            ContractEvent::GameWon(event) => event.game_id,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct NewGameEvent {
    pub game_id: GameId,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct GameStartedEvent {
    pub game_id: GameId,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct GameUpdateEvent {
    pub game_id: GameId,
    pub board: Vec<String>,
    pub whose_turn: Address,
    pub winner: Address,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct GameWonEvent {
    pub game_id: Option<GameId>,
    pub winner: Address,
    pub winnings: u128,
}

/// Everything the store can be asked to fold in.
#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    GamesFetched(Vec<GameTuple>),
    GameFetched(GameTuple),
    ContractEvent(ContractEvent, LogPosition),
    AccountsFetched(Vec<Account>),
    AccountSelected(Address),
    OwnerFetched(Address),
    CommissionsChanged { enabled: bool, fee: u8 },
    /// A payload the client does not understand; folding it changes nothing.
    Unrecognized(String),
}

impl Event {
    pub fn game_update(
        position: LogPosition,
        game_id: GameId,
        board: Vec<String>,
        whose_turn: Address,
        winner: Address,
    ) -> Self {
        let inner = GameUpdateEvent {
            game_id,
            board,
            whose_turn,
            winner,
        };
        Event::ContractEvent(ContractEvent::GameUpdate(inner), position)
    }

    pub fn game_won(position: LogPosition, winner: Address, winnings: u128) -> Self {
        let inner = GameWonEvent {
            game_id: None,
            winner,
            winnings,
        };
        Event::ContractEvent(ContractEvent::GameWon(inner), position)
    }

    pub fn game_started(position: LogPosition, game_id: GameId) -> Self {
        let inner = GameStartedEvent { game_id };
        Event::ContractEvent(ContractEvent::GameStarted(inner), position)
    }
}

impl From<Notification> for Event {
    fn from(notification: Notification) -> Self {
        Event::ContractEvent(notification.event, notification.position)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn game_id__game_won_without_id__is_none() {
        let won = ContractEvent::GameWon(GameWonEvent {
            game_id: None,
            winner: Address::from("0xA"),
            winnings: 1,
        });
        let started = ContractEvent::GameStarted(GameStartedEvent { game_id: 4 });

        assert_eq!(won.game_id(), None);
        assert_eq!(started.game_id(), Some(4));
    }

    #[test]
    fn short__full_address__keeps_head_and_tail() {
        let address = Address::new(format!("0x{}", "ab".repeat(20)));

        assert_eq!(address.short(), "0xaba...bab");
    }

    #[test]
    fn is_zero__short_and_full_sentinel__are_zero() {
        assert!(Address::from("0x0").is_zero());
        assert!(Address::zero().is_zero());
        assert!(!Address::from("0x").is_zero());
        assert!(!Address::from("0xA").is_zero());
    }

    #[test]
    fn created_game_id__receipt_with_new_game__returns_its_id() {
        let receipt = Receipt {
            block_number: 3,
            logs: vec![
                ContractEvent::GameStarted(GameStartedEvent { game_id: 1 }),
                ContractEvent::NewGame(NewGameEvent { game_id: 2 }),
            ],
        };

        assert_eq!(receipt.created_game_id(), Some(2));
    }
}
