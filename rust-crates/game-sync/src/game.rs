//! Logical view of a single game derived from its raw ledger record.
use crate::{
    ValidationError,
    events::{
        Address,
        GameId,
        GameTuple,
        LogPosition,
    },
    units::{
        MAX_EXACT_WEI,
        wei_to_ether,
    },
};
use rust_decimal::Decimal;
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

pub const BOARD_SIZE: usize = 9;

pub const MAX_FEE_PERCENT: u8 = 20;

const LINES: [[usize; 3]; 8] = [
    // rows
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    // columns
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    // diagonals
    [0, 4, 8],
    [2, 4, 6],
];

pub type Board = [Option<Address>; BOARD_SIZE];

pub type BoardView = [Option<Symbol>; BOARD_SIZE];

#[derive(PartialEq, Eq, Debug, Copy, Clone, Serialize, Deserialize)]
pub enum Symbol {
    X,
    O,
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::X => f.write_str("X"),
            Symbol::O => f.write_str("O"),
        }
    }
}

/// Ordered so that a game only ever moves forward: `Betting < Ongoing < Done`.
#[derive(
    PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Serialize, Deserialize,
)]
pub enum Status {
    Betting,
    Ongoing,
    Done,
}

impl Status {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Status::Betting,
            1 => Status::Ongoing,
            _ => Status::Done,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub player_x: Address,
    pub player_y: Address,
    pub bet: Option<u128>,
    pub fee: Option<u8>,
    pub board: Board,
    pub whose_turn: Address,
    pub status: Status,
    pub winner: Address,
    pub history: Option<Vec<Board>>,
    /// Last board update folded into this game.
    pub last_update: Option<LogPosition>,
}

pub fn parse_board(cells: &[String]) -> Result<Board, ValidationError> {
    if cells.len() != BOARD_SIZE {
        return Err(ValidationError::BoardLength(cells.len()));
    }
    let mut board: Board = Default::default();
    for (slot, raw) in board.iter_mut().zip(cells) {
        *slot = parse_cell(raw);
    }
    Ok(board)
}

fn parse_cell(raw: &str) -> Option<Address> {
    let address = Address::new(raw);
    if raw.is_empty() || address.is_zero() {
        None
    } else {
        Some(address)
    }
}

impl Game {
    pub fn from_tuple(tuple: &GameTuple) -> Result<Self, ValidationError> {
        let id = tuple.id.ok_or(ValidationError::MissingId)?;
        let board = parse_board(&tuple.board)?;
        if let Some(bet) = tuple.bet.filter(|bet| *bet > MAX_EXACT_WEI) {
            return Err(ValidationError::AmountOutOfRange(bet));
        }
        let fee = match tuple.fee_code {
            Some(fee) if fee > MAX_FEE_PERCENT => {
                return Err(ValidationError::FeeOutOfRange(fee));
            }
            Some(0) | None => None,
            Some(fee) => Some(fee),
        };
        let player_y = if tuple.player_y.is_zero() {
            Address::zero()
        } else {
            tuple.player_y.clone()
        };
        Ok(Self {
            id,
            player_x: tuple.player_x.clone(),
            player_y,
            bet: tuple.bet,
            fee,
            board,
            whose_turn: tuple.player_x.clone(),
            status: Status::from_code(tuple.status_code),
            winner: tuple.winner.clone(),
            history: None,
            last_update: None,
        })
    }

    /// Fresh ledger fields from `fresh`, client bookkeeping from `self`.
    ///
    /// Status keeps the furthest phase seen so a stale read cannot move it back.
    pub fn refreshed_from(&self, fresh: Game) -> Game {
        Game {
            status: self.status.max(fresh.status),
            history: self.history.clone(),
            last_update: self.last_update,
            whose_turn: if self.last_update.is_some() {
                self.whose_turn.clone()
            } else {
                fresh.whose_turn.clone()
            },
            ..fresh
        }
    }

    pub fn player_symbol(&self, address: &Address) -> Option<Symbol> {
        if *address == self.player_x {
            Some(Symbol::X)
        } else if *address == self.player_y && self.has_opponent() {
            Some(Symbol::O)
        } else {
            None
        }
    }

    pub fn board_view(&self) -> BoardView {
        let mut view: BoardView = [None; BOARD_SIZE];
        for (slot, cell) in view.iter_mut().zip(&self.board) {
            *slot = cell.as_ref().and_then(|owner| self.player_symbol(owner));
        }
        view
    }

    pub fn calculate_winner(&self) -> Option<Symbol> {
        // A declared winner that is not a player falls through to the board.
        if let Some(symbol) = self.declared_winner() {
            return Some(symbol);
        }
        let view = self.board_view();
        LINES.iter().find_map(|[a, b, c]| match (view[*a], view[*b], view[*c]) {
            (Some(first), Some(second), Some(third))
                if first == second && first == third =>
            {
                Some(first)
            }
            _ => None,
        })
    }

    fn declared_winner(&self) -> Option<Symbol> {
        if self.winner.is_zero() {
            None
        } else {
            self.player_symbol(&self.winner)
        }
    }

    pub fn is_board_full(&self) -> bool {
        self.board_view().iter().all(Option::is_some)
    }

    pub fn is_draw(&self) -> bool {
        self.is_board_full() && self.calculate_winner().is_none()
    }

    pub fn is_in_betting_phase(&self) -> bool {
        self.status == Status::Betting
    }

    pub fn is_game_over(&self) -> bool {
        self.status == Status::Done
    }

    pub fn has_opponent(&self) -> bool {
        !self.player_y.is_zero()
    }

    pub fn is_cell_occupied(&self, index: usize) -> Result<bool, ValidationError> {
        let view = self.board_view();
        view.get(index)
            .map(Option::is_some)
            .ok_or(ValidationError::CellIndex(index))
    }

    pub fn whose_turn_symbol(&self) -> Symbol {
        if self.whose_turn == self.player_x {
            Symbol::X
        } else {
            Symbol::O
        }
    }

    /// A player other than the creator may join while bets are open.
    pub fn is_joinable_by(&self, address: &Address) -> bool {
        *address != self.player_x && self.is_in_betting_phase()
    }

    pub fn bet_as_ether(&self) -> Option<Decimal> {
        self.bet.and_then(|bet| wei_to_ether(bet).ok())
    }

    /// Both stakes together.
    pub fn total_bet_as_ether(&self) -> Option<Decimal> {
        self.bet_as_ether().map(|bet| bet * Decimal::TWO)
    }

    /// Share of the pot the contract keeps on settlement.
    pub fn commission(&self) -> Option<Decimal> {
        let fee = Decimal::from(self.fee?);
        self.total_bet_as_ether()
            .map(|total| total * fee / Decimal::ONE_HUNDRED)
    }
}

/// Subsets of the game list a player may want to look at.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum GameFilter {
    All,
    MyGames(Address),
    Betting,
    BettingOrOngoing,
    Ongoing,
    Done,
}

impl GameFilter {
    pub fn matches(&self, game: &Game) -> bool {
        match self {
            GameFilter::All => true,
            GameFilter::MyGames(address) => game.player_symbol(address).is_some(),
            GameFilter::Betting => game.status == Status::Betting,
            GameFilter::BettingOrOngoing => game.status != Status::Done,
            GameFilter::Ongoing => game.status == Status::Ongoing,
            GameFilter::Done => game.status == Status::Done,
        }
    }
}
