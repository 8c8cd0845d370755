//! The only place application state changes.
//!
//! [`reduce`] is a total, synchronous function from the previous snapshot and one
//! event to the next snapshot. It performs no I/O; work that needs the transport
//! (refetching a game, reloading the list) is returned as [`FollowUp`]s for the
//! session to carry out. [`Store`] holds the latest snapshot and publishes each
//! new one on a watch channel.
use crate::{
    events::{
        Account,
        Address,
        ContractEvent,
        Event,
        GameId,
        GameTuple,
        GameUpdateEvent,
        GameWonEvent,
        LogPosition,
    },
    game::{
        Board,
        Game,
        Status,
        parse_board,
    },
    snapshot::ApplicationState,
};
use std::{
    collections::BTreeMap,
    sync::Arc,
};
use tokio::sync::watch;
use tracing::{
    debug,
    warn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    RefetchGames,
    RefetchGame(GameId),
}

#[derive(Debug, Default)]
pub struct Reduction {
    /// `None` when the event left the state as it was.
    pub next: Option<ApplicationState>,
    pub follow_ups: Vec<FollowUp>,
}

impl Reduction {
    fn unchanged() -> Self {
        Self::default()
    }

    fn next(state: ApplicationState) -> Self {
        Self {
            next: Some(state),
            follow_ups: Vec::new(),
        }
    }

    fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_ups.push(follow_up);
        self
    }
}

pub fn reduce(state: &ApplicationState, event: &Event) -> Reduction {
    let mut reduction = reduce_event(state, event);
    if reduction.next.as_ref() == Some(state) {
        reduction.next = None;
    }
    reduction
}

fn reduce_event(state: &ApplicationState, event: &Event) -> Reduction {
    match event {
        Event::GamesFetched(tuples) => games_fetched(state, tuples),
        Event::GameFetched(tuple) => game_fetched(state, tuple),
        Event::ContractEvent(contract_event, position) => {
            contract_event_received(state, contract_event, *position)
        }
        Event::AccountsFetched(accounts) => accounts_fetched(state, accounts),
        Event::AccountSelected(address) => {
            if state.default_account.as_ref() == Some(address) {
                return Reduction::unchanged();
            }
            Reduction::next(ApplicationState {
                default_account: Some(address.clone()),
                ..state.clone()
            })
        }
        Event::OwnerFetched(owner) => Reduction::next(ApplicationState {
            owner: Some(owner.clone()),
            ..state.clone()
        }),
        Event::CommissionsChanged { enabled, fee } => {
            Reduction::next(ApplicationState {
                commissions_enabled: *enabled,
                fee: *fee,
                ..state.clone()
            })
        }
        Event::Unrecognized(kind) => {
            debug!(%kind, "ignoring unrecognized event");
            Reduction::unchanged()
        }
    }
}

fn contract_event_received(
    state: &ApplicationState,
    event: &ContractEvent,
    position: LogPosition,
) -> Reduction {
    match event {
        ContractEvent::NewGame(_) => {
            Reduction::unchanged().with_follow_up(FollowUp::RefetchGames)
        }
        ContractEvent::GameStarted(started) => game_started(state, started.game_id),
        ContractEvent::GameUpdate(update) => game_updated(state, update, position),
        ContractEvent::GameWon(won) => game_won(state, won, position),
    }
}

fn games_fetched(state: &ApplicationState, tuples: &[GameTuple]) -> Reduction {
    let mut games = BTreeMap::new();
    for tuple in tuples {
        let fresh = match Game::from_tuple(tuple) {
            Ok(game) => game,
            Err(err) => {
                warn!(?err, id = ?tuple.id, "skipping malformed game record");
                continue;
            }
        };
        let game = match state.games.get(&fresh.id) {
            Some(known) => known.refreshed_from(fresh),
            None => fresh,
        };
        games.insert(game.id, game);
    }
    let current_game = match &state.current_game {
        Some(current) => match games.get(&current.id) {
            Some(fresh) => Some(current.refreshed_from(fresh.clone())),
            None => Some(current.clone()),
        },
        None => None,
    };
    Reduction::next(ApplicationState {
        games,
        current_game,
        ..state.clone()
    })
}

fn game_fetched(state: &ApplicationState, tuple: &GameTuple) -> Reduction {
    let fresh = match Game::from_tuple(tuple) {
        Ok(game) => game,
        Err(err) => {
            warn!(?err, id = ?tuple.id, "discarding malformed game record");
            return Reduction::unchanged();
        }
    };
    let game = match state.games.get(&fresh.id) {
        Some(known) => known.refreshed_from(fresh),
        None => fresh,
    };
    let mut games = state.games.clone();
    games.insert(game.id, game.clone());
    Reduction::next(ApplicationState {
        games,
        current_game: Some(game),
        ..state.clone()
    })
}

fn game_started(state: &ApplicationState, game_id: GameId) -> Reduction {
    let Some(known) = state.games.get(&game_id) else {
        debug!(game_id, "game started for unknown game");
        return Reduction::unchanged();
    };
    let mut games = state.games.clone();
    games.insert(game_id, advance_status(known, Status::Ongoing));
    let current_game = state.current_game.as_ref().map(|current| {
        if current.id == game_id {
            advance_status(current, Status::Ongoing)
        } else {
            current.clone()
        }
    });
    let reduction = Reduction::next(ApplicationState {
        games,
        current_game,
        ..state.clone()
    });
    if state.is_focused(game_id) {
        reduction.with_follow_up(FollowUp::RefetchGame(game_id))
    } else if !known.has_opponent() {
        // The listed entry still lacks the joining player.
        reduction.with_follow_up(FollowUp::RefetchGames)
    } else {
        reduction
    }
}

fn advance_status(game: &Game, status: Status) -> Game {
    Game {
        status: game.status.max(status),
        ..game.clone()
    }
}

fn game_updated(
    state: &ApplicationState,
    update: &GameUpdateEvent,
    position: LogPosition,
) -> Reduction {
    let board = match parse_board(&update.board) {
        Ok(board) => board,
        Err(err) => {
            warn!(?err, game_id = update.game_id, "discarding malformed board update");
            return Reduction::unchanged();
        }
    };
    let focused = state
        .current_game
        .as_ref()
        .filter(|current| current.id == update.game_id);
    let Some(target) = focused.or_else(|| state.games.get(&update.game_id)) else {
        debug!(game_id = update.game_id, "board update for unknown game");
        return Reduction::unchanged();
    };
    if target.last_update.is_some_and(|seen| position <= seen) {
        debug!(game_id = update.game_id, ?position, "board update already applied");
        return Reduction::unchanged();
    }

    let merged = merge_update(target, board, update, position);
    let mut games = state.games.clone();
    games.insert(merged.id, merged.clone());
    let current_game = match &state.current_game {
        Some(current) if current.id == merged.id => Some(merged),
        other => other.clone(),
    };
    Reduction::next(ApplicationState {
        games,
        current_game,
        ..state.clone()
    })
}

/// Folds one board update into `target`.
///
/// Streams replay from genesis, so a game focused after play has begun first
/// receives boards older than the one it was fetched with. Those extend the
/// history but leave the fetched board and winner in place.
fn merge_update(
    target: &Game,
    board: Board,
    update: &GameUpdateEvent,
    position: LogPosition,
) -> Game {
    let mut history = match &target.history {
        Some(history) => history.clone(),
        None if precedes(&target.board, &board) => vec![target.board.clone()],
        None => vec![Board::default()],
    };
    history.push(board.clone());
    let mut merged = if filled_cells(&board) < filled_cells(&target.board) {
        Game {
            history: Some(history),
            last_update: Some(position),
            ..target.clone()
        }
    } else {
        Game {
            board,
            whose_turn: update.whose_turn.clone(),
            winner: update.winner.clone(),
            history: Some(history),
            last_update: Some(position),
            ..target.clone()
        }
    };
    let reached = if !merged.winner.is_zero() || merged.is_board_full() {
        Status::Done
    } else {
        merged.status
    };
    merged.status = merged.status.max(reached);
    merged
}

fn filled_cells(board: &Board) -> usize {
    board.iter().filter(|cell| cell.is_some()).count()
}

/// `earlier` is a strict prefix of play leading to `later`.
fn precedes(earlier: &Board, later: &Board) -> bool {
    let consistent = earlier
        .iter()
        .zip(later)
        .all(|(before, after)| before.is_none() || before == after);
    consistent && filled_cells(earlier) < filled_cells(later)
}

fn game_won(
    state: &ApplicationState,
    won: &GameWonEvent,
    position: LogPosition,
) -> Reduction {
    if state.last_game_won.is_some_and(|seen| position <= seen) {
        debug!(winner = %won.winner, ?position, "game won already counted");
        return Reduction::unchanged();
    }
    match state.rankings.record_win(&won.winner, won.winnings) {
        Ok(rankings) => Reduction::next(ApplicationState {
            rankings,
            last_game_won: Some(position),
            ..state.clone()
        }),
        Err(err) => {
            warn!(?err, winner = %won.winner, "discarding game won event");
            Reduction::unchanged()
        }
    }
}

fn accounts_fetched(state: &ApplicationState, accounts: &[Account]) -> Reduction {
    if state.accounts == accounts {
        return Reduction::unchanged();
    }
    let default_account = state
        .default_account
        .clone()
        .or_else(|| accounts.first().map(|account| account.address.clone()));
    Reduction::next(ApplicationState {
        accounts: accounts.to_vec(),
        default_account,
        ..state.clone()
    })
}

/// Holds the latest snapshot and broadcasts every new one.
pub struct Store {
    state: Arc<ApplicationState>,
    publisher: watch::Sender<Arc<ApplicationState>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(ApplicationState::new())
    }
}

impl Store {
    pub fn new(initial: ApplicationState) -> Self {
        let state = Arc::new(initial);
        let (publisher, _) = watch::channel(state.clone());
        Self { state, publisher }
    }

    pub fn state(&self) -> Arc<ApplicationState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ApplicationState>> {
        self.publisher.subscribe()
    }

    /// Fold one event into the store and return the work it asks for.
    pub fn apply(&mut self, event: &Event) -> Vec<FollowUp> {
        let Reduction { next, follow_ups } = reduce(&self.state, event);
        if let Some(next) = next {
            self.state = Arc::new(next);
            self.publisher.send_replace(self.state.clone());
        }
        follow_ups
    }

    pub fn default_account(&self) -> Option<Address> {
        self.state.default_account.clone()
    }
}
