#![allow(non_snake_case)]

use super::*;
use crate::{
    DeliveryError,
    app::{
        in_memory_ledger::InMemoryLedger,
        transport::EventHandle,
    },
    events::{
        Account,
        ContractEvent,
        GameUpdateEvent,
        LogPosition,
        Notification,
    },
    game::{
        Status,
        Symbol,
    },
    units::WEI_PER_ETHER,
};
use rust_decimal::Decimal;
use std::future::pending;

const QUIET: Duration = Duration::from_millis(20);
const STAKE: u128 = WEI_PER_ETHER;

struct Table {
    ledger: InMemoryLedger,
    owner: Address,
    alice: Address,
    bob: Address,
}

fn arb_table() -> Table {
    let ledger = InMemoryLedger::with_funded_accounts(3, 10 * WEI_PER_ETHER);
    let addresses = ledger.addresses();
    Table {
        owner: addresses[0].clone(),
        alice: addresses[1].clone(),
        bob: addresses[2].clone(),
        ledger,
    }
}

async fn session_for(ledger: &InMemoryLedger, account: &Address) -> Session<InMemoryLedger> {
    let mut session = Session::new(Arc::new(ledger.clone()), SessionConfig::default());
    session.start().await.unwrap();
    session.select_account(account.clone());
    session
}

/// Alice opens game 0 and Bob joins it; both sessions end focused on it.
async fn started_game(
    table: &Table,
) -> (Session<InMemoryLedger>, Session<InMemoryLedger>) {
    let mut alice = session_for(&table.ledger, &table.alice).await;
    let id = alice.create_game(STAKE).await.unwrap();
    let mut bob = session_for(&table.ledger, &table.bob).await;
    bob.join_game(id).await.unwrap();
    alice.settle(QUIET).await.unwrap();
    bob.settle(QUIET).await.unwrap();
    (alice, bob)
}

/// X takes the top row while O plays the middle row.
async fn play_top_row_win(
    alice: &mut Session<InMemoryLedger>,
    bob: &mut Session<InMemoryLedger>,
) {
    for (x_cell, o_cell) in [(0, 3), (1, 4)] {
        alice.player_move(x_cell).await.unwrap();
        bob.player_move(o_cell).await.unwrap();
    }
    alice.player_move(2).await.unwrap();
}

#[tokio::test]
async fn start__fresh_ledger__opens_session_wide_streams() {
    // given
    let table = arb_table();
    let mut session = Session::new(Arc::new(table.ledger.clone()), SessionConfig::default());

    // when
    session.start().await.unwrap();

    // then
    let expected = vec![Topic::NewGames, Topic::GameStarted, Topic::GameWon];
    assert_eq!(expected, session.active_topics());
    let state = session.state();
    assert_eq!(Some(table.owner.clone()), state.default_account);
    assert_eq!(Some(table.owner), state.owner);
    assert_eq!(3, state.accounts.len());
}

#[tokio::test]
async fn focus_game__switching_games__cancels_previous_stream_exactly_once() {
    // given
    let table = arb_table();
    table.ledger.submit_create_game(&table.alice, STAKE).await.unwrap();
    table.ledger.submit_create_game(&table.bob, STAKE).await.unwrap();
    let mut session = session_for(&table.ledger, &table.alice).await;
    session.focus_game(0).await.unwrap();

    // when
    session.focus_game(1).await.unwrap();

    // then
    assert_eq!(vec![Topic::GameUpdates(0)], table.ledger.cancelled_topics());
    assert_eq!(0, table.ledger.open_handles(Topic::GameUpdates(0)));
    assert_eq!(1, table.ledger.open_handles(Topic::GameUpdates(1)));
    assert_eq!(Some(1), session.watched_game());
    assert_eq!(Some(1), session.state().current_game_id());
}

#[tokio::test]
async fn focus_game__same_game_twice__keeps_single_stream() {
    // given
    let table = arb_table();
    table.ledger.submit_create_game(&table.alice, STAKE).await.unwrap();
    let mut session = session_for(&table.ledger, &table.alice).await;
    session.focus_game(0).await.unwrap();

    // when
    session.focus_game(0).await.unwrap();

    // then
    assert!(table.ledger.cancelled_topics().is_empty());
    assert_eq!(1, table.ledger.open_handles(Topic::GameUpdates(0)));
}

#[tokio::test]
async fn settle__full_match__records_history_status_and_ranking() {
    // given
    let table = arb_table();
    let (mut alice, mut bob) = started_game(&table).await;

    // when
    play_top_row_win(&mut alice, &mut bob).await;
    alice.settle(QUIET).await.unwrap();

    // then
    let state = alice.state();
    let game = state.current_game.as_ref().unwrap();
    assert_eq!(Status::Done, game.status);
    assert_eq!(Some(Symbol::X), game.calculate_winner());
    assert_eq!(table.alice, game.winner);
    let history = game.history.as_ref().unwrap();
    assert_eq!(6, history.len());
    assert!(history[0].iter().all(Option::is_none));
    assert_eq!(game.board, history[5]);
    assert_eq!(1, state.rankings.wins(&table.alice));
    assert_eq!(Decimal::TWO, state.rankings.winnings(&table.alice));
    assert_eq!(0, state.rankings.wins(&table.bob));
}

#[tokio::test]
async fn settle__game_won_redelivered__counts_once() {
    // given
    let table = arb_table();
    let (mut alice, mut bob) = started_game(&table).await;
    play_top_row_win(&mut alice, &mut bob).await;
    alice.settle(QUIET).await.unwrap();

    // when
    table.ledger.redeliver_last(Topic::GameWon);
    table.ledger.redeliver_last(Topic::GameUpdates(0));
    let handled = alice.settle(QUIET).await.unwrap();

    // then
    assert_eq!(2, handled);
    let state = alice.state();
    assert_eq!(1, state.rankings.wins(&table.alice));
    assert_eq!(Decimal::TWO, state.rankings.winnings(&table.alice));
    let history = state.current_game.as_ref().unwrap().history.as_ref().unwrap();
    assert_eq!(6, history.len());
}

#[tokio::test]
async fn settle__focused_game_started__refetches_opponent() {
    // given
    let table = arb_table();
    let mut alice = session_for(&table.ledger, &table.alice).await;
    let id = alice.create_game(STAKE).await.unwrap();
    alice.settle(QUIET).await.unwrap();

    // when
    table.ledger.submit_join_game(&table.bob, id, STAKE).await.unwrap();
    alice.settle(QUIET).await.unwrap();

    // then
    let state = alice.state();
    let game = state.current_game.as_ref().unwrap();
    assert_eq!(Status::Ongoing, game.status);
    assert_eq!(table.bob, game.player_y);
    assert_eq!(Status::Ongoing, state.game(id).unwrap().status);
}

#[tokio::test]
async fn settle__new_game_elsewhere__reloads_game_list() {
    // given
    let table = arb_table();
    let mut alice = session_for(&table.ledger, &table.alice).await;

    // when
    table.ledger.submit_create_game(&table.bob, STAKE).await.unwrap();
    alice.settle(QUIET).await.unwrap();

    // then
    let state = alice.state();
    let game = state.game(0).unwrap();
    assert_eq!(table.bob, game.player_x);
    assert!(game.is_joinable_by(&table.alice));
    assert_eq!(None, state.current_game);
}

#[tokio::test]
async fn settle__unfocused_game_started__lists_opponent() {
    // given
    let table = arb_table();
    let mut owner = session_for(&table.ledger, &table.owner).await;
    table.ledger.submit_create_game(&table.alice, STAKE).await.unwrap();
    owner.settle(QUIET).await.unwrap();

    // when
    table.ledger.submit_join_game(&table.bob, 0, STAKE).await.unwrap();
    owner.settle(QUIET).await.unwrap();

    // then
    let state = owner.state();
    let game = state.game(0).unwrap();
    assert_eq!(Status::Ongoing, game.status);
    assert_eq!(table.bob, game.player_y);
    assert!(game.has_opponent());
    assert_eq!(None, state.current_game);
}

#[tokio::test]
async fn process_next_notification__new_game_elsewhere__lists_it() {
    // given
    let table = arb_table();
    let mut alice = session_for(&table.ledger, &table.alice).await;
    table.ledger.submit_create_game(&table.bob, STAKE).await.unwrap();

    // when
    let processed = alice.process_next_notification().await.unwrap();

    // then
    assert!(processed);
    let state = alice.state();
    assert_eq!(table.bob, state.game(0).unwrap().player_x);
}

#[tokio::test]
async fn focus_game__after_match_played__replays_history_in_order() {
    // given
    let table = arb_table();
    let (mut alice, mut bob) = started_game(&table).await;
    play_top_row_win(&mut alice, &mut bob).await;
    let mut owner = session_for(&table.ledger, &table.owner).await;

    // when
    owner.focus_game(0).await.unwrap();
    owner.settle(QUIET).await.unwrap();

    // then
    let state = owner.state();
    let game = state.current_game.as_ref().unwrap();
    let history = game.history.as_ref().unwrap();
    let filled: Vec<usize> = history
        .iter()
        .map(|board| board.iter().filter(|cell| cell.is_some()).count())
        .collect();
    assert_eq!(vec![0, 1, 2, 3, 4, 5], filled);
    assert_eq!(game.board, history[5]);
    assert_eq!(table.alice, game.winner);
    assert_eq!(Some(Symbol::X), game.calculate_winner());
    assert_eq!(Status::Done, game.status);
}

#[tokio::test]
async fn settle__delivery_error__keeps_stream_open() {
    // given
    let table = arb_table();
    let (mut alice, _bob) = started_game(&table).await;

    // when
    table
        .ledger
        .inject_delivery_error(Topic::GameUpdates(0), "undecodable log");
    alice.player_move(4).await.unwrap();
    let handled = alice.settle(QUIET).await.unwrap();

    // then
    assert_eq!(2, handled);
    assert!(alice.active_topics().contains(&Topic::GameUpdates(0)));
    let state = alice.state();
    let game = state.current_game.as_ref().unwrap();
    assert_eq!(Some(table.alice.clone()), game.board[4]);
    assert_eq!(table.bob, game.whose_turn);
}

#[tokio::test]
async fn handle_inbound__closed_subscription__is_dropped() {
    // given
    let table = arb_table();
    table.ledger.submit_create_game(&table.alice, STAKE).await.unwrap();
    let mut session = session_for(&table.ledger, &table.alice).await;
    session.focus_game(0).await.unwrap();
    let before = session.state();
    let stale = Inbound {
        subscription: 999,
        topic: Topic::GameUpdates(0),
        notification: Ok(Notification {
            position: LogPosition::new(100, 0),
            event: ContractEvent::GameUpdate(GameUpdateEvent {
                game_id: 0,
                board: vec![table.alice.to_string(); 9],
                whose_turn: table.alice.clone(),
                winner: table.alice.clone(),
            }),
        }),
    };

    // when
    session.handle_inbound(stale).await.unwrap();

    // then
    assert_eq!(before, session.state());
}

#[tokio::test]
async fn handle_inbound__delivery_error__leaves_state_unchanged() {
    // given
    let table = arb_table();
    let mut session = session_for(&table.ledger, &table.alice).await;
    let before = session.state();
    let inbound = Inbound {
        subscription: 0,
        topic: Topic::NewGames,
        notification: Err(DeliveryError("bad topic".to_string())),
    };

    // when
    session.handle_inbound(inbound).await.unwrap();

    // then
    assert_eq!(before, session.state());
}

#[tokio::test]
async fn watch_game_won__ledger_unavailable__returns_connection_error() {
    // given
    let table = arb_table();
    table.ledger.set_available(false);
    let (inbound, _receiver) = mpsc::unbounded_channel();
    let mut manager =
        SubscriptionManager::new(Arc::new(table.ledger.clone()), inbound, FromBlock::Latest);

    // when
    let result = manager.watch_game_won().await;

    // then
    assert!(matches!(result, Err(Error::Connection(_))));
    assert!(manager.active_topics().is_empty());
}

#[tokio::test]
async fn run__poll_tick__picks_up_balance_changes() {
    // given
    let table = arb_table();
    let mut session = session_for(&table.ledger, &table.alice).await;
    table.ledger.set_balance(&table.alice, 42);

    // when
    let run_state = session.run(pending()).await.unwrap();

    // then
    assert_eq!(RunState::Continue, run_state);
    let expected = Account {
        address: table.alice.clone(),
        balance: 42,
    };
    assert!(session.state().accounts.contains(&expected));
    assert_eq!(Some(table.alice), session.state().default_account);
}

#[tokio::test]
async fn run__interrupt__exits() {
    // given
    let table = arb_table();
    let mut session = session_for(&table.ledger, &table.alice).await;

    // when
    let run_state = session.run(async {}).await.unwrap();

    // then
    assert_eq!(RunState::Exit, run_state);
}

#[tokio::test]
async fn player_move__cell_out_of_range__is_rejected_locally() {
    // given
    let table = arb_table();
    let (mut alice, _bob) = started_game(&table).await;

    // when
    let result = alice.player_move(9).await;

    // then
    assert!(matches!(
        result,
        Err(Error::Validation(ValidationError::CellIndex(9)))
    ));
}

#[tokio::test]
async fn join_game__own_game__is_rejected() {
    // given
    let table = arb_table();
    let mut alice = session_for(&table.ledger, &table.alice).await;
    let id = alice.create_game(STAKE).await.unwrap();

    // when
    let result = alice.join_game(id).await;

    // then
    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::Rejected(_)))
    ));
}

#[tokio::test]
async fn withdraw__commissions_enabled__pays_owner_the_fee() {
    // given
    let table = arb_table();
    let mut owner = session_for(&table.ledger, &table.owner).await;
    owner.enable_commissions(10).await.unwrap();
    let (mut alice, mut bob) = started_game(&table).await;
    play_top_row_win(&mut alice, &mut bob).await;
    alice.settle(QUIET).await.unwrap();

    // when
    let withdrawn = owner.withdraw().await.unwrap();

    // then
    assert_eq!(STAKE / 5, withdrawn);
    assert_eq!(0, owner.contract_balance().await.unwrap());
    let state = alice.state();
    assert_eq!(Decimal::new(18, 1), state.rankings.winnings(&table.alice));
    let game = state.current_game.as_ref().unwrap();
    assert_eq!(Some(10), game.fee);
    assert_eq!(Some(Decimal::new(2, 1)), game.commission());
}

#[tokio::test]
async fn quit_game__during_betting__marks_game_done() {
    // given
    let table = arb_table();
    let mut alice = session_for(&table.ledger, &table.alice).await;
    let id = alice.create_game(STAKE).await.unwrap();

    // when
    alice.quit_game().await.unwrap();

    // then
    let state = alice.state();
    assert_eq!(Status::Done, state.game(id).unwrap().status);
    assert!(state.current_game.as_ref().unwrap().is_game_over());
}

#[tokio::test]
async fn snapshots__state_change__is_published() {
    // given
    let table = arb_table();
    let mut session = Session::new(Arc::new(table.ledger.clone()), SessionConfig::default());
    let mut snapshots = session.snapshots();

    // when
    session.start().await.unwrap();

    // then
    assert!(snapshots.has_changed().unwrap());
    let published = snapshots.borrow_and_update().clone();
    assert_eq!(session.state(), published);
}

#[tokio::test]
async fn submit_player_move__winning_move__logs_update_then_win_in_one_block() {
    // given
    let table = arb_table();
    let (mut alice, mut bob) = started_game(&table).await;
    for (x_cell, o_cell) in [(0, 3), (1, 4)] {
        alice.player_move(x_cell).await.unwrap();
        bob.player_move(o_cell).await.unwrap();
    }

    // when
    let receipt = table
        .ledger
        .submit_player_move(&table.alice, 0, 2)
        .await
        .unwrap();

    // then
    assert_eq!(2, receipt.logs.len());
    let mut won = table
        .ledger
        .subscribe(Topic::GameWon, FromBlock::Genesis)
        .await
        .unwrap();
    let notification = won.next_notification().await.unwrap().unwrap();
    assert_eq!(LogPosition::new(receipt.block_number, 1), notification.position);
    won.cancel();
}
