// Local tic-tac-toe betting contract behind the `Transport` trait, for tests and demos.
use crate::{
    DeliveryError,
    Error,
    Result,
    TransportError,
    app::transport::{
        EventHandle,
        FromBlock,
        Topic,
        Transport,
    },
    events::{
        Account,
        Address,
        ContractEvent,
        GameId,
        GameStartedEvent,
        GameTuple,
        GameUpdateEvent,
        GameWonEvent,
        LogPosition,
        NewGameEvent,
        Notification,
        Receipt,
        ZERO_ADDRESS,
    },
    game::{
        BOARD_SIZE,
        MAX_FEE_PERCENT,
    },
};
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
};
use tokio::sync::mpsc;

const WINNING_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

const BETTING: u8 = 0;
const ONGOING: u8 = 1;
const DONE: u8 = 2;

type Delivery = std::result::Result<Notification, DeliveryError>;

#[derive(Debug, Clone)]
struct LedgerGame {
    player_x: Address,
    player_y: Option<Address>,
    bet: u128,
    status: u8,
    fee: u8,
    board: [Option<Address>; BOARD_SIZE],
    whose_turn: Address,
    winner: Option<Address>,
}

impl LedgerGame {
    fn to_tuple(&self, id: GameId) -> GameTuple {
        GameTuple {
            id: Some(id),
            player_x: self.player_x.clone(),
            player_y: self.player_y.clone().unwrap_or_else(Address::zero),
            bet: Some(self.bet),
            status_code: self.status,
            fee_code: Some(self.fee),
            board: self.board_cells(),
            winner: self.winner.clone().unwrap_or_else(Address::zero),
        }
    }

    fn board_cells(&self) -> Vec<String> {
        self.board
            .iter()
            .map(|cell| match cell {
                Some(owner) => owner.to_string(),
                None => ZERO_ADDRESS.to_string(),
            })
            .collect()
    }

    fn has_line(&self, player: &Address) -> bool {
        WINNING_LINES.iter().any(|line| {
            line.iter()
                .all(|index| self.board[*index].as_ref() == Some(player))
        })
    }

    fn opponent_of(&self, player: &Address) -> Option<Address> {
        if *player == self.player_x {
            self.player_y.clone()
        } else {
            Some(self.player_x.clone())
        }
    }

    fn update_event(&self, game_id: GameId) -> ContractEvent {
        ContractEvent::GameUpdate(GameUpdateEvent {
            game_id,
            board: self.board_cells(),
            whose_turn: self.whose_turn.clone(),
            winner: self.winner.clone().unwrap_or_else(Address::zero),
        })
    }

    fn pot(&self) -> u128 {
        self.bet * 2
    }

    fn commission(&self) -> u128 {
        self.pot() * u128::from(self.fee) / 100
    }
}

struct Subscriber {
    id: u64,
    topic: Topic,
    sender: mpsc::UnboundedSender<Delivery>,
}

struct Ledger {
    owner: Address,
    fee: u8,
    commissions_enabled: bool,
    commission_balance: u128,
    accounts: Vec<Account>,
    games: Vec<LedgerGame>,
    block_number: u64,
    logs: Vec<Notification>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
    cancelled: Vec<Topic>,
    available: bool,
}

fn topic_of(event: &ContractEvent) -> Topic {
    match event {
        ContractEvent::NewGame(_) => Topic::NewGames,
        ContractEvent::GameStarted(_) => Topic::GameStarted,
        ContractEvent::GameUpdate(update) => Topic::GameUpdates(update.game_id),
        ContractEvent::GameWon(_) => Topic::GameWon,
    }
}

fn rejected(reason: &str) -> Error {
    TransportError::Rejected(reason.to_string()).into()
}

impl Ledger {
    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(TransportError::Unavailable.into())
        }
    }

    fn ensure_owner(&self, from: &Address) -> Result<()> {
        if *from == self.owner {
            Ok(())
        } else {
            Err(rejected("only the contract owner may do this"))
        }
    }

    fn account_mut(&mut self, address: &Address) -> Result<&mut Account> {
        self.accounts
            .iter_mut()
            .find(|account| account.address == *address)
            .ok_or_else(|| rejected("unknown account"))
    }

    fn debit(&mut self, address: &Address, amount: u128) -> Result<()> {
        let account = self.account_mut(address)?;
        account.balance = account
            .balance
            .checked_sub(amount)
            .ok_or_else(|| rejected("insufficient funds"))?;
        Ok(())
    }

    fn credit(&mut self, address: &Address, amount: u128) {
        if let Ok(account) = self.account_mut(address) {
            account.balance += amount;
        }
    }

    fn game_mut(&mut self, id: GameId) -> Result<&mut LedgerGame> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.games.get_mut(index))
            .ok_or(Error::Transport(TransportError::UnknownGame(id)))
    }

    fn emit(&mut self, events: Vec<ContractEvent>) -> Result<Receipt> {
        u32::try_from(events.len()).map_err(|_| rejected("too many logs in one block"))?;
        self.block_number += 1;
        let block_number = self.block_number;
        for (event, log_index) in events.iter().zip(0u32..) {
            let notification = Notification {
                position: LogPosition::new(block_number, log_index),
                event: event.clone(),
            };
            let topic = topic_of(event);
            self.subscribers.retain(|subscriber| {
                subscriber.topic != topic
                    || subscriber.sender.send(Ok(notification.clone())).is_ok()
            });
            self.logs.push(notification);
        }
        Ok(Receipt {
            block_number,
            logs: events,
        })
    }

    /// Pays out a finished game and returns the winnings.
    fn settle_win(&mut self, id: GameId, winner: &Address) -> Result<u128> {
        let game = self.game_mut(id)?;
        game.status = DONE;
        game.winner = Some(winner.clone());
        let commission = game.commission();
        let winnings = game.pot() - commission;
        self.commission_balance += commission;
        self.credit(winner, winnings);
        Ok(winnings)
    }

    fn settle_draw(&mut self, id: GameId) -> Result<()> {
        let game = self.game_mut(id)?;
        game.status = DONE;
        let refund = (game.pot() - game.commission()) / 2;
        let kept = game.pot() - refund * 2;
        let players = [Some(game.player_x.clone()), game.player_y.clone()];
        self.commission_balance += kept;
        for player in players.into_iter().flatten() {
            self.credit(&player, refund);
        }
        Ok(())
    }

    fn create_game(&mut self, from: &Address, amount: u128) -> Result<Receipt> {
        self.ensure_available()?;
        self.debit(from, amount)?;
        let fee = if self.commissions_enabled { self.fee } else { 0 };
        let game_id = self.games.len() as GameId;
        self.games.push(LedgerGame {
            player_x: from.clone(),
            player_y: None,
            bet: amount,
            status: BETTING,
            fee,
            board: Default::default(),
            whose_turn: from.clone(),
            winner: None,
        });
        self.emit(vec![ContractEvent::NewGame(NewGameEvent { game_id })])
    }

    fn join_game(&mut self, from: &Address, id: GameId, amount: u128) -> Result<Receipt> {
        self.ensure_available()?;
        let game = self.game_mut(id)?;
        if game.status != BETTING {
            return Err(rejected("game is not open for bets"));
        }
        if game.player_x == *from {
            return Err(rejected("cannot join your own game"));
        }
        if game.bet != amount {
            return Err(rejected("bet must match the creator's stake"));
        }
        self.debit(from, amount)?;
        let game = self.game_mut(id)?;
        game.player_y = Some(from.clone());
        game.status = ONGOING;
        game.whose_turn = game.player_x.clone();
        self.emit(vec![ContractEvent::GameStarted(GameStartedEvent {
            game_id: id,
        })])
    }

    fn player_move(&mut self, from: &Address, id: GameId, cell: usize) -> Result<Receipt> {
        self.ensure_available()?;
        let game = self.game_mut(id)?;
        if game.status != ONGOING {
            return Err(rejected("game is not ongoing"));
        }
        if game.whose_turn != *from {
            return Err(rejected("not your turn"));
        }
        let slot = game
            .board
            .get_mut(cell)
            .ok_or_else(|| rejected("cell index out of range"))?;
        if slot.is_some() {
            return Err(rejected("cell already taken"));
        }
        *slot = Some(from.clone());
        if let Some(next) = game.opponent_of(from) {
            game.whose_turn = next;
        }
        let won = game.has_line(from);
        let full = game.board.iter().all(Option::is_some);

        let mut logs = Vec::new();
        if won {
            let winnings = self.settle_win(id, from)?;
            let game = self.game_mut(id)?;
            logs.push(game.update_event(id));
            logs.push(ContractEvent::GameWon(GameWonEvent {
                game_id: Some(id),
                winner: from.clone(),
                winnings,
            }));
        } else {
            if full {
                self.settle_draw(id)?;
            }
            let game = self.game_mut(id)?;
            logs.push(game.update_event(id));
        }
        self.emit(logs)
    }

    fn quit_game(&mut self, from: &Address, id: GameId) -> Result<Receipt> {
        self.ensure_available()?;
        let game = self.game_mut(id)?;
        match game.status {
            BETTING if game.player_x == *from => {
                let refund = game.bet;
                game.status = DONE;
                let event = game.update_event(id);
                self.credit(from, refund);
                self.emit(vec![event])
            }
            ONGOING if game.player_x == *from || game.player_y.as_ref() == Some(from) => {
                let winner = game
                    .opponent_of(from)
                    .ok_or_else(|| rejected("game has no opponent"))?;
                let winnings = self.settle_win(id, &winner)?;
                let game = self.game_mut(id)?;
                let update = game.update_event(id);
                self.emit(vec![
                    update,
                    ContractEvent::GameWon(GameWonEvent {
                        game_id: Some(id),
                        winner,
                        winnings,
                    }),
                ])
            }
            _ => Err(rejected("game cannot be quit by this account")),
        }
    }

    fn withdraw(&mut self, from: &Address) -> Result<Receipt> {
        self.ensure_available()?;
        self.ensure_owner(from)?;
        if self.commission_balance == 0 {
            return Err(rejected("no funds to withdraw"));
        }
        let amount = std::mem::take(&mut self.commission_balance);
        self.credit(from, amount);
        self.emit(Vec::new())
    }

    fn set_fee(&mut self, from: &Address, fee: u8) -> Result<Receipt> {
        self.ensure_available()?;
        self.ensure_owner(from)?;
        if fee > MAX_FEE_PERCENT {
            return Err(rejected("fee must be between 0 and 20"));
        }
        self.fee = fee;
        self.emit(Vec::new())
    }

    fn set_commissions(&mut self, from: &Address, enabled: bool) -> Result<Receipt> {
        self.ensure_available()?;
        self.ensure_owner(from)?;
        self.commissions_enabled = enabled;
        if !enabled {
            self.fee = 0;
        }
        self.emit(Vec::new())
    }

    fn subscribe(
        &mut self,
        topic: Topic,
        from: FromBlock,
        ledger: &Arc<Mutex<Ledger>>,
    ) -> Result<InMemoryHandle> {
        if !self.available {
            return Err(Error::Connection("ledger node unavailable".to_string()));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        if from == FromBlock::Genesis {
            for log in self.logs.iter().filter(|log| topic_of(&log.event) == topic) {
                let _ = sender.send(Ok(log.clone()));
            }
        }
        let id = self.next_subscriber;
        self.next_subscriber += 1;
        self.subscribers.push(Subscriber { id, topic, sender });
        Ok(InMemoryHandle {
            id,
            topic,
            receiver,
            ledger: ledger.clone(),
            cancelled: false,
        })
    }
}

/// In-process ledger with a tic-tac-toe betting contract.
///
/// The first account is the contract owner.
#[derive(Clone)]
pub struct InMemoryLedger {
    inner: Arc<Mutex<Ledger>>,
}

impl InMemoryLedger {
    pub fn new(accounts: Vec<Account>) -> Self {
        let owner = accounts
            .first()
            .map(|account| account.address.clone())
            .unwrap_or_else(Address::zero);
        let ledger = Ledger {
            owner,
            fee: 0,
            commissions_enabled: false,
            commission_balance: 0,
            accounts,
            games: Vec::new(),
            block_number: 0,
            logs: Vec::new(),
            subscribers: Vec::new(),
            next_subscriber: 0,
            cancelled: Vec::new(),
            available: true,
        };
        Self {
            inner: Arc::new(Mutex::new(ledger)),
        }
    }

    /// `count` accounts with deterministic addresses, each holding `balance` wei.
    pub fn with_funded_accounts(count: u8, balance: u128) -> Self {
        let accounts = (1..=count)
            .map(|seed| Account {
                address: Address::new(format!("0x{}", hex::encode([seed; 20]))),
                balance,
            })
            .collect();
        Self::new(accounts)
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        // Poisoning is ignored; the ledger state stays consistent per call.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.lock()
            .accounts
            .iter()
            .map(|account| account.address.clone())
            .collect()
    }

    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Topics whose handles were cancelled, in cancellation order.
    pub fn cancelled_topics(&self) -> Vec<Topic> {
        self.lock().cancelled.clone()
    }

    pub fn open_handles(&self, topic: Topic) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|subscriber| subscriber.topic == topic && !subscriber.sender.is_closed())
            .count()
    }

    /// Push an undecodable notification to every handle on `topic`.
    pub fn inject_delivery_error(&self, topic: Topic, reason: &str) {
        let ledger = self.lock();
        for subscriber in ledger.subscribers.iter().filter(|s| s.topic == topic) {
            let _ = subscriber.sender.send(Err(DeliveryError(reason.to_string())));
        }
    }

    /// Deliver the latest log on `topic` again, as an at-least-once node might.
    pub fn redeliver_last(&self, topic: Topic) {
        let ledger = self.lock();
        let Some(last) = ledger
            .logs
            .iter()
            .rev()
            .find(|log| topic_of(&log.event) == topic)
        else {
            return;
        };
        for subscriber in ledger.subscribers.iter().filter(|s| s.topic == topic) {
            let _ = subscriber.sender.send(Ok(last.clone()));
        }
    }

    /// Change an account balance outside of any game, e.g. an external transfer.
    pub fn set_balance(&self, address: &Address, balance: u128) {
        let mut ledger = self.lock();
        if let Ok(account) = ledger.account_mut(address) {
            account.balance = balance;
        }
    }
}

pub struct InMemoryHandle {
    id: u64,
    topic: Topic,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    ledger: Arc<Mutex<Ledger>>,
    cancelled: bool,
}

impl EventHandle for InMemoryHandle {
    async fn next_notification(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.receiver.close();
        let mut ledger = self
            .ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ledger.subscribers.retain(|subscriber| subscriber.id != self.id);
        ledger.cancelled.push(self.topic);
    }
}

impl Transport for InMemoryLedger {
    type Handle = InMemoryHandle;

    async fn fetch_game_count(&self) -> Result<u64> {
        let ledger = self.lock();
        ledger.ensure_available()?;
        Ok(ledger.games.len() as u64)
    }

    async fn fetch_game(&self, id: GameId) -> Result<GameTuple> {
        let ledger = self.lock();
        ledger.ensure_available()?;
        usize::try_from(id)
            .ok()
            .and_then(|index| ledger.games.get(index))
            .map(|game| game.to_tuple(id))
            .ok_or(Error::Transport(TransportError::UnknownGame(id)))
    }

    async fn submit_create_game(&self, from: &Address, amount: u128) -> Result<Receipt> {
        self.lock().create_game(from, amount)
    }

    async fn submit_join_game(
        &self,
        from: &Address,
        id: GameId,
        amount: u128,
    ) -> Result<Receipt> {
        self.lock().join_game(from, id, amount)
    }

    async fn submit_player_move(
        &self,
        from: &Address,
        id: GameId,
        cell: usize,
    ) -> Result<Receipt> {
        self.lock().player_move(from, id, cell)
    }

    async fn submit_quit_game(&self, from: &Address, id: GameId) -> Result<Receipt> {
        self.lock().quit_game(from, id)
    }

    async fn submit_withdraw(&self, from: &Address) -> Result<Receipt> {
        self.lock().withdraw(from)
    }

    async fn submit_set_fee(&self, from: &Address, fee: u8) -> Result<Receipt> {
        self.lock().set_fee(from, fee)
    }

    async fn submit_enable_commissions(&self, from: &Address) -> Result<Receipt> {
        self.lock().set_commissions(from, true)
    }

    async fn submit_disable_commissions(&self, from: &Address) -> Result<Receipt> {
        self.lock().set_commissions(from, false)
    }

    async fn subscribe(&self, topic: Topic, from: FromBlock) -> Result<InMemoryHandle> {
        self.lock().subscribe(topic, from, &self.inner)
    }

    async fn fetch_accounts(&self) -> Result<Vec<Account>> {
        let ledger = self.lock();
        ledger.ensure_available()?;
        Ok(ledger.accounts.clone())
    }

    async fn fetch_owner(&self) -> Result<Address> {
        let ledger = self.lock();
        ledger.ensure_available()?;
        Ok(ledger.owner.clone())
    }

    async fn fetch_fee(&self) -> Result<u8> {
        let ledger = self.lock();
        ledger.ensure_available()?;
        Ok(ledger.fee)
    }

    async fn fetch_commissions_enabled(&self) -> Result<bool> {
        let ledger = self.lock();
        ledger.ensure_available()?;
        Ok(ledger.commissions_enabled)
    }

    async fn fetch_contract_balance(&self) -> Result<u128> {
        let ledger = self.lock();
        ledger.ensure_available()?;
        Ok(ledger.commission_balance)
    }
}
