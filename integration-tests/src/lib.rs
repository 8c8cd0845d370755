//! Shared fixtures for end-to-end session tests against the in-memory ledger.
use game_sync::{
    app::{
        Session,
        SessionConfig,
        in_memory_ledger::InMemoryLedger,
    },
    events::Address,
    units::ether_to_wei,
};
use std::{
    sync::Arc,
    time::Duration,
};

pub const QUIET: Duration = Duration::from_millis(20);

pub const STARTING_BALANCE_ETHER: u64 = 100;

pub type LedgerSession = Session<InMemoryLedger>;

/// A ledger with three funded accounts (owner, alice, bob) and a started
/// session for each.
pub struct TestContext {
    ledger: InMemoryLedger,
    owner: LedgerSession,
    alice: LedgerSession,
    bob: LedgerSession,
}

impl TestContext {
    pub async fn new() -> Self {
        let ledger =
            InMemoryLedger::with_funded_accounts(3, ether_to_wei(STARTING_BALANCE_ETHER));
        let addresses = ledger.addresses();
        let owner = Self::open(&ledger, &addresses[0]).await;
        let alice = Self::open(&ledger, &addresses[1]).await;
        let bob = Self::open(&ledger, &addresses[2]).await;
        tracing::debug!("test context ready");
        Self {
            ledger,
            owner,
            alice,
            bob,
        }
    }

    async fn open(ledger: &InMemoryLedger, account: &Address) -> LedgerSession {
        let mut session =
            Session::new(Arc::new(ledger.clone()), SessionConfig::default());
        session.start().await.expect("session should start");
        session.select_account(account.clone());
        session
    }

    pub fn ledger(&self) -> &InMemoryLedger {
        &self.ledger
    }

    pub fn owner(&mut self) -> &mut LedgerSession {
        &mut self.owner
    }

    pub fn alice(&mut self) -> &mut LedgerSession {
        &mut self.alice
    }

    pub fn bob(&mut self) -> &mut LedgerSession {
        &mut self.bob
    }

    pub fn alice_address(&self) -> Address {
        self.ledger.addresses()[1].clone()
    }

    pub fn bob_address(&self) -> Address {
        self.ledger.addresses()[2].clone()
    }

    /// Let every session apply what the ledger has sent so far.
    pub async fn settle_all(&mut self) {
        for session in [&mut self.owner, &mut self.alice, &mut self.bob] {
            session.settle(QUIET).await.expect("notifications should apply");
        }
    }

    /// Alice stakes `bet_ether`, Bob matches it; returns the game id.
    pub async fn start_game(&mut self, bet_ether: u64) -> u64 {
        let id = self
            .alice
            .create_game(ether_to_wei(bet_ether))
            .await
            .expect("create should succeed");
        self.settle_all().await;
        self.bob.join_game(id).await.expect("join should succeed");
        self.settle_all().await;
        id
    }

    /// Plays alternating moves, X first.
    pub async fn play(&mut self, cells: &[usize]) {
        for (turn, cell) in cells.iter().enumerate() {
            let session = if turn % 2 == 0 {
                &mut self.alice
            } else {
                &mut self.bob
            };
            session.player_move(*cell).await.expect("move should succeed");
        }
        self.settle_all().await;
    }

    pub async fn shutdown(self) {
        self.owner.shutdown().await;
        self.alice.shutdown().await;
        self.bob.shutdown().await;
    }
}
