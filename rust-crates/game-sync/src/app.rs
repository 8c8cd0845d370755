use crate::{
    Error,
    Result,
    TransportError,
    ValidationError,
    app::{
        subscriptions::{
            Inbound,
            SubscriptionManager,
        },
        transport::{
            FromBlock,
            Topic,
            Transport,
        },
    },
    events::{
        Address,
        Event,
        GameId,
        GameTuple,
    },
    game::BOARD_SIZE,
    reducer::{
        FollowUp,
        Store,
    },
    snapshot::ApplicationState,
};
use std::{
    future::Future,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        watch,
    },
    time::{
        self,
        Interval,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

pub mod in_memory_ledger;
pub mod subscriptions;
pub mod transport;

#[cfg(test)]
mod tests;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Log to stderr, filtered by `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How often the account list is re-read.
    pub poll_interval: Duration,
    pub game_started_from: FromBlock,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            game_started_from: FromBlock::Latest,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Continue,
    Exit,
}

/// One client's connection to the ledger: the store, the open event streams and the
/// actions a player can take.
///
/// All inbound notifications, poll results and action outcomes go through
/// [`Store::apply`] one at a time, in arrival order.
pub struct Session<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    store: Store,
    subscriptions: SubscriptionManager<T>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    poll: Option<Interval>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: Arc<T>, config: SessionConfig) -> Self {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let subscriptions = SubscriptionManager::new(
            transport.clone(),
            inbound_tx,
            config.game_started_from,
        );
        Self {
            transport,
            config,
            store: Store::default(),
            subscriptions,
            inbound,
            poll: None,
        }
    }

    /// Load the initial view and open the session-wide event streams.
    pub async fn start(&mut self) -> Result<()> {
        info!("starting session");
        self.refresh_accounts().await?;
        self.fetch_games().await?;
        self.subscriptions.watch_new_games().await?;
        self.subscriptions.watch_game_started().await?;
        self.refresh_contract_metadata().await?;
        self.subscriptions.watch_game_won().await?;
        Ok(())
    }

    pub fn state(&self) -> Arc<ApplicationState> {
        self.store.state()
    }

    pub fn snapshots(&self) -> watch::Receiver<Arc<ApplicationState>> {
        self.store.subscribe()
    }

    pub fn active_topics(&self) -> Vec<Topic> {
        self.subscriptions.active_topics()
    }

    pub fn watched_game(&self) -> Option<GameId> {
        self.subscriptions.watched_game()
    }

    pub async fn fetch_games(&mut self) -> Result<()> {
        let tuples = self.load_games().await?;
        debug!(count = tuples.len(), "fetched games");
        self.store.apply(&Event::GamesFetched(tuples));
        Ok(())
    }

    /// Make `id` the focused game and follow its board updates.
    pub async fn focus_game(&mut self, id: GameId) -> Result<()> {
        self.refresh_game(id).await?;
        self.subscriptions.watch_current_game_updates(id).await
    }

    pub async fn refresh_game(&mut self, id: GameId) -> Result<()> {
        let tuple = self.transport.fetch_game(id).await?;
        self.store.apply(&Event::GameFetched(tuple));
        Ok(())
    }

    pub async fn create_game(&mut self, amount: u128) -> Result<GameId> {
        let from = self.require_account()?;
        info!(%from, amount, "creating game");
        let receipt = self.transport.submit_create_game(&from, amount).await?;
        let id = receipt.created_game_id().ok_or_else(|| {
            TransportError::Rejected("receipt carries no new game".to_string())
        })?;
        self.fetch_games().await?;
        self.focus_game(id).await?;
        Ok(id)
    }

    pub async fn join_game(&mut self, id: GameId) -> Result<()> {
        let from = self.require_account()?;
        let state = self.state();
        let game = state.game(id).ok_or(TransportError::UnknownGame(id))?;
        if !game.is_joinable_by(&from) {
            return Err(TransportError::Rejected(format!(
                "game {id} cannot be joined by {from}"
            ))
            .into());
        }
        let bet = game.bet.unwrap_or_default();
        info!(%from, id, bet, "joining game");
        self.transport.submit_join_game(&from, id, bet).await?;
        self.fetch_games().await?;
        self.focus_game(id).await
    }

    /// Claim `cell` in the focused game. The board changes once the ledger's
    /// update notification arrives.
    pub async fn player_move(&mut self, cell: usize) -> Result<()> {
        let from = self.require_account()?;
        let id = self.require_focused_game()?;
        if cell >= BOARD_SIZE {
            return Err(ValidationError::CellIndex(cell).into());
        }
        info!(%from, id, cell, "making move");
        self.transport.submit_player_move(&from, id, cell).await?;
        Ok(())
    }

    pub async fn quit_game(&mut self) -> Result<()> {
        let from = self.require_account()?;
        let id = self.require_focused_game()?;
        info!(%from, id, "quitting game");
        self.transport.submit_quit_game(&from, id).await?;
        self.refresh_game(id).await
    }

    /// Collect the contract's commission balance; returns the amount withdrawn.
    pub async fn withdraw(&mut self) -> Result<u128> {
        let from = self.require_account()?;
        let balance = self.transport.fetch_contract_balance().await?;
        self.transport.submit_withdraw(&from).await?;
        info!(%from, balance, "withdrew commissions");
        Ok(balance)
    }

    pub async fn contract_balance(&self) -> Result<u128> {
        self.transport.fetch_contract_balance().await
    }

    pub async fn enable_commissions(&mut self, fee: u8) -> Result<()> {
        let from = self.require_account()?;
        self.transport.submit_set_fee(&from, fee).await?;
        self.transport.submit_enable_commissions(&from).await?;
        self.store
            .apply(&Event::CommissionsChanged { enabled: true, fee });
        Ok(())
    }

    pub async fn disable_commissions(&mut self) -> Result<()> {
        let from = self.require_account()?;
        self.transport.submit_disable_commissions(&from).await?;
        self.store.apply(&Event::CommissionsChanged {
            enabled: false,
            fee: 0,
        });
        Ok(())
    }

    pub async fn refresh_contract_metadata(&mut self) -> Result<()> {
        let owner = self.transport.fetch_owner().await?;
        let fee = self.transport.fetch_fee().await?;
        let enabled = self.transport.fetch_commissions_enabled().await?;
        self.store.apply(&Event::OwnerFetched(owner));
        self.store
            .apply(&Event::CommissionsChanged { enabled, fee });
        Ok(())
    }

    pub async fn refresh_accounts(&mut self) -> Result<()> {
        let accounts = self.subscriptions.poll_accounts().await?;
        self.store.apply(&Event::AccountsFetched(accounts));
        Ok(())
    }

    pub fn select_account(&mut self, address: Address) {
        self.store.apply(&Event::AccountSelected(address));
    }

    /// Apply one event stream notification, waiting for it if none is queued.
    ///
    /// Returns `false` once no stream can deliver anything anymore.
    pub async fn process_next_notification(&mut self) -> Result<bool> {
        match self.inbound.recv().await {
            Some(inbound) => {
                self.handle_inbound(inbound).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply notifications until none arrives for `quiet`; returns how many were
    /// handled.
    pub async fn settle(&mut self, quiet: Duration) -> Result<usize> {
        let mut handled = 0;
        while let Ok(Some(inbound)) = time::timeout(quiet, self.inbound.recv()).await {
            self.handle_inbound(inbound).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Serve notifications and the account poll until `interrupt` resolves.
    pub async fn run(&mut self, interrupt: impl Future<Output = ()>) -> Result<RunState> {
        let poll_interval = self.config.poll_interval;
        let poll = self.poll.get_or_insert_with(|| {
            let mut ticker = time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        tokio::select! {
            biased;
            _ = interrupt => Ok(RunState::Exit),
            inbound = self.inbound.recv() => match inbound {
                Some(inbound) => {
                    if let Err(err) = self.handle_inbound(inbound).await {
                        warn!(?err, "failed to handle notification");
                    }
                    Ok(RunState::Continue)
                }
                None => Ok(RunState::Exit),
            },
            _ = poll.tick() => {
                if let Err(err) = self.refresh_accounts().await {
                    warn!(?err, "account poll failed");
                }
                Ok(RunState::Continue)
            }
        }
    }

    pub async fn shutdown(mut self) {
        self.subscriptions.shutdown().await;
        info!("session closed");
    }

    async fn handle_inbound(&mut self, inbound: Inbound) -> Result<()> {
        let Inbound {
            subscription,
            topic,
            notification,
        } = inbound;
        if !self.subscriptions.is_active(subscription) {
            debug!(subscription, ?topic, "dropping notification from closed stream");
            return Ok(());
        }
        let notification = match notification {
            Ok(notification) => notification,
            Err(err) => {
                warn!(%err, ?topic, "discarding undeliverable notification");
                return Ok(());
            }
        };
        debug!(
            ?topic,
            game_id = ?notification.event.game_id(),
            position = ?notification.position,
            "notification"
        );
        let follow_ups = self.store.apply(&Event::from(notification));
        for follow_up in follow_ups {
            match follow_up {
                FollowUp::RefetchGames => self.fetch_games().await?,
                FollowUp::RefetchGame(id) => self.refresh_game(id).await?,
            }
        }
        Ok(())
    }

    async fn load_games(&self) -> Result<Vec<GameTuple>> {
        let count = self.transport.fetch_game_count().await?;
        let mut tuples = Vec::new();
        for id in 0..count {
            tuples.push(self.transport.fetch_game(id).await?);
        }
        Ok(tuples)
    }

    fn require_account(&self) -> Result<Address> {
        self.store
            .default_account()
            .ok_or_else(|| TransportError::Rejected("no account selected".to_string()).into())
    }

    fn require_focused_game(&self) -> Result<GameId> {
        self.state()
            .current_game_id()
            .ok_or_else(|| Error::from(TransportError::Rejected("no game in focus".to_string())))
    }
}
