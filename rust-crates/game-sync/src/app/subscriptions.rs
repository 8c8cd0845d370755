use crate::{
    DeliveryError,
    Error,
    Result,
    app::transport::{
        EventHandle,
        FromBlock,
        Topic,
        Transport,
    },
    events::{
        Account,
        GameId,
        Notification,
    },
};
use std::sync::Arc;
use tokio::{
    sync::{
        mpsc,
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{
    debug,
    info,
    warn,
};

pub type SubscriptionId = u64;

/// A notification as forwarded from one open handle.
#[derive(Debug)]
pub struct Inbound {
    pub subscription: SubscriptionId,
    pub topic: Topic,
    pub notification: Result<Notification, DeliveryError>,
}

struct ActiveSubscription {
    id: SubscriptionId,
    topic: Topic,
    stop: oneshot::Sender<()>,
    pump: JoinHandle<()>,
}

impl ActiveSubscription {
    /// Stops the pump and waits until it has cancelled the transport handle.
    async fn close(self) {
        let ActiveSubscription {
            id,
            topic,
            stop,
            pump,
        } = self;
        let _ = stop.send(());
        if let Err(err) = pump.await {
            warn!(?err, id, ?topic, "subscription pump ended abnormally");
        }
        info!(id, ?topic, "stopped watching");
    }
}

/// Owns every open event stream of a session.
///
/// Session-wide streams (new games, game started, game won) are opened at most
/// once. The per-game update stream follows the focused game: opening it for a
/// new game first closes the previous one, so there is never more than one.
pub struct SubscriptionManager<T: Transport> {
    transport: Arc<T>,
    inbound: mpsc::UnboundedSender<Inbound>,
    game_started_from: FromBlock,
    next_id: SubscriptionId,
    new_games: Option<ActiveSubscription>,
    game_started: Option<ActiveSubscription>,
    game_won: Option<ActiveSubscription>,
    current_game: Option<ActiveSubscription>,
}

impl<T: Transport> SubscriptionManager<T> {
    pub fn new(
        transport: Arc<T>,
        inbound: mpsc::UnboundedSender<Inbound>,
        game_started_from: FromBlock,
    ) -> Self {
        Self {
            transport,
            inbound,
            game_started_from,
            next_id: 0,
            new_games: None,
            game_started: None,
            game_won: None,
            current_game: None,
        }
    }

    pub async fn watch_new_games(&mut self) -> Result<()> {
        if self.new_games.is_none() {
            let active = self.open(Topic::NewGames, FromBlock::Genesis).await?;
            self.new_games = Some(active);
        }
        Ok(())
    }

    pub async fn watch_game_started(&mut self) -> Result<()> {
        if self.game_started.is_none() {
            let active = self.open(Topic::GameStarted, self.game_started_from).await?;
            self.game_started = Some(active);
        }
        Ok(())
    }

    pub async fn watch_game_won(&mut self) -> Result<()> {
        if self.game_won.is_none() {
            let active = self.open(Topic::GameWon, FromBlock::Genesis).await?;
            self.game_won = Some(active);
        }
        Ok(())
    }

    /// Follow board updates of `game_id`, replacing any stream for another game.
    pub async fn watch_current_game_updates(&mut self, game_id: GameId) -> Result<()> {
        let topic = Topic::GameUpdates(game_id);
        if self
            .current_game
            .as_ref()
            .is_some_and(|active| active.topic == topic)
        {
            debug!(game_id, "already watching game");
            return Ok(());
        }
        if let Some(previous) = self.current_game.take() {
            previous.close().await;
        }
        let active = self.open(topic, FromBlock::Genesis).await?;
        self.current_game = Some(active);
        Ok(())
    }

    pub async fn poll_accounts(&self) -> Result<Vec<Account>> {
        self.transport.fetch_accounts().await
    }

    /// Whether notifications from `id` should still be applied.
    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.slots().any(|active| active.id == id)
    }

    pub fn active_topics(&self) -> Vec<Topic> {
        self.slots().map(|active| active.topic).collect()
    }

    pub fn watched_game(&self) -> Option<GameId> {
        match self.current_game.as_ref()?.topic {
            Topic::GameUpdates(game_id) => Some(game_id),
            _ => None,
        }
    }

    pub async fn shutdown(&mut self) {
        let slots = [
            self.current_game.take(),
            self.new_games.take(),
            self.game_started.take(),
            self.game_won.take(),
        ];
        for active in slots.into_iter().flatten() {
            active.close().await;
        }
    }

    fn slots(&self) -> impl Iterator<Item = &ActiveSubscription> {
        [
            &self.new_games,
            &self.game_started,
            &self.game_won,
            &self.current_game,
        ]
        .into_iter()
        .flatten()
    }

    async fn open(&mut self, topic: Topic, from: FromBlock) -> Result<ActiveSubscription> {
        let handle = self
            .transport
            .subscribe(topic, from)
            .await
            .map_err(|err| match err {
                Error::Connection(reason) => Error::Connection(reason),
                other => Error::Connection(other.to_string()),
            })?;
        let id = self.next_id;
        self.next_id += 1;
        let (stop, stopped) = oneshot::channel();
        let pump = tokio::spawn(pump(id, topic, handle, stopped, self.inbound.clone()));
        info!(id, ?topic, ?from, "watching");
        Ok(ActiveSubscription {
            id,
            topic,
            stop,
            pump,
        })
    }
}

async fn pump<H: EventHandle>(
    id: SubscriptionId,
    topic: Topic,
    mut handle: H,
    mut stop: oneshot::Receiver<()>,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            next = handle.next_notification() => {
                let Some(notification) = next else {
                    debug!(id, ?topic, "event stream ended");
                    return;
                };
                let forwarded = Inbound {
                    subscription: id,
                    topic,
                    notification,
                };
                if inbound.send(forwarded).is_err() {
                    break;
                }
            }
        }
    }
    handle.cancel();
}
