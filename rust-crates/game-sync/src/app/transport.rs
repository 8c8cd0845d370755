use crate::{
    DeliveryError,
    Result,
    events::{
        Account,
        Address,
        GameId,
        GameTuple,
        Notification,
        Receipt,
    },
};
use std::future::Future;

/// Categories of ledger notifications a client can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NewGames,
    GameStarted,
    GameUpdates(GameId),
    GameWon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FromBlock {
    Genesis,
    Latest,
}

/// A live subscription to one [`Topic`].
pub trait EventHandle: Send + 'static {
    /// `None` once the stream has ended.
    fn next_notification(
        &mut self,
    ) -> impl Future<Output = Option<Result<Notification, DeliveryError>>> + Send;

    fn cancel(&mut self);
}

/// Requests to and notifications from the ledger node.
pub trait Transport: Send + Sync + 'static {
    type Handle: EventHandle;

    fn fetch_game_count(&self) -> impl Future<Output = Result<u64>> + Send;

    fn fetch_game(&self, id: GameId) -> impl Future<Output = Result<GameTuple>> + Send;

    fn submit_create_game(
        &self,
        from: &Address,
        amount: u128,
    ) -> impl Future<Output = Result<Receipt>> + Send;

    fn submit_join_game(
        &self,
        from: &Address,
        id: GameId,
        amount: u128,
    ) -> impl Future<Output = Result<Receipt>> + Send;

    fn submit_player_move(
        &self,
        from: &Address,
        id: GameId,
        cell: usize,
    ) -> impl Future<Output = Result<Receipt>> + Send;

    fn submit_quit_game(
        &self,
        from: &Address,
        id: GameId,
    ) -> impl Future<Output = Result<Receipt>> + Send;

    fn submit_withdraw(&self, from: &Address) -> impl Future<Output = Result<Receipt>> + Send;

    fn submit_set_fee(
        &self,
        from: &Address,
        fee: u8,
    ) -> impl Future<Output = Result<Receipt>> + Send;

    fn submit_enable_commissions(
        &self,
        from: &Address,
    ) -> impl Future<Output = Result<Receipt>> + Send;

    fn submit_disable_commissions(
        &self,
        from: &Address,
    ) -> impl Future<Output = Result<Receipt>> + Send;

    fn subscribe(
        &self,
        topic: Topic,
        from: FromBlock,
    ) -> impl Future<Output = Result<Self::Handle>> + Send;

    fn fetch_accounts(&self) -> impl Future<Output = Result<Vec<Account>>> + Send;

    fn fetch_owner(&self) -> impl Future<Output = Result<Address>> + Send;

    fn fetch_fee(&self) -> impl Future<Output = Result<u8>> + Send;

    fn fetch_commissions_enabled(&self) -> impl Future<Output = Result<bool>> + Send;

    fn fetch_contract_balance(&self) -> impl Future<Output = Result<u128>> + Send;
}
