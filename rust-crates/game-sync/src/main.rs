use anyhow::{
    Context,
    anyhow,
};
use clap::Parser;
use game_sync::{
    app::{
        RunState,
        Session,
        SessionConfig,
        in_memory_ledger::InMemoryLedger,
        init_tracing,
    },
    events::Address,
    snapshot::ApplicationState,
    units::ether_to_wei,
};
use std::{
    sync::Arc,
    time::Duration,
};

const SETTLE_QUIET: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(version, about = "Plays a scripted match against a local ledger", long_about = None)]
struct Args {
    /// Stake per player, in ether.
    #[arg(long, default_value_t = 1)]
    bet: u64,

    /// Commission percentage the owner enables before the match (0 leaves it off).
    #[arg(long, default_value_t = 0)]
    fee: u8,

    #[arg(long = "poll-interval-ms", default_value_t = 500)]
    poll_interval_ms: u64,

    /// Keep serving notifications after the match until interrupted.
    #[arg(long)]
    serve: bool,

    #[arg(short, long, default_value = "false")]
    tracing: bool,
}

async fn handle_interupt() {
    let res = tokio::signal::ctrl_c().await;
    match res {
        Ok(_) => {
            tracing::info!("Received interrupt, exiting");
        }
        Err(_) => {
            tracing::warn!("Received interrupt error, exiting anyway");
        }
    }
}

async fn open_session(
    ledger: &InMemoryLedger,
    config: &SessionConfig,
    account: &Address,
) -> anyhow::Result<Session<InMemoryLedger>> {
    let mut session = Session::new(Arc::new(ledger.clone()), config.clone());
    session
        .start()
        .await
        .with_context(|| format!("starting session for {account}"))?;
    session.select_account(account.clone());
    Ok(session)
}

fn print_summary(state: &ApplicationState) -> anyhow::Result<()> {
    for (player, wins) in state.rankings.leaderboard_by_wins() {
        let winnings = state.rankings.winnings(&player);
        println!("{:<14} {wins:>3} wins {winnings:>10} ETH", player.short());
    }
    let json = serde_json::to_string_pretty(state).context("serializing state")?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.tracing {
        init_tracing();
    }
    let config = SessionConfig {
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        ..SessionConfig::default()
    };
    let ledger = InMemoryLedger::with_funded_accounts(3, ether_to_wei(100));
    let [owner, alice, bob] = <[Address; 3]>::try_from(ledger.addresses())
        .map_err(|_| anyhow!("ledger must start with three accounts"))?;

    let mut owner_session = open_session(&ledger, &config, &owner).await?;
    if args.fee > 0 {
        owner_session
            .enable_commissions(args.fee)
            .await
            .context("enabling commissions")?;
    }
    let mut x = open_session(&ledger, &config, &alice).await?;
    let mut o = open_session(&ledger, &config, &bob).await?;

    let game_id = x
        .create_game(ether_to_wei(args.bet))
        .await
        .context("creating game")?;
    o.settle(SETTLE_QUIET).await?;
    o.join_game(game_id).await.context("joining game")?;
    x.settle(SETTLE_QUIET).await?;

    for (x_cell, o_cell) in [(4, 3), (0, 8)] {
        x.player_move(x_cell).await.context("X move")?;
        o.player_move(o_cell).await.context("O move")?;
    }
    x.player_move(2).await.context("X move")?;
    o.player_move(6).await.context("O move")?;
    x.player_move(1).await.context("X move")?;
    x.settle(SETTLE_QUIET).await?;
    o.settle(SETTLE_QUIET).await?;

    if args.fee > 0 {
        let withdrawn = owner_session.withdraw().await.context("withdrawing")?;
        tracing::info!(withdrawn, "owner collected commissions");
    }
    print_summary(&x.state())?;

    if args.serve {
        tracing::info!("Serving notifications");
        loop {
            let interrupt = handle_interupt();
            match x.run(interrupt).await? {
                RunState::Continue => continue,
                RunState::Exit => break,
            }
        }
    }

    owner_session.shutdown().await;
    o.shutdown().await;
    x.shutdown().await;
    Ok(())
}
