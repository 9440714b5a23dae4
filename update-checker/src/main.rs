mod args;
mod cache;
mod checker;
mod db;
mod error;
mod fetch;
mod info;
mod notify;
mod output;
mod scheduler;
mod sources;
mod statistics;

use crate::args::{CheckerArgs, Command};
use crate::cache::RequestCache;
use crate::checker::Registry;
use crate::db::Database;
use crate::error::CheckerError;
use crate::fetch::HttpClient;
use crate::notify::Messenger;
use crate::notify::telegram::TelegramNotifier;
use crate::scheduler::{CheckOutcome, ExecutionMode, Scheduler, SchedulerConfig};
use clap::Parser as _;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

fn main() {
    let indicatif_layer = tracing_indicatif::IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("UPDATE_CHECKER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stdout_writer()))
        .with(indicatif_layer)
        .init();

    let args = CheckerArgs::parse();

    let result = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build() {
        Ok(v) => v.block_on(async_main(args)),
        Err(err) => {
            tracing::error!("Failed to create tokio runtime: {:?}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = result {
        tracing::error!("Error: {:?}", err);
        std::process::exit(1);
    }
}

async fn async_main(args: CheckerArgs) -> Result<(), CheckerError> {
    tracing::trace!("command = {:?}", args.command);

    let registry = sources::registry()?;

    match &args.command {
        Command::List => {
            list_sources(&registry);
            Ok(())
        }
        Command::Show => {
            let database = Database::setup(&args.database).await?;
            println!("{}", output::render_table(&database.all().await?));
            Ok(())
        }
        Command::Json => {
            let database = Database::setup(&args.database).await?;
            println!("{}", output::render_json(&database.all().await?)?);
            Ok(())
        }
        Command::Run => {
            let scheduler = build_scheduler(&args, registry).await?;
            scheduler.run().await
        }
        Command::Cycle => {
            let scheduler = build_scheduler(&args, registry).await?;
            let report = scheduler.run_cycle().await?;
            report.log_summary();
            Ok(())
        }
        Command::Check { id } => {
            let scheduler = build_scheduler(&args, registry).await?;
            match scheduler.check_one(id).await? {
                CheckOutcome::Updated => tracing::info!("{}: Has update", id),
                CheckOutcome::Unchanged => tracing::info!("{}: No update", id),
            }
            Ok(())
        }
    }
}

fn list_sources(registry: &Registry) {
    if registry.is_empty() {
        println!("No sources registered");
    }

    for entry in registry.entries() {
        if entry.is_disabled() {
            println!("{} ({}) [disabled]", entry.id(), entry.display_name());
        } else {
            println!("{} ({})", entry.id(), entry.display_name());
        }
    }
}

async fn build_scheduler(args: &CheckerArgs, registry: Registry) -> Result<Scheduler, CheckerError> {
    let timeout = Duration::from_secs(args.timeout);
    let http = HttpClient::new(timeout, args.proxy.as_ref())?;
    let database = Database::setup(&args.database).await?;

    let messenger = match (&args.telegram_token, &args.telegram_chat) {
        _ if args.dont_post => None,
        (Some(token), Some(_)) => {
            let notifier = TelegramNotifier::new(token, timeout, args.proxy.as_ref())?;
            Some(Arc::new(Messenger::new(Arc::new(notifier), args.notify_attempts)))
        }
        _ => {
            tracing::warn!("No Telegram bot token or chat configured, notifications are disabled");
            None
        }
    };

    let config = SchedulerConfig {
        mode: if args.parallel {
            ExecutionMode::Parallel {
                workers: args.workers,
            }
        } else {
            ExecutionMode::Sequential
        },
        item_delay: Duration::from_secs(args.item_delay),
        interval: Duration::from_secs(args.interval * 60),
        consecutive_failure_limit: args.consecutive_failure_limit,
        cumulative_failure_limit: args.cumulative_failure_limit,
        force: args.force,
        destination: args.telegram_chat.clone().unwrap_or_default(),
        proxy_probe_url: args.proxy.as_ref().map(|_| args.proxy_probe_url.clone()),
    };

    let shutdown = CancellationToken::new();
    match stop_signal() {
        Ok(signal) => {
            tokio::spawn(cancel_on(signal, shutdown.clone()));
        }
        Err(err) => tracing::error!("Failed to listen for stop signals: {}", err),
    }

    Ok(Scheduler::new(
        registry,
        database,
        http,
        Arc::new(RequestCache::new()),
        messenger,
        config,
        shutdown,
    ))
}

async fn cancel_on(signal: impl Future<Output = &'static str>, shutdown: CancellationToken) {
    let reason = signal.await;
    tracing::warn!("{}, aborting...", reason);
    shutdown.cancel();
}

/// Resolves on Ctrl-C or SIGTERM. The handlers are installed right away.
#[cfg(unix)]
fn stop_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => "Interrupted",
            _ = terminate.recv() => "Received stop signal",
        }
    })
}

#[cfg(not(unix))]
fn stop_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Interrupted",
            Err(err) => {
                tracing::error!("Failed to listen for Ctrl-C: {}", err);
                std::future::pending().await
            }
        }
    })
}
