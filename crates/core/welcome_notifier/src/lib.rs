//! Welcome the new members of a group, one message per burst of arrivals.
//!
//! Membership events are read as JSON lines, each join is recorded by a coalescing [Scheduler]
//! and the resulting batches are written as JSON lines, once rendered into a welcome message.

pub mod config;
pub mod events;
pub mod logging;
pub mod members;
pub mod message;
pub mod signals;
pub mod sink;

use crate::config::NotifierConfig;
use crate::events::MemberEvent;
use crate::members::Member;
use crate::members::MemberRegistry;
use crate::sink::SharedOutput;
use crate::sink::WelcomeSink;
use anyhow::Context;
use coalescer::Scheduler;
use std::future::Future;
use std::path::PathBuf;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWrite;
use tracing::error;
use tracing::info;
use tracing::warn;

#[derive(Debug, clap::Parser)]
#[command(
    name = clap::crate_name!(),
    version = clap::crate_version!(),
    about = clap::crate_description!()
)]
pub struct NotifierOpt {
    /// Path to the TOML configuration file
    ///
    /// Defaults are used when no file is given.
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<PathBuf>,

    #[command(flatten)]
    pub log_args: logging::LogConfigArgs,
}

/// Process membership events from `input` until exhausted or until `interrupt` completes.
///
/// Once the input is exhausted, the pending batches are given the time to be delivered.
/// On interrupt, the pending batches are discarded.
pub async fn run<R, W>(
    config: NotifierConfig,
    input: R,
    output: SharedOutput<W>,
    interrupt: impl Future<Output = ()>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let registry = MemberRegistry::default();
    let sink = WelcomeSink::new(config.template, registry.clone(), output);
    let scheduler = Scheduler::new(config.batching, registry.clone(), sink);

    tokio::pin!(interrupt);
    let mut lines = input.lines();
    loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("Interrupted, discarding pending batches");
                scheduler.shutdown().await;
                return Ok(());
            }
            line = lines.next_line() => {
                match line.context("Failed to read membership events")? {
                    Some(line) => handle_line(&scheduler, &registry, &line).await,
                    None => break,
                }
            }
        }
    }

    info!("End of input, waiting for pending batches");
    tokio::select! {
        _ = &mut interrupt => {
            info!("Interrupted, discarding pending batches");
        }
        _ = scheduler.wait_idle() => {}
    }

    scheduler.shutdown().await;
    Ok(())
}

async fn handle_line(
    scheduler: &Scheduler<String, Member>,
    registry: &MemberRegistry,
    line: &str,
) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let event = match MemberEvent::parse(line) {
        Ok(event) => event,
        Err(err) => {
            warn!("Ignoring malformed membership event {line:?}: {err}");
            return;
        }
    };

    match event {
        MemberEvent::Join {
            group,
            group_name,
            user,
            name,
        } => {
            registry.join(&group, group_name, &user).await;
            let member = Member::new(group.clone(), user, name);
            if let Err(err) = scheduler.record_arrival(group, member).await {
                error!("{:#}", anyhow::Error::from(err));
            }
        }
        MemberEvent::Leave { group, user } => {
            if !registry.leave(&group, &user).await {
                warn!(%group, %user, "Ignoring leave event of an unknown member");
            }
        }
    }
}
