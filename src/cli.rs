//! CLI struct definitions for the Hivelog command-line interface.
//!
//! Subsystem subcommands are defined next to their plugins; this file holds
//! the top level and the kernel-only commands.

use crate::plugins::{agents, checkpoint, mail, mandates, patterns, reservations, tasks};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "hivelog",
    version = env!("CARGO_PKG_VERSION"),
    about = "Event-sourced coordination kernel for swarms of agents sharing one workspace"
)]
pub(crate) struct Cli {
    /// Project directory holding `.hivelog/` (defaults to the current directory).
    #[clap(long, global = true)]
    pub dir: Option<PathBuf>,
    /// Project key partitioning all state (defaults to the canonical project directory).
    #[clap(long, global = true)]
    pub project: Option<String>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Agent registry
    Agent(agents::AgentCli),
    /// Agent mail
    Mail(mail::MailCli),
    /// File reservations
    Reserve(reservations::ReserveCli),
    /// Bead lifecycle and progress
    Task(tasks::TaskCli),
    /// Checkpoints and recovery
    Checkpoint(checkpoint::CheckpointCli),
    /// Mandate voting
    Mandate(mandates::MandateCli),
    /// Pattern maturity
    Pattern(patterns::PatternCli),
    /// Read the event log
    Events(EventsCli),
    /// Drop and replay this project's projections from the event log
    Rebuild,
    /// Show the broker audit trail
    Audit {
        /// Only the last N entries.
        #[clap(long)]
        tail: Option<usize>,
    },
    /// Print every subsystem schema
    Schema,
}

#[derive(clap::Args, Debug)]
pub(crate) struct EventsCli {
    /// Event type to include (repeatable).
    #[clap(long = "type")]
    pub types: Vec<String>,
    /// Only events with a sequence greater than this.
    #[clap(long)]
    pub after: Option<i64>,
    /// Inclusive lower bound, epoch ms.
    #[clap(long)]
    pub since: Option<i64>,
    /// Inclusive upper bound, epoch ms.
    #[clap(long)]
    pub until: Option<i64>,
    #[clap(long)]
    pub limit: Option<u32>,
    /// Read across every project instead of the current one.
    #[clap(long)]
    pub all_projects: bool,
    /// Print the latest sequence instead of events.
    #[clap(long)]
    pub latest: bool,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Agent(_) => "agent",
            Command::Mail(_) => "mail",
            Command::Reserve(_) => "reserve",
            Command::Task(_) => "task",
            Command::Checkpoint(_) => "checkpoint",
            Command::Mandate(_) => "mandate",
            Command::Pattern(_) => "pattern",
            Command::Events(_) => "events",
            Command::Rebuild => "rebuild",
            Command::Audit { .. } => "audit",
            Command::Schema => "schema",
        }
    }
}
