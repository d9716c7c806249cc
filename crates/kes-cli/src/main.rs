//! `kes`: admin binary for the KES tracking store.
//!
//! Reads `kes.toml` (or the path given with `--config`) plus `KES_*`
//! environment variables, opens the SQLite store and runs one command.
//!
//! # Usage
//!
//! ```
//! kes init
//! kes history offer:12
//! kes set-status offer:12 WON --actor 3 --comment "signed"
//! kes reference affair:4
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use kes_core::{
  change::StatusChangeRequest,
  store::TrackingStore,
  subject::{SubjectRef, UserId},
  workflow,
};
use kes_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "KES status tracking admin")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "kes.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create the database schema if it does not exist yet.
  Init,

  /// Print a subject's change records, newest first.
  History {
    /// Subject as `type:id`, e.g. `offer:12`.
    subject: SubjectRef,
  },

  /// Move a subject to a new status and run the cascades it triggers.
  SetStatus {
    subject: SubjectRef,
    status:  String,

    /// Acting user id.
    #[arg(long)]
    actor: Option<UserId>,

    #[arg(long, default_value = "")]
    comment: String,

    /// Backdate the transition (RFC 3339).
    #[arg(long, value_name = "TIME")]
    effective_at: Option<DateTime<Utc>>,
  },

  /// Re-run the cascades of a committed change record.
  Replay {
    subject:   SubjectRef,
    change_id: i64,
  },

  /// Print a subject's stored reference.
  Reference { subject: SubjectRef },
}

// ─── Settings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Settings {
  /// Path to the SQLite database file.
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
}

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/kes/kes.db") }

fn load_settings(path: PathBuf) -> anyhow::Result<Settings> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(config::Environment::with_prefix("KES"))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise Settings")
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let settings = load_settings(cli.config)?;
  let store_path = expand_tilde(&settings.store_path);

  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }

  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::Init => {
      tracing::info!(path = ?store_path, "schema ready");
    }
    Command::History { subject } => {
      let records = store
        .history_for(subject)
        .await
        .with_context(|| format!("failed to load history of {subject}"))?;
      print_json(&records)?;
    }
    Command::SetStatus { subject, status, actor, comment, effective_at } => {
      let request = StatusChangeRequest {
        new_status: status,
        actor,
        effective_at,
        comment,
        ..Default::default()
      };
      let outcome = workflow::change_status(&store, subject, request)
        .await
        .with_context(|| format!("failed to change status of {subject}"))?;
      if !outcome.cascade.is_clean() {
        tracing::warn!(
          failures = outcome.cascade.failures.len(),
          "status changed but some cascades failed; fix and run `kes replay`"
        );
      }
      print_json(&outcome)?;
    }
    Command::Replay { subject, change_id } => {
      let record = store
        .history_for(subject)
        .await?
        .into_iter()
        .find(|r| r.change_id == change_id)
        .with_context(|| format!("no change {change_id} recorded for {subject}"))?;
      let report = workflow::replay_cascades(&store, &record).await;
      print_json(&report)?;
    }
    Command::Reference { subject } => {
      let reference = store
        .reference_for(subject)
        .await?
        .with_context(|| format!("{subject} not found"))?;
      println!("{reference}");
    }
  }

  Ok(())
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_status_args_parse() {
    let cli = Cli::try_parse_from([
      "kes",
      "set-status",
      "affair:4",
      "VALIDATED",
      "--actor",
      "3",
      "--effective-at",
      "2025-06-15T09:30:00Z",
    ])
    .unwrap();
    let Command::SetStatus { subject, status, actor, effective_at, .. } = cli.command
    else {
      panic!("wrong subcommand");
    };
    assert_eq!(subject, SubjectRef::affair(4));
    assert_eq!(status, "VALIDATED");
    assert_eq!(actor, Some(3));
    assert!(effective_at.is_some());
  }

  #[test]
  fn bad_subject_is_a_usage_error() {
    assert!(Cli::try_parse_from(["kes", "history", "widget:1"]).is_err());
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/kes.db")), PathBuf::from(home).join("kes.db"));
    assert_eq!(expand_tilde(Path::new("/tmp/kes.db")), PathBuf::from("/tmp/kes.db"));
  }
}
