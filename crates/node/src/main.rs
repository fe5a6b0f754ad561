//! nestkv - admin tool for a node's tables
//!
//! Opens the node's storage directly; run it while the node is stopped.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use nk_core::{Interruptor, TableId};
use resp::{Command, RespValue};
use storage::{StorageContext, TablePersistentState, TablePersistor};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use nestkv::config::Config;
use nestkv::issues::IssueSource;
use nestkv::outdated_index::{LocalIndexes, OutdatedIndexIssueTracker};
use nestkv::PeerDirectory;

/// nestkv command line
#[derive(Parser, Debug)]
#[command(name = "nestkv")]
#[command(about = "nestkv - nested Redis values over CPU-sharded block storage")]
struct Args {
    /// Configuration file path (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data storage directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: AdminCommand,
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    /// List tables
    Tables,
    /// Create a table
    Create {
        name: String,
        #[arg(long, default_value = "id")]
        primary_key: String,
    },
    /// Drop a table and its data
    Drop { table: TableId },
    /// Run one command against a table and print the RESP reply
    Exec {
        table: TableId,
        #[arg(required = true, num_args = 1..)]
        args: Vec<String>,
    },
    /// Print cluster issues as JSON
    Issues,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration from file if specified, otherwise use defaults
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    // Override config with command line arguments
    let mut overrides = Config::unset();
    if let Some(data_dir) = &args.data_dir {
        overrides.storage.data_dir = data_dir.clone();
    }
    if let Some(level) = &args.log_level {
        overrides.log.level = level.clone();
    }
    config.merge(overrides);

    // Initialize logging
    let level = match config.log.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let interruptor = Interruptor::new();
    {
        let interruptor = interruptor.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interruptor.cancel();
            }
        });
    }

    info!(node = %config.node.node_id, data_dir = ?config.storage.data_dir, "Opening storage");
    let ctx = StorageContext::new(config.storage.clone()).context("starting worker threads")?;
    let persistor = TablePersistor::open(ctx)
        .await
        .context("opening table metadata")?;

    match args.command {
        AdminCommand::Tables => {
            for (table, state) in persistor.tables().await {
                println!("{}\t{}\tprimary_key={}\tepoch={}", table, state.name, state.primary_key, state.epoch);
            }
        }
        AdminCommand::Create { name, primary_key } => {
            let table = TableId::generate();
            let state = TablePersistentState {
                name,
                primary_key,
                epoch: 0,
            };
            let multistore = persistor.add_table(table, state, &interruptor).await?;
            multistore.shutdown().await?;
            println!("{}", table);
        }
        AdminCommand::Drop { table } => {
            if !persistor.tables().await.contains_key(&table) {
                bail!("no table {}", table);
            }
            persistor.remove_table(table, &interruptor).await?;
        }
        AdminCommand::Exec { table, args } => {
            let args: Vec<Bytes> = args.into_iter().map(Bytes::from).collect();
            let command = Command::from_args(&args)?;
            let multistore = persistor
                .open_table(table, &interruptor)
                .await
                .with_context(|| format!("opening table {}", table))?;
            let reply = RespValue::from(multistore.execute(command).await);
            multistore.shutdown().await?;
            print!("{}", String::from_utf8_lossy(&resp::encode_to_vec(&reply)));
        }
        AdminCommand::Issues => {
            let mut open = Vec::new();
            let skipped = persistor
                .read_all_tables(|_, _, multistore| open.push(multistore), &interruptor)
                .await?;
            for table in skipped {
                eprintln!("table {} could not be opened", table);
            }

            let ctx = persistor.context();
            let local = LocalIndexes {
                pool: ctx.pool.clone(),
                tracker: ctx.outdated.clone(),
            };
            let peers = PeerDirectory::new();
            let tracker =
                OutdatedIndexIssueTracker::new(Some(local), peers.clone(), config.cluster.issue_timeout());
            let (address, _server) = tracker.spawn_mailbox_server();
            peers.register(config.node.node_id.clone(), address);

            let issues: Vec<serde_json::Value> = tracker
                .get_issues()
                .await
                .iter()
                .map(|issue| issue.json_description())
                .collect();
            println!("{}", serde_json::to_string_pretty(&issues)?);

            for multistore in open {
                multistore.shutdown().await?;
            }
        }
    }

    Ok(())
}
