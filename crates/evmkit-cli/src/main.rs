use alloy::primitives::utils::format_ether;
use alloy::primitives::B256;
use chrono::DateTime;
use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use evmkit_data::rpc::RpcSyncerState;
use evmkit_data::state::SyncState;
use evmkit_decoration::{FullTransaction, TransactionDecoration};
use evmkit_sync::{EvmKit, KitConfig, RpcProviderRegistry};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "evmkit")]
#[command(about = "Watch and inspect the transaction history of an Ethereum address")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Overrides EVMKIT_DB_PATH.
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync once, then print new transactions as they arrive until Ctrl-C.
    Watch(WatchArgs),
    /// Print stored history, newest first.
    History(HistoryArgs),
    /// Show account, cursors and pool size from storage.
    Status,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Give up waiting for the first sync after this many seconds.
    #[arg(long, default_value_t = 120)]
    sync_timeout: u64,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    /// Tag filter; repeat to AND, separate with commas to OR (`--tag swap,eip20Transfer`).
    #[arg(long)]
    tag: Vec<String>,

    /// Continue after this transaction hash.
    #[arg(long)]
    from_hash: Option<B256>,

    #[arg(long, default_value_t = 20)]
    limit: usize,

    /// Only pending transactions.
    #[arg(long)]
    pending: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let mut config = KitConfig::from_env().wrap_err("failed to load configuration")?;
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }

    let registry = RpcProviderRegistry::new();
    let kit = EvmKit::build(config, &registry, None).wrap_err("failed to build kit")?;

    let result = match cli.command {
        Commands::Watch(args) => handle_watch(&kit, args).await,
        Commands::History(args) => handle_history(&kit, args),
        Commands::Status => handle_status(&kit),
    };
    registry.clear().await;
    result
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn handle_watch(kit: &EvmKit, args: WatchArgs) -> Result<()> {
    let mut stream = kit.subscribe_transactions();
    let mut sync_state = kit.subscribe_transactions_sync_state();

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .wrap_err("failed to create progress style")?,
    );
    pb.set_message(format!("syncing {}", kit.config().address));
    pb.enable_steady_tick(Duration::from_millis(100));

    kit.start().await;

    let first_sync = async {
        loop {
            match kit.transactions_sync_state() {
                SyncState::Synced => return Ok(()),
                SyncState::NotSynced(err) if kit.rpc_state().is_ready() => {
                    return Err(eyre!("initial sync failed: {err}"))
                }
                _ => {}
            }
            if sync_state.recv().await.is_err() {
                return Err(eyre!("sync state channel closed"));
            }
        }
    };
    match tokio::time::timeout(Duration::from_secs(args.sync_timeout), first_sync).await {
        Ok(Ok(())) => pb.finish_with_message("initial sync completed"),
        Ok(Err(err)) => {
            pb.abandon_with_message("initial sync failed");
            warn!(error = %err, "continuing to watch");
        }
        Err(_) => {
            pb.abandon_with_message("initial sync still running");
        }
    }
    print_account(kit);

    loop {
        tokio::select! {
            batch = stream.recv() => match batch {
                Ok(batch) => print_transactions(&batch),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed transaction batches");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal.wrap_err("failed to listen for Ctrl-C")?;
                break;
            }
        }
    }

    kit.stop().await;
    info!("watch finished");
    Ok(())
}

fn handle_history(kit: &EvmKit, args: HistoryArgs) -> Result<()> {
    let tags: Vec<Vec<String>> = args
        .tag
        .iter()
        .map(|group| group.split(',').map(|t| t.trim().to_string()).collect())
        .collect();

    let manager = kit.transaction_manager();
    let transactions = if args.pending {
        manager.pending_transactions(tags)?
    } else {
        manager.transactions(tags, args.from_hash, Some(args.limit))?
    };

    if transactions.is_empty() {
        println!("no stored transactions match");
        return Ok(());
    }
    print_transactions(&transactions);
    Ok(())
}

fn handle_status(kit: &EvmKit) -> Result<()> {
    let store = kit.store();

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Item", "Value"]);
    table.add_row(vec!["Address".to_string(), kit.config().address.to_string()]);
    table.add_row(vec!["RPC".to_string(), kit.config().rpc.url().to_string()]);
    table.add_row(vec![
        "Last block".to_string(),
        store
            .last_block_height()?
            .map_or_else(|| "-".to_string(), |h| h.to_string()),
    ]);
    match store.account_state()? {
        Some(account) => {
            table.add_row(vec![
                "Balance".to_string(),
                format!("{} ETH", format_ether(account.balance)),
            ]);
            table.add_row(vec!["Nonce".to_string(), account.nonce.to_string()]);
        }
        None => {
            table.add_row(vec!["Balance".to_string(), "-".to_string()]);
        }
    }
    table.add_row(vec![
        "Pending".to_string(),
        store.pending_transactions()?.len().to_string(),
    ]);
    table.add_row(vec![
        "Not synced".to_string(),
        store.not_synced_count()?.to_string(),
    ]);
    for id in kit.sync_manager().syncer_ids() {
        let cursor = store
            .syncer_state(&id)?
            .map_or_else(|| "-".to_string(), |s| s.last_block_number.to_string());
        table.add_row(vec![format!("Cursor {id}"), cursor]);
    }

    println!("{table}");
    Ok(())
}

fn print_account(kit: &EvmKit) {
    match (kit.rpc_state(), kit.account_state()) {
        (RpcSyncerState::Ready, Some(account)) => println!(
            "balance {} ETH, nonce {}",
            format_ether(account.balance),
            account.nonce
        ),
        (state, _) => println!("account not available (rpc {state:?})"),
    }
}

fn print_transactions(transactions: &[FullTransaction]) {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Time", "Hash", "Block", "Kind", "Detail"]);

    for full in transactions {
        let tx = &full.transaction;
        let time = i64::try_from(tx.timestamp)
            .ok()
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .map_or_else(|| tx.timestamp.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let block = match (tx.block_number, full.replaced_with()) {
            (_, Some(replacement)) => format!("dropped for {}", short_hash(&replacement)),
            (Some(block), None) => block.to_string(),
            (None, None) => "pending".to_string(),
        };
        let (kind, detail) = describe(&full.decoration);
        table.add_row(vec![time, short_hash(&tx.hash), block, kind.to_string(), detail]);
    }

    println!("{table}");
}

fn short_hash(hash: &B256) -> String {
    let full = hash.to_string();
    format!("{}…{}", &full[..10], &full[full.len() - 6..])
}

fn describe(decoration: &TransactionDecoration) -> (&'static str, String) {
    match decoration {
        TransactionDecoration::Incoming { from, value } => {
            ("incoming", format!("{} ETH from {from}", format_ether(*value)))
        }
        TransactionDecoration::Outgoing { to, value, .. } => {
            ("outgoing", format!("{} ETH to {to}", format_ether(*value)))
        }
        TransactionDecoration::ContractCreation => ("deploy", String::new()),
        TransactionDecoration::OutgoingEip20 {
            contract, to, value, ..
        } => ("eip20 transfer", format!("{value} of {contract} to {to}")),
        TransactionDecoration::ApproveEip20 {
            contract, spender, value,
        } => ("eip20 approve", format!("{value} of {contract} for {spender}")),
        TransactionDecoration::OutgoingEip721 {
            contract, to, token_id, ..
        } => ("eip721 transfer", format!("#{token_id} of {contract} to {to}")),
        TransactionDecoration::OutgoingEip1155 {
            contract,
            to,
            token_id,
            value,
            ..
        } => (
            "eip1155 transfer",
            format!("{value} x #{token_id} of {contract} to {to}"),
        ),
        TransactionDecoration::Swap {
            contract,
            amount_in,
            amount_out,
            ..
        } => (
            "swap",
            format!("{} in, {} out via {contract}", amount_in.value(), amount_out.value()),
        ),
        TransactionDecoration::OneInchSwap {
            amount_in,
            amount_out,
            ..
        }
        | TransactionDecoration::OneInchUnoswap {
            amount_in,
            amount_out,
            ..
        } => (
            "1inch swap",
            format!("{amount_in} in, {} out", amount_out.value()),
        ),
        TransactionDecoration::PlainTransfer { value, to, .. } => (
            "transfer",
            match to {
                Some(to) => format!("{} ETH to {to}", format_ether(*value)),
                None => format!("{} ETH", format_ether(*value)),
            },
        ),
        TransactionDecoration::Unknown {
            to,
            internal_transactions,
            event_instances,
            ..
        } => (
            "contract call",
            format!(
                "{} internal, {} events{}",
                internal_transactions.len(),
                event_instances.len(),
                to.map(|to| format!(" at {to}")).unwrap_or_default()
            ),
        ),
    }
}
