// Wallet ledger inspector.
//
// Loads the local ledger, reconciles it against a JSON node snapshot and
// offers a small command prompt to inspect balances and transactions.
//
// Usage: wallet-ledger [config.toml] [node.json]

use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use wallet_ledger::audit::set_audit_log_path;
use wallet_ledger::constants::{
    DEFAULT_CONFIG_PATH, NODE_SNAPSHOT_FILENAME, NUM_TRANSACTIONS_PER_LOAD,
};
use wallet_ledger::lnurl::render_or_placeholder;
use wallet_ledger::{
    Amount, BitcoinUnit, CancelOutcome, Config, CoreOptions, Database, JsonSnapshotNode, Ledger,
    Transaction, Trigger, TxFilter, WalletCore,
};

type Core = WalletCore<JsonSnapshotNode>;

fn get_user_input(prompt: &str) -> Option<String> {
    let mut input = String::new();
    print!("{}", prompt);
    io::stdout().flush().ok()?;
    match io::stdin().read_line(&mut input) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(input.trim().to_string()),
    }
}

fn format_amount(amount: Amount, config: &Config) -> String {
    let unit = config.display.unit;
    let rate = config.display.fiat_rate;
    if rate > 0.0 {
        format!(
            "{} ({:.2} {})",
            amount.format(unit),
            amount.to_fiat(rate),
            config.display.fiat_unit
        )
    } else {
        amount.format(unit)
    }
}

fn print_transaction_row(tx: &Transaction, unit: BitcoinUnit) {
    let when = chrono::DateTime::from_timestamp(tx.created_at, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    println!(
        "{:<16} {:<8} {:>18} {:<9} {:<8} {}",
        when,
        tx.direction(),
        tx.amount.to_unit(unit),
        tx.status,
        tx.origin.kind(),
        tx.payment_hash.chars().take(16).collect::<String>(),
    );
}

fn print_transaction(core: &Core, tx: &Transaction, config: &Config) {
    println!("Payment hash:   {}", tx.payment_hash);
    println!("Direction:      {}", tx.direction());
    println!("Status:         {}", tx.status);
    println!("Amount:         {}", format_amount(tx.amount, config));
    if let Some(fee) = tx.fee {
        println!("Fee:            {}", fee.format(config.display.unit));
    }
    if let Some(description) = &tx.description {
        println!("Description:    {}", description);
    }
    if let Some(request) = &tx.payment_request {
        println!("Request:        {}", request);
    }
    if let Some(preimage) = &tx.preimage {
        println!("Preimage:       {}", preimage.to_hex());
    }
    if let Some(note) = &tx.note {
        println!("Note:           {}", note);
    }
    if tx.origin.success_action().is_some() {
        let decoded = core.decode_success_action(tx);
        println!("Success action: {}", render_or_placeholder(&decoded));
    }
}

async fn run(config: Config, snapshot_path: PathBuf) -> Result<()> {
    let data_dir = config.data_dir();
    if let Some(path) = config.audit_log_path() {
        set_audit_log_path(&path);
    }

    let db = Database::open(&data_dir)
        .with_context(|| format!("opening ledger database in {}", data_dir.display()))?;
    let ledger = Ledger::load(db).context("loading ledger")?;
    let node = Arc::new(JsonSnapshotNode::new(&snapshot_path));
    let core = WalletCore::new(node, ledger, CoreOptions::from(&config));

    println!("Wallet ledger inspector");
    println!("Node snapshot: {}", snapshot_path.display());

    if let Err(e) = core.refresh(Trigger::Foreground).await {
        println!("Initial sync failed: {}", e);
    }
    let periodic = core.spawn_periodic(Duration::from_secs(config.sync.periodic_interval_secs));

    let unit = config.display.unit;
    let mut page = 0usize;

    loop {
        let Some(input) = tokio::task::spawn_blocking(|| get_user_input("Enter command: ")).await?
        else {
            break;
        };

        let mut parts = input.split_whitespace();
        let command = parts.next();
        let args: Vec<&str> = parts.collect();

        match (command, args.as_slice()) {
            (Some("refresh"), []) => match core.refresh(Trigger::Manual).await {
                Ok(report) => println!(
                    "Synced {} channels: {} new, {} updated, {} expired, {} rejected",
                    report.channels,
                    report.merge.inserted,
                    report.merge.updated,
                    report.merge.expired,
                    report.merge.rejected.len()
                ),
                Err(e) => println!("Sync failed: {}", e),
            },
            (Some("balance"), []) => {
                let balances = core.balances();
                println!("Balance:        {}", format_amount(balances.total, &config));
                println!("Pending open:   {}", format_amount(balances.pending_open, &config));
                println!("Receivable:     {}", format_amount(balances.receivable, &config));
                println!("Reserved:       {}", format_amount(balances.reserved, &config));
                match core.open_invoice_total() {
                    Ok(total) => println!("Open invoices:  {}", format_amount(total, &config)),
                    Err(e) => println!("Error reading open invoices: {}", e),
                }
            }
            (Some("channels"), []) => {
                let channels = core.per_channel_balances();
                if channels.is_empty() {
                    println!("No channels.");
                }
                for c in channels {
                    let (local, remote, unallocated) = c.split.percents();
                    println!(
                        "{} {}{}",
                        c.channel_id,
                        if c.active { "active" } else { "inactive" },
                        if c.pending_open { " (pending open)" } else { "" }
                    );
                    println!("  capacity   {}", c.capacity.format(unit));
                    println!("  sendable   {}", c.sendable.format(unit));
                    println!("  receivable {}", c.receivable.format(unit));
                    println!("  reserve    {}", c.reserve.format(unit));
                    println!("  bar        {}% / {}% / {}%", local, remote, unallocated);
                }
            }
            (Some("list"), rest) => {
                let filter = match rest {
                    [] => {
                        page = 0;
                        core.default_filter()
                    }
                    ["more"] => {
                        page += 1;
                        core.default_filter().page(page, NUM_TRANSACTIONS_PER_LOAD)
                    }
                    ["all"] => TxFilter::default(),
                    _ => {
                        println!("Usage: list [more|all]");
                        continue;
                    }
                };
                let list = core.list_transactions(filter);
                if list.is_empty() {
                    println!("No transactions.");
                }
                for tx in &list {
                    print_transaction_row(tx, unit);
                }
            }
            (Some("tx"), [hash]) => match core.get_transaction(hash) {
                Some(tx) => print_transaction(&core, &tx, &config),
                None => println!("No transaction {}", hash),
            },
            (Some("note"), [hash, text @ ..]) => {
                let note = (!text.is_empty()).then(|| text.join(" "));
                match core.set_note(hash, note) {
                    Ok(()) => println!("Note saved."),
                    Err(e) => println!("Error: {}", e),
                }
            }
            (Some("cancel"), [hash]) => match core.cancel_invoice(hash).await {
                Ok(CancelOutcome::Canceled) => println!("Invoice canceled."),
                Ok(CancelOutcome::AlreadyFinal(status)) => println!("Invoice already {}.", status),
                Ok(CancelOutcome::NotCancelable(status)) => println!("Cannot cancel a {} payment.", status),
                Err(e) => println!("Cancel failed: {}", e),
            },
            (Some("decode"), [hash]) => match core.get_transaction(hash) {
                Some(tx) => match core.decode_success_action(&tx) {
                    Ok(decoded) => println!("{}", decoded.text()),
                    Err(e) => println!("Decode failed: {}", e),
                },
                None => println!("No transaction {}", hash),
            },
            (Some("fiat"), [value]) => {
                let rate = config.display.fiat_rate;
                let Ok(value) = value.parse::<f64>() else {
                    println!("Usage: fiat <amount in {}>", config.display.fiat_unit);
                    continue;
                };
                if rate <= 0.0 {
                    println!("No fiat rate configured.");
                    continue;
                }
                let amount = Amount::from_fiat(value, rate);
                let balance = core.balance();
                println!("Amount:         {}", amount.format(unit));
                match balance.checked_sub(amount).filter(|left| !left.is_negative()) {
                    Some(left) => println!("After sending:  {}", left.format(unit)),
                    None => println!("After sending:  exceeds balance"),
                }
                if let Some(after) = balance.checked_add(amount) {
                    println!("After receive:  {}", after.format(unit));
                }
            }
            (Some("exit"), []) => break,
            (Some("help"), []) | (None, _) => {
                println!("Commands: refresh, balance, channels, list [more|all], tx <hash>,");
                println!("          note <hash> [text], cancel <hash>, decode <hash>, fiat <value>, exit");
            }
            _ => println!("Unknown command. Type 'help' for a list of commands."),
        }
    }

    periodic.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load_or_create(&config_path);

    let snapshot_path = args
        .next()
        .or_else(|| config.node_snapshot.clone())
        .map(PathBuf::from)
        .unwrap_or_else(|| config.data_dir().join(NODE_SNAPSHOT_FILENAME));

    run(config, snapshot_path).await
}
