use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use tbill_core::ledger::{LedgerConfig, TBillLedger};
use tbill_core::token::{InMemoryToken, TokenTransferPort};

type Ledger = TBillLedger<InMemoryToken>;

#[derive(Parser)]
#[command(name = "tbill", about = "Drive a T-Bill token-lock ledger kept in a JSON state file")]
struct Cli {
    /// Path of the ledger state file.
    #[arg(long, default_value = "tbill-state.json")]
    state: PathBuf,

    /// Override the wall clock (unix seconds) for buy and redeem.
    #[arg(long)]
    now: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh ledger state file.
    Init {
        /// Account that funds interest payouts.
        #[arg(long, default_value = "interest-fund")]
        interest_fund: String,
        /// Identity of the spot token the ledger orchestrates.
        #[arg(long, default_value = "spot-token")]
        token_address: String,
        /// Custody account the ledger holds locked principal under.
        #[arg(long, default_value = "tbill-custody")]
        custody: String,
    },
    /// Register or update an interest policy.
    SetRate { period: u64, rate: u64 },
    /// List registered policies in insertion order.
    Policies,
    /// Mint spot tokens to an account (in-memory test token only).
    Mint { account: String, amount: u64 },
    /// Authorize the ledger custody account to spend an owner's tokens.
    Approve { owner: String, amount: u64 },
    /// Lock tokens into a new holding.
    Buy {
        owner: String,
        amount: u64,
        period: u64,
    },
    /// Redeem a released holding for principal plus interest.
    Redeem { owner: String, id: usize },
    /// Show an owner's live holdings.
    Holdings { owner: String },
    /// Show ledger totals and the state digest.
    Status,
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Init {
            interest_fund,
            token_address,
            custody,
        } => {
            if cli.state.exists() {
                eprintln!("error: {} already exists", cli.state.display());
                process::exit(1);
            }
            let ledger = Ledger::new(
                LedgerConfig {
                    interest_fund_address: interest_fund,
                    token_address,
                },
                InMemoryToken::new(custody),
            );
            save_ledger(&cli.state, &ledger);
            println!("initialized {}", cli.state.display());
        }
        Command::SetRate { period, rate } => {
            let mut ledger = load_ledger(&cli.state);
            run(ledger.set_rate(period, rate));
            save_ledger(&cli.state, &ledger);
            println!("policy: period={period}s rate={rate}");
        }
        Command::Policies => {
            let ledger = load_ledger(&cli.state);
            for policy in ledger.policies() {
                println!("period={}s rate={}", policy.period, policy.interest_rate);
            }
        }
        Command::Mint { account, amount } => {
            let mut ledger = load_ledger(&cli.state);
            ledger.token_mut().mint(&account, amount);
            save_ledger(&cli.state, &ledger);
            println!("minted {amount} to {account}");
        }
        Command::Approve { owner, amount } => {
            let mut ledger = load_ledger(&cli.state);
            let custody = ledger.token().custody_account().to_string();
            ledger.token_mut().approve(&owner, &custody, amount);
            save_ledger(&cli.state, &ledger);
            println!("approved {custody} for {amount} of {owner}");
        }
        Command::Buy {
            owner,
            amount,
            period,
        } => {
            let now = unix_now(cli.now);
            let mut ledger = load_ledger(&cli.state);
            let holding = run(ledger.buy(&owner, amount, period, now));
            save_ledger(&cli.state, &ledger);
            println!(
                "holding id={} amount={} rate={} release={}",
                holding.id, holding.spot_token_amount, holding.interest_rate, holding.release_timestamp
            );
        }
        Command::Redeem { owner, id } => {
            let now = unix_now(cli.now);
            let mut ledger = load_ledger(&cli.state);
            let redemption = run(ledger.redeem(&owner, id, now));
            save_ledger(&cli.state, &ledger);
            println!(
                "redeemed principal={} interest={}",
                redemption.principal, redemption.interest
            );
        }
        Command::Holdings { owner } => {
            let ledger = load_ledger(&cli.state);
            for holding in ledger.holdings_of(&owner) {
                println!(
                    "id={} amount={} rate={} release={}",
                    holding.id,
                    holding.spot_token_amount,
                    holding.interest_rate,
                    holding.release_timestamp
                );
            }
        }
        Command::Status => {
            let ledger = load_ledger(&cli.state);
            let snapshot = ledger.snapshot();
            println!("total_locked={}", ledger.total_locked());
            println!("interest_fund_balance={}", ledger.interest_fund_balance());
            println!(
                "custody_balance={}",
                ledger.token().balance_of(ledger.token().custody_account())
            );
            println!("policies={}", ledger.policies().len());
            println!("state_digest={}", snapshot.digest_hex());
        }
    }
}

fn run<V>(result: Result<V, tbill_core::TBillError>) -> V {
    result.unwrap_or_else(|err| {
        eprintln!("error: {err}");
        process::exit(1);
    })
}

fn load_ledger(path: &Path) -> Ledger {
    let data = fs::read_to_string(path).unwrap_or_else(|err| {
        eprintln!("error: cannot read {}: {err}", path.display());
        process::exit(1);
    });
    serde_json::from_str(&data).unwrap_or_else(|err| {
        eprintln!("error: malformed state file {}: {err}", path.display());
        process::exit(1);
    })
}

fn save_ledger(path: &Path, ledger: &Ledger) {
    let json = serde_json::to_string_pretty(ledger).expect("ledger state is serializable");
    if let Err(err) = fs::write(path, json) {
        eprintln!("error: cannot write {}: {err}", path.display());
        process::exit(1);
    }
}

fn unix_now(override_now: Option<u64>) -> u64 {
    match override_now {
        Some(now) => now,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs(),
    }
}
