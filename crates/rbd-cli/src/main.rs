use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "rbd")]
#[command(about = "RebalanceDesk CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one rebalance tick and persist the post-trade state.
    Run(commands::run::RunArgs),

    /// Compute the layered config hash + print canonical JSON.
    ConfigHash {
        /// Paths in merge order (base -> env overlay).
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Verify the ledger hash chain.
    VerifyLedger {
        /// Path to ledger.jsonl.
        path: String,
    },
}

fn main() {
    // Dev-time .env.local bootstrap; absence is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    match cli.cmd {
        Commands::Run(args) => commands::run::execute(args),
        Commands::ConfigHash { paths } => {
            let loaded = rbd_config::load_layered_yaml(&paths)?;
            println!("{}", loaded.canonical_json);
            println!("hash: {}", loaded.config_hash);
            Ok(0)
        }
        Commands::VerifyLedger { path } => match rbd_ledger::verify_hash_chain(&path)? {
            rbd_ledger::VerifyResult::Valid { lines } => {
                println!("ledger OK ({lines} events)");
                Ok(0)
            }
            rbd_ledger::VerifyResult::Broken { line, reason } => {
                eprintln!("ledger BROKEN at line {line}: {reason}");
                Ok(1)
            }
        },
    }
}
