//! deskconnctl - operator CLI for the deskconn agent

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deskconnctl::commands::{self, pair};
use deskconnctl::output::{print_error, print_info, print_success};
use deskconnctl::{RpcClient, DEFAULT_AGENT_ADDRESS};

#[derive(Parser)]
#[command(name = "deskconnctl")]
#[command(author, version, about = "Operator CLI for the deskconn agent")]
#[command(propagate_version = true)]
struct Cli {
    /// Agent address (host:port)
    #[arg(long, global = true, env = "DESKCONN_ADDRESS", default_value = DEFAULT_AGENT_ADDRESS)]
    address: String,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive shell on the agent's machine
    Shell,

    /// Pair a device with the agent
    Pair {
        #[command(subcommand)]
        action: PairAction,
    },
}

#[derive(Subcommand)]
enum PairAction {
    /// Issue a new pairing code
    Start,

    /// Claim a pairing code for a device
    Claim {
        /// Device identifier
        device_id: String,
        /// Six-digit pairing code
        code: String,
        /// Human-readable device label
        #[arg(short, long)]
        label: Option<String>,
    },

    /// Exchange public keys for a claimed pairing session
    Exchange {
        /// Session id returned by `pair claim`
        session_id: String,
        /// Device identifier used in the claim
        device_id: String,
        /// Device public key (base64, 32 raw bytes)
        public_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let result = run(cli).await;
    if let Err(e) = &result {
        print_error(&format!("{:#}", e));
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Shell => {
            print_info(&format!("Opening shell on {}...", cli.address));
            commands::shell_command(&cli.address).await?;
            print_success("Shell session ended");
        }

        Commands::Pair { action } => {
            let mut client = RpcClient::connect(&cli.address).await?;
            match action {
                PairAction::Start => {
                    let code = pair::start(&mut client).await?;
                    println!("{}", code);
                }
                PairAction::Claim {
                    device_id,
                    code,
                    label,
                } => {
                    let session_id =
                        pair::claim(&mut client, &device_id, &code, label.as_deref()).await?;
                    println!("{}", session_id);
                }
                PairAction::Exchange {
                    session_id,
                    device_id,
                    public_key,
                } => {
                    let agent_key =
                        pair::exchange(&mut client, &session_id, &device_id, &public_key).await?;
                    println!("{}", agent_key);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_claim_with_label() {
        let cli = Cli::try_parse_from([
            "deskconnctl",
            "--address",
            "10.0.0.2:9000",
            "pair",
            "claim",
            "dev-1",
            "123456",
            "--label",
            "Phone",
        ])
        .unwrap();

        assert_eq!(cli.address, "10.0.0.2:9000");
        match cli.command {
            Commands::Pair {
                action:
                    PairAction::Claim {
                        device_id,
                        code,
                        label,
                    },
            } => {
                assert_eq!(device_id, "dev-1");
                assert_eq!(code, "123456");
                assert_eq!(label.as_deref(), Some("Phone"));
            }
            _ => panic!("expected pair claim"),
        }
    }

    #[test]
    fn test_verbose_counts() {
        let cli = Cli::try_parse_from(["deskconnctl", "-vv", "shell"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Shell));
    }

    #[test]
    fn test_exchange_requires_key() {
        assert!(Cli::try_parse_from(["deskconnctl", "pair", "exchange", "s", "d"]).is_err());
    }
}
