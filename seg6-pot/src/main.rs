use std::io;
use std::path::PathBuf;
use std::process::exit;

use anyhow::Result;
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

mod attach;
mod commands;
mod config;
mod error;
mod hooks;
mod key_store;
mod loader;
mod logging;
mod shutdown;
mod validation;

use config::{DEFAULT_KEY_MAP_PIN, LogFormat, LogLevel, Seg6Config, XdpMode};
use key_store::PinnedKeyStore;

#[derive(Parser)]
#[command(name = "seg6-pot")]
#[command(about = "SRv6 Proof-of-Transit control plane", long_about = None)]
struct Cli {
    /// Pinned path of the SID key map shared with the data plane
    #[arg(long, global = true, value_name = "PATH", env = "SEG6_POT_PIN_PATH", default_value = DEFAULT_KEY_MAP_PIN)]
    pin_path: PathBuf,
    /// Log verbosity (overridden by RUST_LOG)
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the PoT programs and attach them to an interface until signalled
    Install(InstallCommand),
    /// Insert or replace the key for a SID
    Upsert(UpsertCommand),
    /// List all SID -> key entries
    List(ListCommand),
    /// Show the key stored for a single SID
    Get(SidCommand),
    /// Remove the entry for a SID
    Delete(SidCommand),
}

#[derive(Args)]
struct InstallCommand {
    /// Interface to attach the XDP ingress and TC egress programs to
    #[arg(long, value_name = "IFACE")]
    iface: String,
    /// XDP attach mode for the ingress program
    #[arg(long, value_enum, default_value_t = XdpMode::Auto)]
    xdp_mode: XdpMode,
}

#[derive(Args)]
struct UpsertCommand {
    /// IPv6 SID (e.g. 2001:db8::1)
    #[arg(long, value_name = "SID")]
    sid: String,
    /// 32-byte key as 64 hex digits
    #[arg(long, value_name = "HEX")]
    key: String,
}

#[derive(Args)]
struct ListCommand {
    /// Emit JSON instead of a table
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args)]
struct SidCommand {
    /// IPv6 SID (e.g. 2001:db8::1)
    #[arg(long, value_name = "SID")]
    sid: String,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("seg6-pot error: {err:?}");
        exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level, cli.log_format)?;

    let cfg = Seg6Config::with_pin_path(cli.pin_path);
    let open = || PinnedKeyStore::open(&cfg.key_map_pin);

    match cli.command {
        Some(Commands::Install(cmd)) => {
            let cfg = Seg6Config {
                xdp_mode: cmd.xdp_mode,
                ..cfg.clone()
            };
            let token = shutdown::create_shutdown_token();
            commands::install(&cfg, &cmd.iface, token).await?;
        }
        Some(Commands::Upsert(cmd)) => {
            let sid = commands::upsert(open, &cmd.sid, &cmd.key)?;
            println!(
                "Inserted SID {} into {}",
                validation::format_sid(&sid),
                cfg.key_map_pin.display()
            );
        }
        Some(Commands::List(cmd)) => {
            let format = if cmd.json {
                commands::ListFormat::Json
            } else {
                commands::ListFormat::Table
            };
            commands::list(open, &mut io::stdout().lock(), format)?;
        }
        Some(Commands::Get(cmd)) => {
            let entry = commands::get(open, &cmd.sid)?;
            commands::write_entry(&mut io::stdout().lock(), &entry)?;
        }
        Some(Commands::Delete(cmd)) => {
            let sid = commands::delete(open, &cmd.sid)?;
            println!(
                "Removed SID {} from {}",
                validation::format_sid(&sid),
                cfg.key_map_pin.display()
            );
        }
        None => {
            Cli::command().print_help().ok();
            println!();
            exit(1);
        }
    }

    Ok(())
}
