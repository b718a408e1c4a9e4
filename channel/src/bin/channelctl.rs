//! Administrative CLI for shared-memory pub/sub channels.
//!
//! - `list`: enumerate live channels
//! - `info <name>`: dump one channel's control-segment snapshot as JSON
//! - `purge <name>`: clear orphaned subscriber slots
//! - `delete <name>`: forcibly unlink a channel's shared memory

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "channelctl")]
#[command(about = "Inspect and manage shared-memory pub/sub channels")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every channel with a live placeholder file
    List,
    /// Dump one channel's control-segment snapshot
    Info {
        /// Channel name
        name: String,
    },
    /// Clear orphaned (detached but unscavenged) subscriber slots
    Purge {
        /// Channel name
        name: String,
    },
    /// Forcibly unlink a channel's shared memory
    Delete {
        /// Channel name
        name: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match args.command {
        Command::List => {
            for name in channel::list()? {
                println!("{name}");
            }
        }
        Command::Info { name } => {
            let info = channel::admin::info(&name)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Purge { name } => {
            channel::admin::purge(&name)?;
        }
        Command::Delete { name } => {
            channel::admin::delete(&name)?;
        }
    }
    Ok(())
}
