//! custq – operate a durable queue from the command line, one command per
//! process or interactively.
//
//  $ custq add --name GavWebCo --description "The final description" --number 123
//  $ custq get --timeout 5
//  $ custq group 4
//  $ custq shell
//  > add GavWebCo 123 The final description
//  > get 2
//
// Every command recovers the in-memory queue from the store log first.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::info;

use custq::core::store::LogStore;
use custq::logging::init_logging;
use custq::{Config, QueueError, QueueService, Record};

#[derive(Debug, Parser)]
#[command(name = "custq", version, about = "Bounded, durable work queue")]
struct Cli {
    /// Path to config file, TOML or YAML (env CUSTQ_CONFIG is the fallback)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enqueue and persist a record; prints its id.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        number: String,
        /// Seconds to wait for room (0 = do not wait)
        #[arg(short, long, default_value_t = 0)]
        timeout: u64,
    },
    /// Dequeue the oldest record and delete it from the store.
    Get {
        /// Seconds to wait for a record (0 = do not wait)
        #[arg(short, long, default_value_t = 0)]
        timeout: u64,
    },
    /// Drain up to SIZE immediately available records.
    Group { size: usize },
    /// Rebuild the queue from the store and report what was restored.
    Sync,
    /// Rewrite the store log keeping only live records.
    Compact,
    /// Interactive shell over a single in-process queue.
    Shell,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref()).context("failed to load config")?;
    init_logging(&cfg.logging.filter)?;

    let store = Arc::new(
        LogStore::open_with_config(&cfg.store.path, cfg.store.log_store_config())
            .with_context(|| format!("failed to open store log {}", cfg.store.path))?,
    );
    let service = QueueService::from_config(store.clone(), &cfg.queue);
    let report = service.synchronise()?;
    info!(
        restored = report.restored,
        skipped = report.skipped,
        path = %cfg.store.path,
        "queue recovered"
    );

    match cli.cmd {
        Command::Add {
            name,
            description,
            number,
            timeout,
        } => {
            let id = service.add(
                Record::new(name, description, number),
                Some(Duration::from_secs(timeout)),
            )?;
            println!("{}", id.value());
        }
        Command::Get { timeout } => {
            let record = service.get(Some(Duration::from_secs(timeout)))?;
            println!("{record}");
        }
        Command::Group { size } => {
            for record in service.get_group(size)? {
                println!("{record}");
            }
        }
        Command::Sync => {
            println!("restored {} skipped {}", report.restored, report.skipped);
        }
        Command::Compact => {
            store.compact()?;
            println!("compacted {} live records", store.len());
        }
        Command::Shell => repl(&service)?,
    }

    store.flush()?;
    Ok(())
}

// ───────────────────────────────────────────────────────────
// Interactive REPL shell
// ───────────────────────────────────────────────────────────
fn repl(service: &QueueService) -> anyhow::Result<()> {
    let mut rl: Editor<(), DefaultHistory> = DefaultEditor::new()?;

    println!(
        "custq shell, capacity {}, {} queued. Type `help` for commands.",
        service.capacity(),
        service.len()
    );

    loop {
        let Ok(line) = rl.readline("> ") else { break };
        let _ = rl.add_history_entry(line.as_str());

        let outcome = match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["help"] => {
                println!(
                    "add <name> <number> <description…> [| <timeout>] | get [timeout] | \
                     group <n> | purge | sync | len | exit"
                );
                Ok(())
            }
            ["exit" | "quit"] => break,

            ["add", name, number, rest @ ..] => {
                let (description, timeout) = split_timeout(rest);
                service
                    .add(Record::new(*name, description, *number), timeout)
                    .map(|id| println!("added {id}"))
            }

            ["get"] => service.get(None).map(|r| println!("{r}")),
            ["get", secs] => match secs.parse::<u64>() {
                Ok(secs) => service
                    .get(Some(Duration::from_secs(secs)))
                    .map(|r| println!("{r}")),
                Err(_) => {
                    println!("timeout must be a whole number of seconds");
                    Ok(())
                }
            },

            ["group", n] => match n.parse::<usize>() {
                Ok(n) => service.get_group(n).map(|records| {
                    if records.is_empty() {
                        println!("(empty)");
                    }
                    for record in records {
                        println!("{record}");
                    }
                }),
                Err(_) => {
                    println!("group size must be a whole number");
                    Ok(())
                }
            },

            ["purge"] => {
                println!("purged {}", service.purge());
                Ok(())
            }

            ["sync"] => service
                .synchronise()
                .map(|r| println!("restored {} skipped {}", r.restored, r.skipped)),

            ["len"] => {
                println!("{}/{}", service.len(), service.capacity());
                Ok(())
            }

            [] => Ok(()),
            _ => {
                println!("Unknown cmd. Type `help`.");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            report(&e);
        }
    }

    Ok(())
}

/// Splits `description… | secs` into the description and optional timeout.
fn split_timeout(rest: &[&str]) -> (String, Option<Duration>) {
    match rest {
        [desc @ .., "|", secs] => match secs.parse::<u64>() {
            Ok(secs) => (desc.join(" "), Some(Duration::from_secs(secs))),
            Err(_) => (rest.join(" "), None),
        },
        _ => (rest.join(" "), None),
    }
}

fn report(e: &QueueError) {
    if e.is_retryable() {
        println!("{e} (retry with a longer timeout)");
    } else {
        println!("error: {e}");
    }
}
