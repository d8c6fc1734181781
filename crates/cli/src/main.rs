//! # CLI - TidepoolKV Interactive Shell
//!
//! A REPL over stdin driving one engine instance, either the primary of a
//! location or a read-only secondary following it. Designed for both
//! interactive use and scripted testing (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! SET key value      Insert or update a key-value pair
//! GET key            Look up a key (prints value or "(nil)")
//! DEL key            Delete a key (writes a tombstone)
//! SCAN [start] [end] Range scan (inclusive start, exclusive end)
//! FLUSH              Force flush memtable to a table
//! COMPACT            Merge every table into one L1 table
//! REFRESH            Catch a secondary up with its primary
//! VIEW               Print the manifest view in use
//! STATS              Print engine debug info
//! EXIT / QUIT        Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! See [`config::EnvConfig`] for the `TIDEPOOL_*` environment variables.
//! Logs go to stderr, filtered by `TIDEPOOL_LOG`.
//!
//! ## Example
//!
//! ```text
//! $ TIDEPOOL_LOCATION=/tmp/db cargo run -p cli
//! TidepoolKV primary started (seq=0, location=/tmp/db, flush=4096KiB, l0_trigger=4)
//! > SET name Alice
//! OK
//! > GET name
//! Alice
//! > EXIT
//! bye
//! ```

use anyhow::{Context, Result};
use config::EnvConfig;
use engine::Engine;
use std::io::{self, BufRead, Write};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn prompt() {
    print!("> ");
    io::stdout().flush().ok();
}

fn main() -> Result<()> {
    let env = EnvConfig::from_env().context("invalid TIDEPOOL_* configuration")?;
    init_logging(&env.log_filter);

    let mut engine = Engine::open(&env.location, &env.options, &env.engine)?;
    info!(target: "tidepool::cli", location = %env.location.display(), mode = engine.mode().name(), "shell ready");

    println!(
        "TidepoolKV {} started (seq={}, location={}, flush={}KiB, l0_trigger={})",
        engine.mode().name(),
        engine.seq(),
        env.location.display(),
        env.engine.flush_threshold / 1024,
        env.engine.l0_compaction_trigger
    );
    println!("Commands: SET key value | GET key | DEL key | SCAN [start] [end]");
    println!("          FLUSH | COMPACT | REFRESH | VIEW | STATS | EXIT");
    prompt();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            prompt();
            continue;
        };

        match cmd.to_uppercase().as_str() {
            "SET" => match parts.next() {
                Some(k) => {
                    let v = parts.collect::<Vec<&str>>().join(" ");
                    if v.is_empty() {
                        println!("ERR usage: SET key value");
                    } else {
                        match engine.set(k.as_bytes().to_vec(), v.into_bytes()) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR {}", e),
                        }
                    }
                }
                None => println!("ERR usage: SET key value"),
            },
            "GET" => match parts.next() {
                Some(k) => match engine.get(k.as_bytes()) {
                    Ok(Some((_seq, v))) => println!("{}", String::from_utf8_lossy(&v)),
                    Ok(None) => println!("(nil)"),
                    Err(e) => println!("ERR {}", e),
                },
                None => println!("ERR usage: GET key"),
            },
            "DEL" => match parts.next() {
                Some(k) => match engine.del(k.as_bytes().to_vec()) {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR {}", e),
                },
                None => println!("ERR usage: DEL key"),
            },
            "SCAN" => {
                let start = parts.next().unwrap_or("").as_bytes();
                let end = parts.next().unwrap_or("").as_bytes();
                match engine.scan(start, end) {
                    Ok(results) if results.is_empty() => println!("(empty)"),
                    Ok(results) => {
                        for (k, v) in &results {
                            println!("{} -> {}", String::from_utf8_lossy(k), String::from_utf8_lossy(v));
                        }
                        println!("({} entries)", results.len());
                    }
                    Err(e) => println!("ERR {}", e),
                }
            }
            "FLUSH" => match engine.force_flush() {
                Ok(()) => println!("OK (L0={}, L1={})", engine.l0_table_count(), engine.l1_table_count()),
                Err(e) => println!("ERR {}", e),
            },
            "COMPACT" => match engine.compact() {
                Ok(()) => println!("OK (L0={}, L1={})", engine.l0_table_count(), engine.l1_table_count()),
                Err(e) => println!("ERR {}", e),
            },
            "REFRESH" => match engine.try_catch_up() {
                Ok(outcome) => println!(
                    "OK (version={}, last_seq={}, replayed={}, attempts={})",
                    outcome.version, outcome.last_seq, outcome.replayed_records, outcome.attempts
                ),
                Err(e) => println!("ERR {}", e),
            },
            "VIEW" => {
                let view = engine.current_view();
                println!(
                    "version={} last_seq={} wal={}",
                    view.version, view.last_seq, view.wal_generation
                );
                for table in &view.tables {
                    println!("L{} {}", table.level, table.filename);
                }
            }
            "STATS" => println!("{:?}", engine),
            "EXIT" | "QUIT" => {
                println!("bye");
                break;
            }
            other => println!("unknown command: {}", other),
        }

        prompt();
    }

    info!(target: "tidepool::cli", seq = engine.seq(), "shutting down");
    engine.close()?;
    Ok(())
}
