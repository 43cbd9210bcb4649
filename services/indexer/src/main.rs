//! Message index tool.
//!
//! Builds, inspects, and queries persisted index files over GRIB
//! message files.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use grib_common::{DecodeContext, KeyFlags, ValueKind};
use grib_index::{Index, KeySpec};
use grib_message::{count_messages, open_scanner, MessageHandle, StandardTables};

#[derive(Parser, Debug)]
#[command(name = "indexer")]
#[command(about = "Build and query indexes over GRIB message files")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count the messages in a file
    Count { file: PathBuf },

    /// List the keys of the first message in a file
    Keys {
        file: PathBuf,
        /// Restrict to one namespace (e.g. time, parameter, vertical)
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Build an index over a file and write it out
    Build {
        file: PathBuf,
        /// Comma-separated keys, with optional :l/:d/:s type suffixes
        #[arg(short, long)]
        keys: String,
        /// Output index file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Print an index file's keys, distinct values, and row count
    Dump { index: PathBuf },

    /// Select key=value pairs in an index and list matching messages
    Select {
        index: PathBuf,
        /// key=value pairs, one per indexed key
        #[arg(required = true)]
        selections: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let context = DecodeContext::shared();
    let tables: Arc<StandardTables> = Arc::new(StandardTables::new());

    match args.command {
        Command::Count { file } => {
            let count = count_messages(&file)?;
            println!("{}", count);
        }
        Command::Keys { file, namespace } => {
            let mut scanner = open_scanner(&file)?;
            let Some(handle) = MessageHandle::next_from_reader(context, tables, &mut scanner)?
            else {
                bail!("no messages in {}", file.display());
            };

            for name in handle.keys(KeyFlags::empty(), namespace.as_deref()) {
                let kind = handle.native_kind(name)?;
                println!("{} ({})", name, kind);
            }
        }
        Command::Build { file, keys, out } => {
            let specs = KeySpec::parse_list(&keys)?;
            let index = Index::build(context, tables, &file, specs)?;
            index.write(&out)?;

            info!(
                rows = index.row_count(),
                skipped = index.skipped_messages(),
                out = %out.display(),
                "Index written"
            );
            println!(
                "{}: {} rows, {} skipped",
                out.display(),
                index.row_count(),
                index.skipped_messages()
            );
        }
        Command::Dump { index } => {
            let index = Index::read(context, tables, &index)?;

            println!("source: {}", index.source().display());
            println!("rows: {}", index.row_count());
            for spec in index.key_specs() {
                let kind = index.kind(&spec.name)?;
                let values = index.values(&spec.name)?;
                println!(
                    "{} ({}): {}",
                    spec.name,
                    kind,
                    serde_json::to_string(values)?
                );
            }
        }
        Command::Select { index, selections } => {
            let mut index = Index::read(context, tables, &index)?;

            for pair in &selections {
                let Some((key, value)) = pair.split_once('=') else {
                    bail!("selection '{}' is not key=value", pair);
                };
                apply_selection(&mut index, key, value)?;
            }

            let mut matched = 0usize;
            for handle in index.handles() {
                let handle = handle?;
                matched += 1;
                println!(
                    "offset={} length={}",
                    handle.message_offset().unwrap_or(0),
                    handle.message_length()
                );
            }
            println!("{} matching messages", matched);
        }
    }

    Ok(())
}

/// Select one key, parsing the value per the key's indexed kind.
fn apply_selection(index: &mut Index, key: &str, value: &str) -> Result<()> {
    match index.kind(key)? {
        ValueKind::Long => index.select_long(key, value.parse()?)?,
        ValueKind::Double => index.select_double(key, value.parse()?)?,
        _ => index.select_string(key, value)?,
    }
    Ok(())
}
