//! Command-line front end for item pointer index files.
#![forbid(unsafe_code)]

#[path = "iptree/config.rs"]
mod config;

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use iptree::primitives::pager::Synchronous;
use iptree::storage::{IndexStats, TreeReport};
use iptree::{IndexOptions, IptError, IptIndex, ItemPointer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::{CliConfig, ConfigError, Profile};

#[derive(Parser, Debug)]
#[command(
    name = "iptree",
    version,
    about = "Inspect and modify item pointer B+ tree index files",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "IPTREE_DB",
        value_name = "FILE",
        help = "Database file (defaults to the profile or config entry)"
    )]
    db: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "IPTREE_CONFIG",
        value_name = "FILE",
        help = "CLI config file"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "IPTREE_PROFILE", help = "Config profile to apply")]
    profile: Option<String>,

    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        help = "Page size in bytes when creating a database"
    )]
    page_size: Option<u32>,

    #[arg(long, global = true, help = "Page cache size (pages)")]
    cache_pages: Option<usize>,

    #[arg(long, global = true, value_enum, help = "WAL sync mode")]
    synchronous: Option<SynchronousArg>,

    #[arg(
        long,
        global = true,
        help = "Tree order; must match the stored order for existing files"
    )]
    order: Option<usize>,

    #[arg(
        long,
        global = true,
        help = "Checkpoint once the WAL holds this many frames (0 disables)"
    )]
    autocheckpoint_pages: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new database with an empty tree.
    Init,
    /// Insert one key/value pair.
    Insert {
        #[arg(value_name = "KEY", help = "Key as block:offset")]
        key: ItemPointer,
        #[arg(value_name = "VALUE", help = "Value as block:offset")]
        value: ItemPointer,
    },
    /// Look up a key.
    Search {
        #[arg(value_name = "KEY", help = "Key as block:offset")]
        key: ItemPointer,
    },
    /// Delete a key (not supported by the index).
    Delete {
        #[arg(value_name = "KEY", help = "Key as block:offset")]
        key: ItemPointer,
    },
    /// Bulk insert rows of key_block,key_offset,value_block,value_offset.
    Import {
        #[arg(value_name = "CSV")]
        csv: PathBuf,
        #[arg(long, help = "Treat the first row as data")]
        no_header: bool,
        #[arg(long, help = "Checkpoint after the last row")]
        checkpoint: bool,
    },
    /// Walk the tree and check its invariants.
    Verify,
    /// Print tree and pager counters.
    Stats,
    /// Copy committed pages into the database file and truncate the WAL.
    Checkpoint,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum SynchronousArg {
    Full,
    Normal,
    Off,
}

impl From<SynchronousArg> for Synchronous {
    fn from(mode: SynchronousArg) -> Self {
        match mode {
            SynchronousArg::Full => Synchronous::Full,
            SynchronousArg::Normal => Synchronous::Normal,
            SynchronousArg::Off => Synchronous::Off,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Index(#[from] IptError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no database given; pass --db, set IPTREE_DB, or configure one in the CLI config")]
    NoDatabase,
    #[error("key {0} not found")]
    NotFound(ItemPointer),
    #[error("failed to read {path}: {source}")]
    Csv {
        path: PathBuf,
        source: csv::Error,
    },
    #[error("{path} row {row}: {source}")]
    Row {
        path: PathBuf,
        row: u64,
        source: IptError,
    },
    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),
}

type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Serialize)]
struct InitOutput<'a> {
    path: &'a Path,
    root: u64,
    order: usize,
    page_size: u32,
}

#[derive(Serialize)]
struct InsertOutput {
    key: String,
    value: String,
    root: u64,
}

#[derive(Serialize)]
struct SearchOutput {
    key: String,
    value: Option<String>,
}

#[derive(Serialize)]
struct ImportOutput {
    rows: u64,
    root: u64,
    checkpoint_lsn: Option<u64>,
}

#[derive(Serialize)]
struct CheckpointOutput {
    lsn: u64,
}

#[derive(Debug, Deserialize)]
struct ImportRow {
    key_block: u32,
    key_offset: u16,
    value_block: u32,
    value_offset: u16,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

/// Installs a stderr subscriber filtered by `IPTREE_LOG`, then `RUST_LOG`.
fn init_tracing() {
    let filter = std::env::var("IPTREE_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.clone())?;
    let profile = config.select(cli.profile.as_deref())?;
    if let Some(profile) = profile {
        debug!(profile = %profile.name, "cli.profile");
    }
    let path = resolve_db_path(cli.db.as_ref(), profile, &config)?;
    let options = build_index_options(&cli.open, profile);

    match cli.command {
        Command::Init => {
            let index = IptIndex::create(&path, options)?;
            let out = InitOutput {
                path: &path,
                root: index.root().0,
                order: index.tree().layout().order(),
                page_size: index.pager().page_size(),
            };
            emit(cli.format, &out, || {
                println!(
                    "created {} (order {}, page size {}, root {})",
                    out.path.display(),
                    out.order,
                    out.page_size,
                    out.root
                )
            })?;
        }
        Command::Insert { key, value } => {
            let index = IptIndex::open(&path, options)?;
            index.insert(key, value)?;
            let out = InsertOutput {
                key: key.to_string(),
                value: value.to_string(),
                root: index.root().0,
            };
            emit(cli.format, &out, || println!("inserted {key} -> {value}"))?;
        }
        Command::Search { key } => {
            let index = IptIndex::open(&path, options)?;
            let found = index.search(key)?;
            let out = SearchOutput {
                key: key.to_string(),
                value: found.map(|v| v.to_string()),
            };
            emit(cli.format, &out, || match found {
                Some(value) => println!("{value}"),
                None => println!("not found"),
            })?;
            if found.is_none() {
                return Err(CliError::NotFound(key));
            }
        }
        Command::Delete { key } => {
            let index = IptIndex::open(&path, options)?;
            index.delete(key)?;
        }
        Command::Import {
            csv,
            no_header,
            checkpoint,
        } => {
            let index = IptIndex::open(&path, options)?;
            let rows = import_csv(&index, &csv, !no_header)?;
            let checkpoint_lsn = if checkpoint {
                Some(index.checkpoint()?.0)
            } else {
                None
            };
            let out = ImportOutput {
                rows,
                root: index.root().0,
                checkpoint_lsn,
            };
            emit(cli.format, &out, || {
                println!("imported {} rows (root {})", out.rows, out.root)
            })?;
        }
        Command::Verify => {
            let index = IptIndex::open(&path, options)?;
            let report = index.verify()?;
            emit(cli.format, &report, || print_verify_text(&report))?;
        }
        Command::Stats => {
            let index = IptIndex::open(&path, options)?;
            let stats = index.stats();
            emit(cli.format, &stats, || print_stats_text(&stats))?;
        }
        Command::Checkpoint => {
            let index = IptIndex::open(&path, options)?;
            let out = CheckpointOutput {
                lsn: index.checkpoint()?.0,
            };
            emit(cli.format, &out, || println!("checkpoint complete at lsn {}", out.lsn))?;
        }
    }
    Ok(())
}

fn resolve_db_path(
    explicit: Option<&PathBuf>,
    profile: Option<&Profile>,
    config: &CliConfig,
) -> CliResult<PathBuf> {
    explicit
        .or_else(|| profile.and_then(|p| p.database.as_ref()))
        .or_else(|| config.default_db_path())
        .cloned()
        .ok_or(CliError::NoDatabase)
}

/// Profile values first, then explicit flags on top.
fn build_index_options(open: &OpenArgs, profile: Option<&Profile>) -> IndexOptions {
    let mut options = IndexOptions::default();
    let layers = [
        profile.map(|p| {
            (
                p.page_size,
                p.cache_pages,
                p.synchronous,
                p.order,
                p.autocheckpoint_pages,
            )
        }),
        Some((
            open.page_size,
            open.cache_pages,
            open.synchronous,
            open.order,
            open.autocheckpoint_pages,
        )),
    ];
    for (page_size, cache_pages, synchronous, order, autocheckpoint) in layers.into_iter().flatten() {
        let pager = &mut options.pager;
        if let Some(size) = page_size {
            pager.page_size = size;
        }
        if let Some(pages) = cache_pages {
            pager.cache_pages = pages;
        }
        if let Some(mode) = synchronous {
            pager.synchronous = mode.into();
        }
        if let Some(pages) = autocheckpoint {
            pager.autocheckpoint_pages = pages;
        }
        options.tree.order = order.or(options.tree.order);
    }
    options
}

fn import_csv(index: &IptIndex, path: &Path, has_headers: bool) -> CliResult<u64> {
    let csv_err = |source| CliError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    let mut rows = 0u64;
    for record in reader.deserialize::<ImportRow>() {
        let row = record.map_err(csv_err)?;
        let key = ItemPointer::new(row.key_block, row.key_offset);
        let value = ItemPointer::new(row.value_block, row.value_offset);
        index.insert(key, value).map_err(|source| CliError::Row {
            path: path.to_path_buf(),
            row: rows + 1,
            source,
        })?;
        rows += 1;
    }
    info!(rows, root = index.root().0, "cli.import.done");
    Ok(rows)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> CliResult<()>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_verify_text(report: &TreeReport) {
    println!("tree ok");
    println!(
        "  depth={} leaves={} internal={} keys={} duplicates={}",
        report.depth,
        report.leaf_nodes,
        report.internal_nodes,
        report.keys,
        report.duplicate_keys
    );
}

fn print_stats_text(stats: &IndexStats) {
    println!("Tree:");
    println!(
        "  root={} order={} page_size={} page_count={}",
        stats.root, stats.order, stats.page_size, stats.page_count
    );
    let b = &stats.btree;
    println!(
        "  leaf_searches={} internal_searches={} inserts={} leaf_splits={} internal_splits={} root_splits={}",
        b.leaf_searches, b.internal_searches, b.inserts, b.leaf_splits, b.internal_splits, b.root_splits
    );
    let p = &stats.pager;
    println!("Pager:");
    println!(
        "  hits={} misses={} evictions={} allocations={} commits={} aborts={} wal_frames={} checkpoints={} replayed_frames={}",
        p.hits,
        p.misses,
        p.evictions,
        p.allocations,
        p.commits,
        p.aborts,
        p.wal_frames,
        p.checkpoints,
        p.replayed_frames
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_profile_values() {
        let profile = Profile {
            name: "small".into(),
            page_size: Some(512),
            cache_pages: Some(16),
            synchronous: Some(SynchronousArg::Off),
            order: Some(4),
            ..Profile::default()
        };
        let open = OpenArgs {
            cache_pages: Some(32),
            order: Some(6),
            ..OpenArgs::default()
        };
        let options = build_index_options(&open, Some(&profile));
        assert_eq!(options.pager.page_size, 512);
        assert_eq!(options.pager.cache_pages, 32);
        assert_eq!(options.pager.synchronous, Synchronous::Off);
        assert_eq!(options.tree.order, Some(6));
    }

    #[test]
    fn parses_item_pointer_arguments() {
        let cli = Cli::try_parse_from(["iptree", "--db", "x.ipt", "insert", "3:1", "900:7"])
            .unwrap();
        match cli.command {
            Command::Insert { key, value } => {
                assert_eq!(key, ItemPointer::new(3, 1));
                assert_eq!(value, ItemPointer::new(900, 7));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["iptree", "search", "nope"]).is_err());
    }
}
