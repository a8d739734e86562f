//! reftable CLI
//!
//! Inspect and maintain reftable files and stack directories.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use reftable::record::{BlockType, Record};
use reftable::{Config, HashId, LogRecord, RefRecord, RefSource, RefValue, Stack, Table};
use tracing_subscriber::{fmt, EnvFilter};

/// reftable CLI
#[derive(Parser, Debug)]
#[command(name = "reftable")]
#[command(about = "Inspect and maintain reftable stacks")]
#[command(version)]
struct Args {
    /// Object id hash of the stack
    #[arg(long, value_enum, default_value = "sha1")]
    hash: HashArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum HashArg {
    Sha1,
    Sha256,
}

impl From<HashArg> for HashId {
    fn from(arg: HashArg) -> Self {
        match arg {
            HashArg::Sha1 => HashId::Sha1,
            HashArg::Sha256 => HashId::Sha256,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the header, footer and records of one table file
    DumpTable {
        /// Path to the table file
        file: PathBuf,
    },

    /// List the tables of a stack, oldest first
    List {
        /// Stack directory
        dir: PathBuf,
    },

    /// Print the current value of a reference
    Resolve {
        /// Stack directory
        dir: PathBuf,

        /// Reference name
        name: String,
    },

    /// List live references
    Refs {
        /// Stack directory
        dir: PathBuf,

        /// Only names starting with this prefix
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Print the log of a reference, newest first
    Log {
        /// Stack directory
        dir: PathBuf,

        /// Reference name
        name: String,
    },

    /// Merge all tables of a stack into one
    Compact {
        /// Stack directory
        dir: PathBuf,
    },

    /// Remove unreferenced and abandoned files
    Clean {
        /// Stack directory
        dir: PathBuf,
    },
}

fn main() {
    // Logs go to stderr; stdout carries command output
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,reftable=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("reftable v{}", reftable::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> reftable::Result<()> {
    let hash_id = HashId::from(args.hash);
    match args.command {
        Commands::DumpTable { file } => dump_table(&file),
        Commands::List { dir } => {
            let stack = open_stack(&dir, hash_id)?;
            for table in stack.merged().tables() {
                println!(
                    "{}  {:>10} bytes  [{}, {}]",
                    table.name(),
                    table.size(),
                    table.header().min_update_index,
                    table.header().max_update_index
                );
            }
            Ok(())
        }
        Commands::Resolve { dir, name } => {
            let stack = open_stack(&dir, hash_id)?;
            match stack.resolve(&name)? {
                Some((value, update_index)) => {
                    println!("{} (update index {})", format_value(&value), update_index)
                }
                None => println!("{}: not found", name),
            }
            Ok(())
        }
        Commands::Refs { dir, prefix } => {
            let stack = open_stack(&dir, hash_id)?;
            for (name, value) in stack.iterate(&prefix)? {
                println!("{} {}", format_value(&value), name);
            }
            Ok(())
        }
        Commands::Log { dir, name } => {
            let stack = open_stack(&dir, hash_id)?;
            for record in stack.log(&name)? {
                println!("{}", format_log(&record));
            }
            Ok(())
        }
        Commands::Compact { dir } => {
            let stack = open_stack(&dir, hash_id)?;
            stack.compact()?;
            println!("{} table(s) remain", stack.table_names().len());
            Ok(())
        }
        Commands::Clean { dir } => {
            let stack = open_stack(&dir, hash_id)?;
            let removed = stack.clean()?;
            println!("removed {} file(s)", removed);
            Ok(())
        }
    }
}

fn open_stack(dir: &Path, hash_id: HashId) -> reftable::Result<Stack> {
    let config = Config::builder()
        .dir(dir)
        .hash_id(hash_id)
        .auto_compact(false)
        .build();
    Stack::open(config)
}

fn dump_table(path: &Path) -> reftable::Result<()> {
    let table = Table::open(path)?;
    let header = table.header();
    let footer = table.footer();

    println!("table: {}", table.name());
    println!(
        "  version {}  hash {:?}  block size {}  size {} bytes",
        header.version,
        header.hash_id,
        header.block_size,
        table.size()
    );
    println!(
        "  update index [{}, {}]",
        header.min_update_index, header.max_update_index
    );
    println!(
        "  ref index {}  obj {} (id len {})  obj index {}  log {}  log index {}",
        footer.ref_index_offset,
        footer.obj_offset,
        footer.object_id_len,
        footer.obj_index_offset,
        footer.log_offset,
        footer.log_index_offset
    );
    println!("  ref index depth {}", table.ref_index_depth()?);

    println!("refs:");
    for record in table.seek_ref("")? {
        if let Record::Ref(r) = record? {
            println!("  {}", format_ref(&r));
        }
    }

    if table.footer().obj_offset != 0 {
        println!("objs:");
        for record in table.seek_records(BlockType::Obj, &[])? {
            if let Record::Obj(o) = record? {
                let prefix: String = o.prefix.iter().map(|b| format!("{:02x}", b)).collect();
                println!("  {} -> {:?}", prefix, o.offsets);
            }
        }
    }

    println!("logs:");
    for record in RefSource::seek_log(&table, "")? {
        println!("  {}", format_log(&record?));
    }
    Ok(())
}

fn format_value(value: &RefValue) -> String {
    match value {
        RefValue::Deletion => "(deleted)".to_string(),
        RefValue::Object(id) => id.to_hex(),
        RefValue::Peeled { target, peeled } => format!("{} ^{}", target.to_hex(), peeled.to_hex()),
        RefValue::Symbolic(target) => format!("ref: {}", target),
    }
}

fn format_ref(record: &RefRecord) -> String {
    format!(
        "{} @{} {}",
        record.name,
        record.update_index,
        format_value(&record.value)
    )
}

fn format_log(record: &LogRecord) -> String {
    match record.entry() {
        Some(entry) => format!(
            "{} @{} {} -> {} {} <{}> {} {:+05}\t{}",
            record.name,
            record.update_index,
            entry.old_id.to_hex(),
            entry.new_id.to_hex(),
            entry.committer.name,
            entry.committer.email,
            entry.committer.time,
            entry.committer.tz_offset,
            entry.message.trim_end()
        ),
        None => format!("{} @{} (deleted)", record.name, record.update_index),
    }
}
