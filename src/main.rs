//! CLI entry point for `mimestream`.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use mimestream::config::{self, Config};
use mimestream::model::body::BodyPart;
use mimestream::model::message::ParsedMessage;
use mimestream::parser::decode::{DecodeLimits, MessageDecoder};
use mimestream::store::fs::FsBlobStore;

#[derive(Parser)]
#[command(
    name = "mimestream",
    version,
    about = "Decode RFC 5322 / MIME messages into a body-part tree backed by a blob store"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Store and decode one or more message files
    Decode {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
        /// Blob store directory (defaults to the configured blob_dir)
        #[arg(long, value_name = "DIR", env = "MIMESTREAM_BLOB_DIR")]
        blob_dir: Option<PathBuf>,
        /// Account the uploaded blobs belong to
        #[arg(long, default_value = "local")]
        account: String,
        /// Print the decoded messages as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a stored blob (or a byte range of one) to stdout
    ShowBlob {
        blob_id: String,
        #[arg(long, value_name = "DIR", env = "MIMESTREAM_BLOB_DIR")]
        blob_dir: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        init: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Decode {
            files,
            blob_dir,
            account,
            json,
        } => cmd_decode(&files, blob_dir, &account, json, &config),
        Commands::ShowBlob { blob_id, blob_dir } => cmd_show_blob(&blob_id, blob_dir, &config),
        Commands::Config { init } => cmd_config(init, &config),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mimestream.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Print the effective configuration as TOML, optionally saving it.
fn cmd_config(init: bool, config: &Config) -> anyhow::Result<()> {
    if init {
        config::save_config(config)?;
        if let Some(path) = config::config_file_path() {
            eprintln!("Wrote {}", path.display());
        }
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mimestream", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}

fn open_store(blob_dir: Option<PathBuf>, config: &Config) -> anyhow::Result<FsBlobStore> {
    let dir = blob_dir.unwrap_or_else(|| config::blob_dir(config));
    let store = FsBlobStore::new(&dir)
        .with_context(|| format!("opening blob store {}", dir.display()))?;
    info!(root = %store.root().display(), "Opened blob store");
    Ok(store)
}

/// Store each file as a raw message blob, then decode it from the store.
fn cmd_decode(
    files: &[PathBuf],
    blob_dir: Option<PathBuf>,
    account: &str,
    json: bool,
    config: &Config,
) -> anyhow::Result<()> {
    let mut store = open_store(blob_dir, config)?;
    let decoder = MessageDecoder::new(DecodeLimits::from(&config.limits));

    let pb = if files.len() > 1 {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Decoding [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("valid template")
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let start = Instant::now();
    let mut decoded = Vec::with_capacity(files.len());
    for path in files {
        if let Some(pb) = &pb {
            pb.set_message(path.display().to_string());
        }
        let msg = decode_file(path, &decoder, &mut store, account)?;
        decoded.push((path.as_path(), msg));
        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    info!(files = files.len(), elapsed = ?start.elapsed(), "Decoding finished");

    if json {
        print_messages_json(&decoded)?;
    } else {
        for (path, msg) in &decoded {
            print_message_table(path, msg);
        }
    }
    Ok(())
}

fn decode_file(
    path: &Path,
    decoder: &MessageDecoder,
    store: &mut FsBlobStore,
    account: &str,
) -> anyhow::Result<ParsedMessage> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let raw = store
        .put(&mut file)
        .with_context(|| format!("storing {}", path.display()))?;
    info!(path = %path.display(), blob_id = %raw.blob_id, size = raw.size, "Stored message");

    let source = store.open(&raw.blob_id)?;
    decoder
        .decode(source, &raw.blob_id, account, store)
        .with_context(|| format!("decoding {}", path.display()))
}

fn cmd_show_blob(blob_id: &str, blob_dir: Option<PathBuf>, config: &Config) -> anyhow::Result<()> {
    let store = open_store(blob_dir, config)?;
    let mut blob = store
        .open(blob_id)
        .with_context(|| format!("opening blob {blob_id}"))?;
    let mut stdout = std::io::stdout().lock();
    std::io::copy(&mut blob, &mut stdout)?;
    stdout.flush()?;
    Ok(())
}

fn print_message_table(path: &Path, msg: &ParsedMessage) {
    use humansize::{format_size, BINARY};

    let join = |list: &[mimestream::model::address::EmailAddress]| {
        list.iter()
            .map(|a| a.display())
            .collect::<Vec<_>>()
            .join(", ")
    };

    println!();
    println!("  {:<20} {}", "File", path.display());
    println!("  {:<20} {}", "Subject", msg.subject);
    println!("  {:<20} {}", "From", join(&msg.from));
    println!("  {:<20} {}", "To", join(&msg.to));
    if let Some(date) = msg.sent_at {
        println!("  {:<20} {}", "Date", date.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(id) = msg.message_id.first() {
        println!("  {:<20} {}", "Message-ID", id);
    }
    println!("  {:<20} {}", "Size", format_size(msg.size, BINARY));
    println!("  {:<20} {}", "Header size", format_size(msg.header_size, BINARY));
    println!("  {:<20} {}", "Attachments", msg.attachment_part_ids.len());
    if !msg.preview.is_empty() {
        println!("  {:<20} {}", "Preview", msg.preview);
    }
    println!();
    println!("  Structure:");
    print_part_tree(&msg.body_structure, 2);
    println!();
}

fn print_part_tree(part: &BodyPart, indent: usize) {
    use humansize::{format_size, BINARY};

    let pad = " ".repeat(indent * 2);
    match part.blob_id() {
        Some(blob_id) => {
            let name = part
                .name
                .as_deref()
                .map(|n| format!(" \"{n}\""))
                .unwrap_or_default();
            println!(
                "{pad}[{}] {}{} {} {}",
                part.part_id,
                part.media_type,
                name,
                format_size(part.size(), BINARY),
                blob_id
            );
        }
        None => {
            println!("{pad}[{}] {}", part.part_id, part.media_type);
            for sub in part.sub_parts() {
                print_part_tree(sub, indent + 1);
            }
        }
    }
}

fn print_messages_json(decoded: &[(&Path, ParsedMessage)]) -> anyhow::Result<()> {
    let values: Vec<serde_json::Value> = decoded
        .iter()
        .map(|(path, msg)| {
            serde_json::json!({
                "file": path.to_string_lossy(),
                "message": msg,
            })
        })
        .collect();
    let output = match values.as_slice() {
        [single] => serde_json::to_string_pretty(single)?,
        _ => serde_json::to_string_pretty(&values)?,
    };
    println!("{output}");
    Ok(())
}
