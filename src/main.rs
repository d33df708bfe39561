//! Mediastore CLI
//!
//! Command-line access to a local blob store:
//! - Put files with labels
//! - Query by time range and label selector
//! - Read, relabel, delete blobs
//! - Export a dataset archive

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use mediastore::blob::{parse_external_key, BlobOptions, Info, Ref, TimeRange};
use mediastore::config::{generate_default_config, Config};
use mediastore::label::parse_selector;
use mediastore::storage::{export_dataset, Ingester, Manager, Provider, Store};
use std::io::{Read, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediastore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Content-addressable media blob store with a label index")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store root, overriding the config
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Owner of the blobs read or written
    #[arg(short, long, default_value = "0", global = true)]
    pub user: String,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store a file
    Put {
        /// File to store ("-" for stdin)
        path: PathBuf,
        /// Labels in name=value format
        #[arg(short, long)]
        label: Vec<String>,
        /// Validity start (default: now). Supports: "now", RFC 3339, Unix millis
        #[arg(long)]
        from: Option<String>,
        /// Validity end (default: same as start)
        #[arg(long)]
        through: Option<String>,
    },

    /// Query blobs by label selector
    Query {
        /// Selector, e.g. '{mediaType="image/jpeg"}'
        #[arg(default_value = "")]
        selector: String,
        /// Time range ending now (e.g., 24h, 7d, 2w)
        #[arg(short, long, default_value = "7d")]
        last: String,
    },

    /// Show a blob's labels
    Info {
        /// External key
        key: String,
    },

    /// Write a blob's bytes to stdout or a file
    Cat {
        key: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Add or remove a user label
    Label {
        key: String,
        name: String,
        value: String,
        /// Remove instead of add
        #[arg(long)]
        delete: bool,
    },

    /// Delete a blob
    Delete {
        key: String,
        /// Also remove the blob's bytes
        #[arg(long)]
        purge: bool,
    },

    /// Export matching blobs as a .tar.gz dataset
    Export {
        #[arg(default_value = "")]
        selector: String,
        #[arg(short, long, default_value = "7d")]
        last: String,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)?;
                println!("Config written to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(root) = &cli.root {
        config.storage.root = root.clone();
    }
    mediastore::logging::init(&config.logging)?;

    let store = Store::open(config).await.context("opening store")?;
    let result = run(&cli, &store).await;
    store.shutdown().await?;
    result
}

async fn run(cli: &Cli, store: &Store) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Put {
            path,
            label,
            from,
            through,
        } => {
            let mut data = Vec::new();
            if path.as_os_str() == "-" {
                std::io::stdin().read_to_end(&mut data)?;
            } else {
                std::fs::File::open(path)
                    .with_context(|| format!("reading {:?}", path))?
                    .read_to_end(&mut data)?;
            }

            let from = match from {
                Some(s) => parse_time(s)?,
                None => Utc::now().timestamp_millis(),
            };
            let through = match through {
                Some(s) => parse_time(s)?,
                None => from,
            };

            let mut opts = BlobOptions::new()
                .user_id(cli.user.as_str())
                .time_range(from, through);
            for l in label {
                let (name, value) = l
                    .split_once('=')
                    .with_context(|| format!("invalid label {:?}, expected name=value", l))?;
                opts = opts.label(name, value);
            }

            let mut w = store.writer(&opts).await?;
            w.write_all(&data)?;
            w.commit(data.len() as u64, None, &BlobOptions::new()).await?;
            println!("{}", w.info().external_key());
        }

        Commands::Query { selector, last } => {
            let infos = query(cli, store, selector, last).await?;
            print_infos(&cli.format, &infos)?;
        }

        Commands::Info { key } => {
            let info = store.info(&parse_ref(key)?).await?;
            print_infos(&cli.format, std::slice::from_ref(&info))?;
        }

        Commands::Cat { key, output } => {
            let reader = store.reader_at(&parse_ref(key)?).await?;
            let mut section = reader.section(0, reader.size());
            match output {
                Some(path) => {
                    let mut file = std::fs::File::create(path)?;
                    std::io::copy(&mut section, &mut file)?;
                }
                None => {
                    let stdout = std::io::stdout();
                    let mut lock = stdout.lock();
                    std::io::copy(&mut section, &mut lock)?;
                    lock.flush()?;
                }
            }
        }

        Commands::Label {
            key,
            name,
            value,
            delete,
        } => {
            let r = parse_ref(key)?;
            if *delete {
                store.delete_label(&r, name, value).await?;
                println!("Removed {}={}", name, value);
            } else {
                store.put_label(&r, name, value).await?;
                println!("Added {}={}", name, value);
            }
        }

        Commands::Delete { key, purge } => {
            let r = parse_ref(key)?;
            if *purge {
                store.purge(&r).await?;
            } else {
                store.delete(&r).await?;
            }
            println!("Deleted {}", key);
        }

        Commands::Export {
            selector,
            last,
            output,
        } => {
            let infos = query(cli, store, selector, last).await?;
            let file = std::fs::File::create(output)
                .with_context(|| format!("creating {:?}", output))?;
            let digest = export_dataset(store, &infos, std::io::BufWriter::new(file)).await?;
            println!("Exported {} blobs to {:?} ({})", infos.len(), output, digest);
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

async fn query(cli: &Cli, store: &Store, selector: &str, last: &str) -> anyhow::Result<Vec<Info>> {
    let matchers = parse_selector(selector)?;
    let d = parse_duration(last)?;
    let now = Utc::now().timestamp_millis();
    let range = TimeRange::new(now - d.num_milliseconds(), now);
    Ok(store.query(range, &cli.user, &matchers).await?)
}

fn parse_ref(key: &str) -> anyhow::Result<Ref> {
    Ok(parse_external_key(key, "")?.blob_ref)
}

fn print_infos(format: &str, infos: &[Info]) -> anyhow::Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(infos)?),
        _ => {
            if infos.is_empty() {
                println!("No blobs found.");
                return Ok(());
            }
            for info in infos {
                println!("{} {}", info.external_key(), info.labels);
            }
        }
    }
    Ok(())
}

fn parse_time(s: &str) -> anyhow::Result<i64> {
    match s {
        "now" => Ok(Utc::now().timestamp_millis()),
        s => {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                Ok(dt.timestamp_millis())
            } else if let Ok(ms) = s.parse::<i64>() {
                Ok(ms)
            } else {
                bail!("Invalid timestamp format: {}", s)
            }
        }
    }
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(hours) = s.strip_suffix('h') {
        Ok(Duration::hours(hours.parse()?))
    } else if let Some(days) = s.strip_suffix('d') {
        Ok(Duration::days(days.parse()?))
    } else if let Some(weeks) = s.strip_suffix('w') {
        Ok(Duration::weeks(weeks.parse()?))
    } else {
        bail!("Invalid duration format: {}. Use: 24h, 7d, 2w", s)
    }
}
