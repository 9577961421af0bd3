//! fscache command-line tool.
//!
//! Usage:
//!   # Point a mirror at a remote tree
//!   fscache -C /var/cache/assets init /srv/assets
//!
//!   # List, read, or fetch through the mirror
//!   fscache -C /var/cache/assets ls /img
//!   fscache -C /var/cache/assets cat /img/logo.png > logo.png
//!   fscache -C /var/cache/assets --offline stat /img/logo.png

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fscache::{CacheConfig, CachedFile, CachedFs, FileMode, FileRecord};
use tracing_subscriber::{EnvFilter, fmt};

/// Read-only local mirror of a remote file tree.
#[derive(Parser, Debug)]
#[command(name = "fscache")]
#[command(about = "Browse and fetch a remote tree through a local mirror")]
struct Args {
    /// Local mirror directory
    #[arg(short = 'C', long = "dir", default_value = ".")]
    dir: PathBuf,

    /// Never contact the remote
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the mirror config
    Init {
        /// Remote root directory
        base: String,

        /// Keep fetched content out of the mirror
        #[arg(long)]
        no_cache_file: bool,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        name: String,
    },
    /// Print a file to stdout
    Cat { name: String },
    /// Show metadata of a path
    Stat { name: String },
    /// Materialize a file without printing it
    Fetch { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Command::Init {
        base,
        no_cache_file,
    } = &args.command
    {
        let conf = CacheConfig {
            base: base.clone(),
            cache_file: !no_cache_file,
        };
        fscache::config::write_config(&args.dir, &conf)
            .await
            .with_context(|| format!("writing config into {}", args.dir.display()))?;
        tracing::info!(dir = %args.dir.display(), base = %base, "mirror initialized");
        return Ok(());
    }

    let fs = CachedFs::open_dir(&args.dir, args.offline)
        .await
        .with_context(|| format!("opening mirror {}", args.dir.display()))?;

    match args.command {
        Command::Init { .. } => Ok(()),
        Command::Ls { name } => ls(&fs, &name).await,
        Command::Cat { name } => cat(&fs, &name).await,
        Command::Stat { name } => {
            let record = fs.stat(&name).await.with_context(|| name.clone())?;
            println!("{}", format_record(&record));
            Ok(())
        }
        Command::Fetch { name } => {
            let file = fs.open(&name).await.with_context(|| name.clone())?;
            if file.is_dir() {
                anyhow::bail!("{name}: is a directory");
            }
            finish(file).await
        }
    }
}

async fn ls(fs: &CachedFs, name: &str) -> Result<()> {
    let mut dir = fs.open(name).await.with_context(|| name.to_string())?;
    for record in dir.readdir().await? {
        println!("{}", format_record(&record));
    }
    finish(dir).await
}

async fn cat(fs: &CachedFs, name: &str) -> Result<()> {
    let mut file = fs.open(name).await.with_context(|| name.to_string())?;
    let data = file.read_to_end().await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    finish(file).await
}

/// Close `file`, letting any stub population it started run to completion.
async fn finish(mut file: CachedFile) -> Result<()> {
    if let Some(population) = file.population() {
        let report = population.wait().await?;
        tracing::debug!(?report, "population finished");
    }
    file.close().await?;
    Ok(())
}

fn format_record(record: &FileRecord) -> String {
    format!(
        "{} {:>10} {:>12} {}{}",
        mode_string(record.mode),
        record.size,
        record.mtime_micros() / 1_000_000,
        record.name,
        if record.is_remote() { " *" } else { "" },
    )
}

fn mode_string(mode: FileMode) -> String {
    let mut out = String::with_capacity(10);
    out.push(if mode.is_dir() { 'd' } else { '-' });
    let perm = mode.perm();
    for shift in [6, 3, 0] {
        let bits = (perm >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}
