//! cabfs: encrypted content-distribution filesystem tooling
//!
//! Commands:
//!   extract SRC DEST   - decrypt and copy out an encrypted tree
//!   keyring CONTAINER  - inspect a keyring container, optionally dump keys
//!   path CODE PATH     - convert a logical path to its sharded location
//!   verify ROOT LIST   - check extracted files against a verification list

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cabfs_core::{FileRecord, ManifestNode};
use cabfs_extract::{verify_contents, ExtractOptions, Extractor, PathObfuscator};
use cabfs_keyring::{Keyring, MemoryKeySource};

#[derive(Parser, Debug)]
#[command(
    name = "cabfs",
    version,
    about = "Extract, inspect, and verify encrypted content-distribution filesystems"
)]
struct Cli {
    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long, env = "CABFS_LOG", default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decrypt and copy the contents of an encrypted tree
    Extract {
        /// Source root of the encrypted tree
        src: PathBuf,
        /// Destination directory
        dest: PathBuf,
        /// Captured credential record (JSON)
        #[arg(long, short = 'k', env = "CABFS_KEY")]
        key: PathBuf,
        /// Manifest tree as produced by the property parser (JSON)
        #[arg(long, short = 'm')]
        manifest: PathBuf,
        /// Copy workers; 0 = one per logical CPU
        #[arg(long, short = 'w', default_value_t = 0)]
        workers: usize,
    },

    /// Inspect a keyring container and optionally dump its credentials
    Keyring {
        /// Keyring container file
        container: PathBuf,
        /// Captured credential record (JSON)
        #[arg(long, short = 'k', env = "CABFS_KEY")]
        key: PathBuf,
        /// Write the captured (code, version, master) record here
        #[arg(long)]
        dump: Option<PathBuf>,
    },

    /// Convert a logical path to its obfuscated sharded location
    Path {
        /// Content-owner code
        code: String,
        /// Logical path or filename
        path: String,
    },

    /// Check file hashes and sizes against a verification list
    Verify {
        /// Root of the extracted tree
        root: PathBuf,
        /// Verification list (JSON array of records)
        list: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .init();

    match cli.command {
        Commands::Extract {
            src,
            dest,
            key,
            manifest,
            workers,
        } => run_extract(&src, &dest, &key, &manifest, workers),
        Commands::Keyring {
            container,
            key,
            dump,
        } => run_keyring(&container, &key, dump.as_deref()),
        Commands::Path { code, path } => {
            println!("{}", PathObfuscator::new(&code).obfuscate(&path));
            Ok(())
        }
        Commands::Verify { root, list } => run_verify(&root, &list),
    }
}

fn run_extract(
    src: &Path,
    dest: &Path,
    key: &Path,
    manifest: &Path,
    workers: usize,
) -> Result<()> {
    let source = load_key_source(key)?;
    let manifest: ManifestNode = serde_json::from_reader(
        File::open(manifest)
            .with_context(|| format!("opening manifest: {}", manifest.display()))?,
    )
    .context("parsing manifest")?;

    let options = ExtractOptions {
        workers,
        ..Default::default()
    };
    let cancel = options.cancel.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received, finishing in-flight files");
        cancel.store(true, Ordering::SeqCst);
    })
    .context("installing interrupt handler")?;

    let mut extractor =
        Extractor::open(src, &source).context("opening encrypted filesystem")?;

    let start = Instant::now();
    let summary = extractor.extract(&manifest, dest, &options)?;
    info!(elapsed = ?start.elapsed(), "done");

    if summary.canceled {
        warn!(
            extracted = summary.extracted,
            "extraction interrupted, partial result"
        );
    }
    if summary.failed > 0 {
        anyhow::bail!("{} of the attempted files failed", summary.failed);
    }
    Ok(())
}

fn run_keyring(container: &Path, key: &Path, dump: Option<&Path>) -> Result<()> {
    let source = load_key_source(key)?;
    let file = File::open(container)
        .with_context(|| format!("opening container: {}", container.display()))?;
    let keyring = Keyring::open(file, &source).context("opening keyring")?;

    println!("owner:   {}", keyring.owner_code());
    println!("version: {}", keyring.version());
    println!("entries: {}", keyring.entry_count());

    if let Some(out) = dump {
        let record = MemoryKeySource {
            code: keyring.owner_code().to_string(),
            version: keyring.version().to_string(),
            master: keyring.master_key().to_vec(),
        };
        serde_json::to_writer(
            File::create(out).with_context(|| format!("creating {}", out.display()))?,
            &record,
        )
        .context("writing credential record")?;
        info!(path = %out.display(), "credential record written");
    }
    Ok(())
}

fn run_verify(root: &Path, list: &Path) -> Result<()> {
    let records: Vec<FileRecord> = serde_json::from_reader(
        File::open(list).with_context(|| format!("opening list: {}", list.display()))?,
    )
    .context("parsing verification list")?;

    let report = verify_contents(&records, root)?;
    serde_json::to_writer_pretty(std::io::stdout(), &report)?;
    println!();

    if !report.is_clean() {
        anyhow::bail!(
            "{} broken, {} missing of {} files",
            report.total_broken,
            report.total_missing,
            report.total_files
        );
    }
    Ok(())
}

fn load_key_source(path: &Path) -> Result<MemoryKeySource> {
    let file =
        File::open(path).with_context(|| format!("opening key file: {}", path.display()))?;
    serde_json::from_reader(file).context("parsing key file")
}
