//! Concurrent extraction: manifest walk → bounded queue → copy workers

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use cabfs_core::ManifestNode;
use cabfs_keyring::{KeySource, Keyring};

use crate::error::ExtractError;
use crate::shard::{shard_path, PathObfuscator};

/// Logical name of the key-hierarchy container inside the obfuscated tree.
pub const KEYRING_NAME: &str = "keyring.dat";

/// Queue capacity between the walking producer and the copy workers. Small
/// on purpose: a full queue blocks the walk until a writer frees a slot.
const QUEUE_DEPTH: usize = 2;

/// One ready-to-copy file: a (possibly decrypting) byte stream and its
/// logical destination path. Consumed by exactly one worker; dropping it
/// releases the source handle.
pub struct DrmFile {
    pub reader: Box<dyn Read + Send>,
    pub path: String,
}

/// Per-run accounting reported back to the operator.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExtractSummary {
    /// Files copied to the destination tree.
    pub extracted: usize,
    /// Files attempted but failed (key resolution, decryption, or write).
    pub failed: usize,
    /// Manifest entries whose source file was absent.
    pub missing: usize,
    /// True when the walk stopped early on the cancellation flag.
    pub canceled: bool,
}

#[derive(Clone)]
pub struct ExtractOptions {
    /// Copy workers; 0 means one per available processing unit.
    pub workers: usize,
    /// Cooperative cancellation: once set, no further files are enqueued and
    /// in-flight items finish normally.
    pub cancel: Arc<AtomicBool>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Default)]
struct WalkStats {
    missing: usize,
    failed: usize,
}

/// An opened encrypted filesystem: the owner's path obfuscator plus its
/// keyring container.
pub struct Extractor {
    root: PathBuf,
    obfuscator: PathObfuscator,
    keyring: Keyring<File>,
}

impl Extractor {
    /// Open the filesystem rooted at `root`: derive the owner's obfuscator
    /// from the credential and load the keyring container from its sharded
    /// location.
    pub fn open(root: impl Into<PathBuf>, source: &dyn KeySource) -> Result<Self, ExtractError> {
        let root = root.into();
        let mut obfuscator = PathObfuscator::new(source.owner_code());

        let path = root.join(obfuscator.obfuscate(KEYRING_NAME));
        debug!(path = %path.display(), "opening keyring container");
        let keyring = Keyring::open(File::open(path)?, source)?;

        Ok(Self {
            root,
            obfuscator,
            keyring,
        })
    }

    /// Read a metadata file addressed by its logical name, decrypting with
    /// `key_id` when given. Metadata lives at sharded locations like any
    /// other obfuscated entry; the manifest parser consumes it through this.
    pub fn read_obfuscated(
        &mut self,
        name: &str,
        key_id: Option<u32>,
    ) -> Result<Vec<u8>, ExtractError> {
        let file = File::open(self.root.join(self.obfuscator.obfuscate(name)))?;
        let mut buf = Vec::new();
        match key_id {
            Some(id) => {
                let key = self.keyring.resolve(id)?;
                cabfs_keyring::CipherReader::open(file, key.as_bytes())?.read_to_end(&mut buf)?;
            }
            None => {
                let mut file = file;
                file.read_to_end(&mut buf)?;
            }
        }
        Ok(buf)
    }

    /// Walk `manifest` and copy every file it names into `dest`, decrypting
    /// as required. Per-item failures are logged and counted, never fatal to
    /// the run; the returned summary carries the totals.
    pub fn extract(
        &mut self,
        manifest: &ManifestNode,
        dest: &Path,
        options: &ExtractOptions,
    ) -> Result<ExtractSummary, ExtractError> {
        let workers = match options.workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            n => n,
        };

        let (tx, rx) = mpsc::sync_channel::<DrmFile>(QUEUE_DEPTH);
        let rx = Arc::new(Mutex::new(rx));
        let extracted = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        let mut stats = WalkStats::default();
        std::thread::scope(|scope| {
            let (extracted, failed) = (&extracted, &failed);
            for _ in 0..workers {
                let rx = Arc::clone(&rx);
                scope.spawn(move || worker_loop(rx, dest, extracted, failed));
            }

            // The walk runs here while the workers drain the queue; closing
            // the queue (dropping tx) is their termination signal.
            self.walk(manifest, "", &tx, &options.cancel, &mut stats);
            drop(tx);
        });

        let summary = ExtractSummary {
            extracted: extracted.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed) + stats.failed,
            missing: stats.missing,
            canceled: options.cancel.load(Ordering::Relaxed),
        };
        info!(
            extracted = summary.extracted,
            failed = summary.failed,
            missing = summary.missing,
            "extraction finished"
        );
        Ok(summary)
    }

    fn walk(
        &mut self,
        node: &ManifestNode,
        current: &str,
        tx: &SyncSender<DrmFile>,
        cancel: &AtomicBool,
        stats: &mut WalkStats,
    ) {
        let ManifestNode::Dir { children, .. } = node else {
            return;
        };

        for child in children {
            if cancel.load(Ordering::Relaxed) {
                return;
            }

            match child {
                ManifestNode::Dir { name, .. } => {
                    self.walk(child, &join_path(current, name), tx, cancel, stats);
                }
                ManifestNode::File {
                    name,
                    storage_digest,
                    key_index,
                } => {
                    if name.is_empty() {
                        warn!(dir = current, "file node without a name, skipping");
                        continue;
                    }
                    let logical = join_path(current, name);
                    match self.open_entry(
                        storage_digest.as_deref(),
                        key_index.unwrap_or(0),
                        &logical,
                    ) {
                        Ok(Some(reader)) => {
                            // Blocks while the queue is full; workers gone
                            // means there is nobody left to copy for.
                            if tx
                                .send(DrmFile {
                                    reader,
                                    path: logical,
                                })
                                .is_err()
                            {
                                return;
                            }
                        }
                        Ok(None) => stats.missing += 1,
                        Err(err) => {
                            error!(path = %logical, %err, "cannot prepare source");
                            stats.failed += 1;
                        }
                    }
                }
            }
        }
    }

    /// Resolve the on-disk source for one file entry and wrap it for
    /// decryption. `Ok(None)` means the source file is absent, which the
    /// walk tolerates.
    fn open_entry(
        &mut self,
        digest: Option<&[u8]>,
        key_id: u32,
        logical: &str,
    ) -> Result<Option<Box<dyn Read + Send>>, ExtractError> {
        let source = match digest {
            Some(digest) => self.root.join(shard_path(digest)?),
            None => self.root.join(logical),
        };

        let file = match File::open(&source) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %logical, "source file missing, skipping");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let reader = self.keyring.decrypting_reader(file, key_id)?;
        Ok(Some(Box::new(reader)))
    }
}

fn worker_loop(
    rx: Arc<Mutex<Receiver<DrmFile>>>,
    dest: &Path,
    extracted: &AtomicUsize,
    failed: &AtomicUsize,
) {
    loop {
        let item = {
            let Ok(guard) = rx.lock() else { return };
            match guard.recv() {
                Ok(item) => item,
                // Queue closed and drained.
                Err(_) => return,
            }
        };

        match copy_item(item, dest) {
            Ok((path, bytes)) => {
                extracted.fetch_add(1, Ordering::Relaxed);
                debug!(path = %path, bytes, "extracted");
            }
            Err((path, err)) => {
                failed.fetch_add(1, Ordering::Relaxed);
                error!(path = %path, %err, "extraction failed");
            }
        }
    }
}

/// Copy one queue item to its destination. Source and destination handles
/// are dropped on every exit path.
fn copy_item(mut item: DrmFile, dest: &Path) -> Result<(String, u64), (String, io::Error)> {
    let out_path = dest.join(&item.path);

    let copied = (|| {
        if let Some(parent) = out_path.parent() {
            // Workers race on shared ancestors; already-existing is fine.
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut item.reader, &mut out)
    })();

    match copied {
        Ok(bytes) => Ok((item.path, bytes)),
        Err(err) => Err((item.path, err)),
    }
}

fn join_path(current: &str, name: &str) -> String {
    if current.is_empty() {
        name.to_string()
    } else {
        format!("{current}/{name}")
    }
}
