//! Integrity check: compare extracted files against the verification list

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};
use serde::Serialize;

use cabfs_core::FileRecord;

use crate::error::ExtractError;

/// Outcome of one verification run, serializable for operator tooling.
#[derive(Debug, Default, Serialize)]
pub struct VerifyReport {
    pub broken: Vec<String>,
    pub missing: Vec<String>,
    pub total_broken: usize,
    pub total_missing: usize,
    pub total_files: usize,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.total_broken == 0 && self.total_missing == 0
    }
}

/// Stream each listed file's first `size` bytes through MD5 and compare
/// against the recorded digest. Missing files are counted, not fatal; a file
/// that is present but shorter than its record hashes short and reports as
/// broken.
pub fn verify_contents(records: &[FileRecord], root: &Path) -> Result<VerifyReport, ExtractError> {
    let mut report = VerifyReport::default();
    let mut hash = Md5::new();

    for record in records {
        report.total_files += 1;

        let file = match File::open(root.join(&record.path)) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                report.missing.push(record.path.clone());
                report.total_missing += 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        io::copy(&mut file.take(record.size), &mut hash)?;
        if hash.finalize_reset().as_slice() != record.md5 {
            report.broken.push(record.path.clone());
            report.total_broken += 1;
        }
    }

    Ok(report)
}
