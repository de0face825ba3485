// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content checksums.
//!
//! Content digests are the source of truth for every patch decision. A file
//! that does not exist has no digest: both oracles return `Ok(None)` in that
//! case instead of an error or an empty string, so callers always branch on
//! existence before comparing. Nothing is cached. Drift detection needs the
//! state of the file at the moment of the decision.
//!
//! Digests are MD5, hex encoded, so that local values compare equal to what
//! `md5sum` reports on the remote host.

use crate::remote::{file_exists, shell_quote, RemoteChannel, RemoteError};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::File,
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
};
use tracing::instrument;

const CHUNK_SIZE: usize = 4096;

/// Hex encoded content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Construct checksum from an already computed hex digest.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into().trim().to_ascii_lowercase())
    }

    /// Digest raw bytes.
    pub fn of_bytes(data: impl AsRef<[u8]>) -> Self {
        Self(hex::encode(Md5::digest(data.as_ref())))
    }

    /// Treat checksum as string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for Checksum {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl From<String> for Checksum {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Digest local file.
///
/// Reads the file in fixed-size chunks and folds them into one digest.
///
/// # Errors
///
/// - Return [`ChecksumError::Read`] if the file exists but cannot be read.
#[instrument(level = "debug")]
pub fn digest_local(path: &Path) -> Result<Option<Checksum>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(read_error(err, path)),
    };

    if !file.metadata().map_err(|err| read_error(err, path))?.is_file() {
        return Ok(None);
    }

    let mut hasher = Md5::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        let count = file.read(&mut chunk).map_err(|err| read_error(err, path))?;
        if count == 0 {
            break;
        }
        hasher.update(&chunk[..count]);
    }

    Ok(Some(Checksum(hex::encode(hasher.finalize()))))
}

/// Digest remote file.
///
/// Probes for existence first, then asks the remote host for the digest.
///
/// # Errors
///
/// - Return [`ChecksumError::Remote`] if the probe or hash command cannot
///   be run, or the hash command fails on an existing file.
/// - Return [`ChecksumError::Malformed`] if the remote output is not a digest.
#[instrument(skip(channel), level = "debug")]
pub fn digest_remote(channel: &impl RemoteChannel, path: &str) -> Result<Option<Checksum>> {
    if !file_exists(channel, path)? {
        return Ok(None);
    }

    let command = format!("md5sum {}", shell_quote(path));
    let output = channel.execute(&command)?.check(&command)?;
    let digest = output
        .stdout
        .split_whitespace()
        .next()
        .filter(|token| token.len() == 32 && token.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| ChecksumError::Malformed {
            path: path.into(),
            output: output.stdout.clone(),
        })?;

    Ok(Some(Checksum::new(digest)))
}

fn read_error(source: std::io::Error, path: &Path) -> ChecksumError {
    ChecksumError::Read {
        source,
        path: path.to_path_buf(),
    }
}

/// Checksum error types.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// Local file exists but cannot be read.
    #[error("failed to read {path:?} for checksum")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Remote probe or hash command failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Remote hash command printed something that is not a digest.
    #[error("unexpected checksum output for {path}: {output:?}")]
    Malformed { path: String, output: String },
}

/// Friendly result alias :3
type Result<T, E = ChecksumError> = std::result::Result<T, E>;
