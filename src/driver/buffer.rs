//! Raw log-buffer allocation and position arithmetic.
//!
//! A log is three rotating terms plus a metadata page. The conductor only
//! allocates logs and stores the handle; term appending and scanning belong
//! to the data plane and clients.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::{CorrelationId, RegistrationId, SessionId, StreamId};

pub const PARTITION_COUNT: u32 = 3;
pub const LOG_META_DATA_LENGTH: u32 = 4096;
pub const TERM_MIN_LENGTH: u32 = 64 * 1024;
pub const TERM_MAX_LENGTH: u32 = 1 << 30;
pub const MTU_MIN_LENGTH: u32 = 32;
pub const MTU_MAX_LENGTH: u32 = 65504;

#[derive(Debug, Error)]
pub enum RawLogError {
    #[error("term length {length} must be a power of two in [{TERM_MIN_LENGTH}, {TERM_MAX_LENGTH}]")]
    InvalidTermLength { length: u32 },

    #[error("mtu {mtu} must be in [{MTU_MIN_LENGTH}, {MTU_MAX_LENGTH}]")]
    InvalidMtuLength { mtu: u32 },

    #[error("log io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub fn check_term_length(length: u32) -> Result<(), RawLogError> {
    if !length.is_power_of_two() || length < TERM_MIN_LENGTH || length > TERM_MAX_LENGTH {
        return Err(RawLogError::InvalidTermLength { length });
    }
    Ok(())
}

pub fn check_mtu_length(mtu: u32) -> Result<(), RawLogError> {
    if !(MTU_MIN_LENGTH..=MTU_MAX_LENGTH).contains(&mtu) {
        return Err(RawLogError::InvalidMtuLength { mtu });
    }
    Ok(())
}

/// Number of bits to shift when converting a term count to a position.
pub fn position_bits_to_shift(term_length: u32) -> u32 {
    term_length.trailing_zeros()
}

/// Absolute stream position for (term id, offset) relative to the initial
/// term id.
pub fn compute_position(
    term_id: i32,
    term_offset: u32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = (term_id.wrapping_sub(initial_term_id)) as i64;
    (term_count << position_bits_to_shift) + term_offset as i64
}

/// Handle on an allocated log-buffer file.
///
/// The conductor stores the handle and passes the file name to clients in
/// ready/available events; mapping is done by whoever consumes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLog {
    path: PathBuf,
    term_length: u32,
}

impl RawLog {
    pub fn new(path: PathBuf, term_length: u32) -> Self {
        Self { path, term_length }
    }

    pub fn file_name(&self) -> String {
        self.path.display().to_string()
    }

    pub fn term_length(&self) -> u32 {
        self.term_length
    }

    pub fn log_length(&self) -> u64 {
        self.term_length as u64 * PARTITION_COUNT as u64 + LOG_META_DATA_LENGTH as u64
    }

    /// Remove the backing file. Best effort: a mapped consumer keeps the
    /// pages alive until it unmaps.
    pub fn delete(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "raw log delete failed");
        }
    }
}

/// Allocates raw logs for the conductor. Injected so tests can substitute a
/// factory over a temp directory.
pub trait RawLogFactory: Send {
    fn new_network_publication(
        &mut self,
        registration_id: RegistrationId,
        session_id: SessionId,
        stream_id: StreamId,
        term_length: u32,
    ) -> Result<RawLog, RawLogError>;

    fn new_network_image(
        &mut self,
        correlation_id: CorrelationId,
        session_id: SessionId,
        stream_id: StreamId,
        term_length: u32,
    ) -> Result<RawLog, RawLogError>;

    fn new_ipc_publication(
        &mut self,
        registration_id: RegistrationId,
        session_id: SessionId,
        stream_id: StreamId,
        term_length: u32,
    ) -> Result<RawLog, RawLogError>;
}

/// Factory writing sparse files under `dir`.
pub struct FileRawLogFactory {
    dir: PathBuf,
}

impl FileRawLogFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RawLogError> {
        let dir = dir.into();
        for sub in ["publications", "images", "ipc"] {
            let path = dir.join(sub);
            std::fs::create_dir_all(&path)
                .map_err(|source| RawLogError::Io { path, source })?;
        }
        Ok(Self { dir })
    }

    fn create(&self, path: PathBuf, term_length: u32) -> Result<RawLog, RawLogError> {
        check_term_length(term_length)?;
        let log = RawLog::new(path, term_length);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&log.path)
            .map_err(|source| RawLogError::Io {
                path: log.path.clone(),
                source,
            })?;
        file.set_len(log.log_length())
            .map_err(|source| RawLogError::Io {
                path: log.path.clone(),
                source,
            })?;
        Ok(log)
    }
}

impl RawLogFactory for FileRawLogFactory {
    fn new_network_publication(
        &mut self,
        registration_id: RegistrationId,
        session_id: SessionId,
        stream_id: StreamId,
        term_length: u32,
    ) -> Result<RawLog, RawLogError> {
        let name = format!("{registration_id}-{session_id}-{stream_id}.logbuffer");
        self.create(self.dir.join("publications").join(name), term_length)
    }

    fn new_network_image(
        &mut self,
        correlation_id: CorrelationId,
        session_id: SessionId,
        stream_id: StreamId,
        term_length: u32,
    ) -> Result<RawLog, RawLogError> {
        let name = format!("{correlation_id}-{session_id}-{stream_id}.logbuffer");
        self.create(self.dir.join("images").join(name), term_length)
    }

    fn new_ipc_publication(
        &mut self,
        registration_id: RegistrationId,
        session_id: SessionId,
        stream_id: StreamId,
        term_length: u32,
    ) -> Result<RawLog, RawLogError> {
        let name = format!("{registration_id}-{session_id}-{stream_id}.logbuffer");
        self.create(self.dir.join("ipc").join(name), term_length)
    }
}
