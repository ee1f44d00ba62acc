//! The small fixed-size record tracking the most recent backup: when it
//! ran, which A/B prefix it landed under, and the season the battlefield
//! was last reset for.
//!
//! Unlike the three ordered maps this is a single record, not a
//! key-value table, so it round-trips through [`Encode`]/[`Decode`]
//! directly rather than living inside an [`crate::persist::OrderedMap`].

use thiserror::Error;

use crate::battlefield::TimeStamp;
use crate::encoding::{Decode, Encode, EncodingError};

const MAGIC: i64 = 0x3d8e_1806_72a7_8ca5u64 as i64;
const MAX_PREFIX_BYTES: usize = 20;

/// Minimum gap the periodic tick enforces between backups on its own,
/// without an explicit admin request.
pub const BACKUP_INTERVAL_MS: TimeStamp = 30 * 60 * 1000;

/// The key this record is stored under in the remote store.
pub const BACKUP_METADATA_KEY: &str = "backup_metadata";

/// Errors validating or reading a [`BackupMetadata`] record.
#[derive(Debug, Error)]
pub enum BackupMetadataError {
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("bad magic: {0:#x}")]
    BadMagic(i64),

    #[error("backup prefix is not null-terminated within {MAX_PREFIX_BYTES} bytes")]
    PrefixNotTerminated,

    #[error("backup prefix {0:?} does not fit in a {MAX_PREFIX_BYTES}-byte field")]
    PrefixTooLong(String),
}

/// The persisted record of the most recent successful backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupMetadata {
    magic: i64,
    backup_start_time: TimeStamp,
    backup_end_time: TimeStamp,
    latest_battlefield_reset_time: TimeStamp,
    backup_prefix: [u8; MAX_PREFIX_BYTES],
}

impl BackupMetadata {
    /// A fresh record: never backed up, season zero.
    pub fn fresh() -> Self {
        Self {
            magic: MAGIC,
            backup_start_time: 0,
            backup_end_time: 0,
            latest_battlefield_reset_time: 0,
            backup_prefix: [0; MAX_PREFIX_BYTES],
        }
    }

    pub fn backup_start_time(&self) -> TimeStamp {
        self.backup_start_time
    }

    pub fn backup_end_time(&self) -> TimeStamp {
        self.backup_end_time
    }

    pub fn latest_battlefield_reset_time(&self) -> TimeStamp {
        self.latest_battlefield_reset_time
    }

    /// True once `now` is at least [`BACKUP_INTERVAL_MS`] past the last
    /// successful backup's end time — the other trigger besides an admin
    /// force command. Mirrors [`crate::engine::Engine::check_season`]'s
    /// shape for the backup half of the same periodic tick.
    pub fn is_due(&self, now: TimeStamp) -> bool {
        now.saturating_sub(self.backup_end_time) >= BACKUP_INTERVAL_MS
    }

    pub fn set_backup_start_time(&mut self, time: TimeStamp) {
        self.backup_start_time = time;
    }

    pub fn set_backup_end_time(&mut self, time: TimeStamp) {
        self.backup_end_time = time;
    }

    pub fn set_latest_battlefield_reset_time(&mut self, time: TimeStamp) {
        self.latest_battlefield_reset_time = time;
    }

    /// Overwrites the backup prefix. `prefix` plus its null terminator
    /// must fit within [`MAX_PREFIX_BYTES`] bytes.
    pub fn set_backup_prefix(&mut self, prefix: &str) -> Result<(), BackupMetadataError> {
        if prefix.len() >= MAX_PREFIX_BYTES {
            return Err(BackupMetadataError::PrefixTooLong(prefix.to_string()));
        }
        self.backup_prefix = [0; MAX_PREFIX_BYTES];
        self.backup_prefix[..prefix.len()].copy_from_slice(prefix.as_bytes());
        Ok(())
    }

    pub fn backup_prefix(&self) -> Result<String, BackupMetadataError> {
        let end = self
            .backup_prefix
            .iter()
            .position(|&b| b == 0)
            .ok_or(BackupMetadataError::PrefixNotTerminated)?;
        Ok(String::from_utf8_lossy(&self.backup_prefix[..end]).into_owned())
    }

    /// Validates `self.magic` and the prefix's null termination — the
    /// checks the original ran in `BackupMetadata::Restore`.
    pub fn validate(&self) -> Result<(), BackupMetadataError> {
        if self.magic != MAGIC {
            return Err(BackupMetadataError::BadMagic(self.magic));
        }
        self.backup_prefix()?;
        Ok(())
    }
}

impl Encode for BackupMetadata {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.backup_start_time.encode_to(buf)?;
        self.backup_end_time.encode_to(buf)?;
        self.latest_battlefield_reset_time.encode_to(buf)?;
        self.backup_prefix.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BackupMetadata {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (magic, n1) = i64::decode_from(buf)?;
        let (backup_start_time, n2) = TimeStamp::decode_from(&buf[n1..])?;
        let (backup_end_time, n3) = TimeStamp::decode_from(&buf[n1 + n2..])?;
        let (latest_battlefield_reset_time, n4) = TimeStamp::decode_from(&buf[n1 + n2 + n3..])?;
        let (backup_prefix, n5) =
            <[u8; MAX_PREFIX_BYTES]>::decode_from(&buf[n1 + n2 + n3 + n4..])?;
        Ok((
            BackupMetadata {
                magic,
                backup_start_time,
                backup_end_time,
                latest_battlefield_reset_time,
                backup_prefix,
            },
            n1 + n2 + n3 + n4 + n5,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding;

    #[test]
    fn fresh_record_validates() {
        assert!(BackupMetadata::fresh().validate().is_ok());
    }

    #[test]
    fn prefix_round_trips() {
        let mut md = BackupMetadata::fresh();
        md.set_backup_prefix("tick").unwrap();
        assert_eq!(md.backup_prefix().unwrap(), "tick");
    }

    #[test]
    fn prefix_too_long_is_rejected() {
        let mut md = BackupMetadata::fresh();
        let err = md.set_backup_prefix(&"x".repeat(20)).unwrap_err();
        assert!(matches!(err, BackupMetadataError::PrefixTooLong(_)));
    }

    #[test]
    fn round_trips_through_encoding() {
        let mut md = BackupMetadata::fresh();
        md.set_backup_prefix("tock").unwrap();
        md.set_backup_start_time(100);
        md.set_backup_end_time(200);
        md.set_latest_battlefield_reset_time(42);

        let bytes = encoding::encode_to_vec(&md).unwrap();
        let (decoded, consumed) = encoding::decode_from_slice::<BackupMetadata>(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, md);
        decoded.validate().unwrap();
    }

    #[test]
    fn corrupted_magic_fails_validation() {
        let mut md = BackupMetadata::fresh();
        md.magic = 0;
        assert!(matches!(md.validate(), Err(BackupMetadataError::BadMagic(0))));
    }

    #[test]
    fn is_due_fires_once_the_interval_has_elapsed() {
        let mut md = BackupMetadata::fresh();
        md.set_backup_end_time(1_000);
        assert!(!md.is_due(1_000 + BACKUP_INTERVAL_MS - 1));
        assert!(md.is_due(1_000 + BACKUP_INTERVAL_MS));
    }

    #[test]
    fn a_never_backed_up_record_is_immediately_due() {
        let md = BackupMetadata::fresh();
        assert!(md.is_due(BACKUP_INTERVAL_MS));
    }
}
