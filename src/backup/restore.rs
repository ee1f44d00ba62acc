//! The restore routine: fetch the last backup generation from a remote
//! store and write it back out as the three raw mmap files plus the
//! metadata record, so a freshly provisioned host can boot from a
//! generation backed up elsewhere.
//!
//! Run once, at process start, before [`crate::engine::Engine::open`] —
//! the original exited the process afterward rather than trying to hand
//! off into normal serving; this crate keeps that contract: restore and
//! normal startup are sequential, never interleaved.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::backup::metadata::{BackupMetadata, BackupMetadataError, BACKUP_METADATA_KEY};
use crate::encoding::{self, EncodingError};
use crate::kv::{KvError, RemoteKv};

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Metadata(#[from] BackupMetadataError),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no parts found under key prefix {0:?}")]
    NoParts(String),
}

/// One region to restore: a logical name (matching what
/// [`crate::backup::routine::Region::name`] uploaded under) and the local
/// path its concatenated bytes should be written to.
pub struct RegionTarget<'a> {
    pub name: &'a str,
    pub path: &'a Path,
}

/// Fetches the metadata record, then every region's parts in order,
/// concatenates each region's parts, and writes the raw bytes to
/// `region.path`. Also writes the metadata record to `metadata_path` so a
/// subsequent normal boot sees the restored season marker.
pub fn restore<K: RemoteKv>(
    kv: &mut K,
    regions: &[RegionTarget],
    metadata_path: &Path,
) -> Result<BackupMetadata, RestoreError> {
    kv.connect()?;

    let raw_metadata = kv.get(BACKUP_METADATA_KEY)?;
    let (metadata, _) = encoding::decode_from_slice::<BackupMetadata>(&raw_metadata)?;
    metadata.validate()?;
    let prefix = metadata.backup_prefix()?;

    tracing::info!(
        prefix = %prefix,
        start = metadata.backup_start_time(),
        end = metadata.backup_end_time(),
        "restore started"
    );

    for region in regions {
        restore_region(kv, &prefix, region)?;
    }

    write_file(metadata_path, &raw_metadata)?;
    tracing::info!("restore done");
    Ok(metadata)
}

fn restore_region<K: RemoteKv>(kv: &mut K, prefix: &str, region: &RegionTarget) -> Result<(), RestoreError> {
    let key_prefix = format!("{prefix}_{}_", region.name);
    let mut keys = kv.prefix_scan(&key_prefix)?;
    if keys.is_empty() {
        return Err(RestoreError::NoParts(key_prefix));
    }
    keys.sort_by_key(|k| part_index(k, &key_prefix));

    let mut bytes = Vec::new();
    for key in &keys {
        bytes.extend(kv.get(key)?);
    }
    write_file(region.path, &bytes)?;
    tracing::info!(region = region.name, parts = keys.len(), bytes = bytes.len(), "region restored");
    Ok(())
}

fn part_index(key: &str, key_prefix: &str) -> u32 {
    key.strip_prefix(key_prefix)
        .and_then(|suffix| suffix.parse().ok())
        .unwrap_or(0)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), RestoreError> {
    fs::write(path, bytes).map_err(|source| RestoreError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::routine::{BackupRoutine, Region};
    use crate::kv::InMemoryKv;
    use tempfile::tempdir;

    #[test]
    fn restore_round_trips_a_backed_up_region() {
        let mut kv = InMemoryKv::new();
        let mut metadata = BackupMetadata::fresh();
        let mut routine = BackupRoutine::new();
        let owner_bytes = vec![9u8, 8, 7, 6, 5];
        let regions = [Region { name: "owner_map", bytes: &owner_bytes }];
        routine.run(&mut kv, &regions, &mut metadata, 1_000, 0).unwrap();

        let dir = tempdir().unwrap();
        let owner_path = dir.path().join("owner_map.mmap");
        let metadata_path = dir.path().join("backup_metadata");
        let targets = [RegionTarget { name: "owner_map", path: &owner_path }];

        let restored = restore(&mut kv, &targets, &metadata_path).unwrap();
        assert_eq!(restored.backup_prefix().unwrap(), metadata.backup_prefix().unwrap());
        assert_eq!(fs::read(&owner_path).unwrap(), owner_bytes);
        assert!(metadata_path.exists());

        // A freshly booted process resumes the routine from the restored
        // metadata rather than `BackupRoutine::new()`, so its first backup
        // doesn't immediately overwrite the generation just restored.
        let mut resumed = BackupRoutine::resuming_from(&restored);
        resumed.run(&mut kv, &regions, &mut metadata, 2_000, 1_000).unwrap();
        assert_ne!(metadata.backup_prefix().unwrap(), restored.backup_prefix().unwrap());
    }

    #[test]
    fn missing_metadata_fails_cleanly() {
        let mut kv = InMemoryKv::new();
        kv.connect().unwrap();
        let dir = tempdir().unwrap();
        let targets: [RegionTarget; 0] = [];
        let err = restore(&mut kv, &targets, &dir.path().join("backup_metadata")).unwrap_err();
        assert!(matches!(err, RestoreError::Kv(KvError::NotFound(_))));
    }
}
