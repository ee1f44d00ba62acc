//! Memory-mapped ordered maps — the durable home for battlefield state.
//!
//! Each [`OrderedMap`] owns one memory-mapped file region holding a fixed
//! number of fixed-size slots. A slot is either empty or holds one
//! `(key, value)` pair plus a CRC32 of that pair's encoded bytes, so a
//! crash mid-write leaves the slot distinguishable as uncommitted on the
//! next [`OrderedMap::restore`].
//!
//! # On-disk layout
//!
//! ```text
//! [Header: magic(4) | version(u32) | capacity(u32) | key_size(u32) | value_size(u32) | header_crc(u32)]
//! [Slot 0][Slot 1]...[Slot capacity-1]            (unused tail space, if region_bytes > header + capacity*slot_size)
//! ```
//!
//! Each slot is `[occupied(u8)][payload_crc32(u32)][key bytes][value bytes]`,
//! always `slot_size = 1 + 4 + key_size + value_size` bytes.
//!
//! The file region size is fixed independently of `capacity` — callers may
//! reserve more bytes than `capacity` requires, leaving headroom unused.
//! This lets [`crate::engine::Engine::open`] keep the on-disk region sizes
//! mandated by the data model while choosing a smaller logical `capacity`
//! when needed to satisfy cross-map invariants (see
//! [`crate::engine::Engine::open`]'s capacity clamp).

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io;
use std::marker::PhantomData;
use std::path::Path;

use crc32fast::Hasher as Crc32;
use memmap2::{MmapMut, MmapOptions};
use thiserror::Error;

use crate::encoding::{self, Decode, Encode, EncodingError};

const MAP_HDR_MAGIC: [u8; 4] = *b"SBM0";
const MAP_HDR_VERSION: u32 = 1;

/// Bytes occupied by a map's fixed header, before the first slot.
pub const HEADER_BYTES: usize = 4 + 4 + 4 + 4 + 4 + 4;
const MAP_HDR_SIZE: usize = HEADER_BYTES;

/// Per-slot overhead (occupied flag + CRC32) ahead of a slot's key/value
/// payload. Callers size a region as `HEADER_BYTES + capacity * (SLOT_OVERHEAD_BYTES + key_size + value_size)`.
pub const SLOT_OVERHEAD_BYTES: usize = 1 + 4;
const SLOT_HDR_SIZE: usize = SLOT_OVERHEAD_BYTES;

/// Errors produced while creating, restoring, or mutating an [`OrderedMap`].
#[derive(Debug, Error)]
pub enum PersistError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The file's header magic, version, or declared key/value size does
    /// not match what the caller asked to restore.
    #[error("header mismatch: {0}")]
    HeaderMismatch(String),

    /// The header's own CRC32 does not match its bytes.
    #[error("header checksum mismatch")]
    HeaderChecksumMismatch,

    /// `capacity * slot_size` would not fit inside the requested region.
    #[error("capacity {capacity} (slot size {slot_size}) does not fit in a {region_bytes}-byte region")]
    CapacityExceedsRegion {
        capacity: usize,
        slot_size: usize,
        region_bytes: usize,
    },

    /// The map is at capacity; no free slot is available.
    #[error("map is full (capacity {0})")]
    Full(usize),

    /// Internal invariant violation — never expected in correct code.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A key-ordered map whose entries live inside a fixed-size memory-mapped
/// file region.
///
/// `K`/`V` must encode to a *fixed* number of bytes (true for every type
/// this crate persists: [`crate::geometry::Pos`], [`crate::geometry::SectType`],
/// `u32`, [`crate::battlefield::CombatantLite`], [`crate::battlefield::OpponentLite`]).
/// The in-memory `index` mirrors every committed entry and is the
/// iteration/lookup path; the mmap region exists purely for durability.
pub struct OrderedMap<K, V> {
    mmap: MmapMut,
    capacity: usize,
    key_size: usize,
    value_size: usize,
    slot_size: usize,
    /// key -> (slot index, value)
    index: BTreeMap<K, (usize, V)>,
    free_slots: Vec<usize>,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> OrderedMap<K, V>
where
    K: Encode + Decode + Ord + Clone,
    V: Encode + Decode + Clone,
{
    /// Formats a fresh region at `path` sized `region_bytes`, able to hold
    /// up to `capacity` entries of `key_size`/`value_size` bytes each.
    pub fn create(
        path: &Path,
        region_bytes: usize,
        key_size: usize,
        value_size: usize,
        capacity: usize,
    ) -> Result<Self, PersistError> {
        let slot_size = SLOT_HDR_SIZE + key_size + value_size;
        let needed = MAP_HDR_SIZE + capacity * slot_size;
        if needed > region_bytes {
            return Err(PersistError::CapacityExceedsRegion {
                capacity,
                slot_size,
                region_bytes,
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(region_bytes as u64)?;

        // SAFETY: `file` was just created/truncated by this process and is
        // not concurrently mapped or written elsewhere.
        let mut mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        write_header(&mut mmap, capacity, key_size, value_size);
        for slot in 0..capacity {
            mmap[slot_offset(slot, slot_size)] = 0;
        }
        mmap.flush()?;

        Ok(Self {
            mmap,
            capacity,
            key_size,
            value_size,
            slot_size,
            index: BTreeMap::new(),
            free_slots: (0..capacity).rev().collect(),
            _marker: PhantomData,
        })
    }

    /// Opens an existing region at `path`, validating its header and
    /// rebuilding the in-memory index by scanning every slot.
    ///
    /// A slot whose per-slot CRC32 does not match its payload is treated
    /// as never committed and is freed — this is the crash-recovery
    /// contract: a torn write never resurrects as a phantom entry.
    pub fn restore(path: &Path) -> Result<Self, PersistError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // SAFETY: `file` is owned exclusively by this process for the
        // lifetime of the returned `OrderedMap`.
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };

        let (capacity, key_size, value_size) = read_header(&mmap)?;
        let slot_size = SLOT_HDR_SIZE + key_size + value_size;
        let needed = MAP_HDR_SIZE + capacity * slot_size;
        if needed > mmap.len() {
            return Err(PersistError::HeaderMismatch(format!(
                "region is {} bytes, header declares {capacity} slots of {slot_size} bytes (needs {needed})",
                mmap.len()
            )));
        }

        let mut index = BTreeMap::new();
        let mut free_slots = Vec::new();
        for slot in 0..capacity {
            let off = slot_offset(slot, slot_size);
            let occupied = mmap[off] != 0;
            if !occupied {
                free_slots.push(slot);
                continue;
            }
            let stored_crc = u32::from_le_bytes(mmap[off + 1..off + 5].try_into().map_err(
                |_| PersistError::Internal("slot crc slice has wrong length".into()),
            )?);
            let payload = &mmap[off + SLOT_HDR_SIZE..off + slot_size];
            let actual_crc = crc32(payload);
            if actual_crc != stored_crc {
                free_slots.push(slot);
                continue;
            }
            let (key, key_len) = K::decode_from(payload)?;
            let (value, _) = V::decode_from(&payload[key_len..])?;
            index.insert(key, (slot, value));
        }
        free_slots.reverse();

        Ok(Self {
            mmap,
            capacity,
            key_size,
            value_size,
            slot_size,
            index,
            free_slots,
            _marker: PhantomData,
        })
    }

    /// Maximum number of entries this map can ever hold.
    pub fn max_size(&self) -> usize {
        self.capacity
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// True if `max_size()` entries are already stored.
    pub fn is_full(&self) -> bool {
        self.index.len() >= self.capacity
    }

    /// Looks up `key`, cloning its value.
    pub fn get(&self, key: &K) -> Option<V> {
        self.index.get(key).map(|(_, v)| v.clone())
    }

    /// True if `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.index.iter().map(|(k, (_, v))| (k, v))
    }

    /// Inserts or overwrites `key => value`, persisting the change before
    /// returning. Returns the previous value, if any.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, PersistError> {
        if let Some((slot, old)) = self.index.get(&key).cloned() {
            self.write_slot(slot, &key, &value)?;
            self.index.insert(key, (slot, value));
            return Ok(Some(old));
        }
        let slot = self.free_slots.pop().ok_or(PersistError::Full(self.capacity))?;
        if let Err(err) = self.write_slot(slot, &key, &value) {
            self.free_slots.push(slot);
            return Err(err);
        }
        self.index.insert(key, (slot, value));
        Ok(None)
    }

    /// Removes `key`, persisting the slot as empty. Returns the removed
    /// value, if present.
    pub fn remove(&mut self, key: &K) -> Result<Option<V>, PersistError> {
        let Some((slot, value)) = self.index.remove(key) else {
            return Ok(None);
        };
        self.clear_slot(slot)?;
        self.free_slots.push(slot);
        Ok(Some(value))
    }

    /// Removes every entry, persisting all slots as empty. Used by the
    /// season reset.
    pub fn clear(&mut self) -> Result<(), PersistError> {
        let slots: Vec<usize> = self.index.values().map(|(slot, _)| *slot).collect();
        for slot in slots {
            self.clear_slot(slot)?;
        }
        self.index.clear();
        self.free_slots = (0..self.capacity).rev().collect();
        Ok(())
    }

    /// Copies the raw file bytes, for the backup routine's snapshot step.
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        self.mmap.to_vec()
    }

    fn write_slot(&mut self, slot: usize, key: &K, value: &V) -> Result<(), PersistError> {
        let mut payload = Vec::with_capacity(self.key_size + self.value_size);
        key.encode_to(&mut payload)?;
        value.encode_to(&mut payload)?;
        if payload.len() != self.key_size + self.value_size {
            return Err(PersistError::Internal(format!(
                "encoded payload is {} bytes, expected fixed {} ({}+{})",
                payload.len(),
                self.key_size + self.value_size,
                self.key_size,
                self.value_size
            )));
        }
        let crc = crc32(&payload);
        let off = slot_offset(slot, self.slot_size);
        self.mmap[off] = 1;
        self.mmap[off + 1..off + 5].copy_from_slice(&crc.to_le_bytes());
        self.mmap[off + SLOT_HDR_SIZE..off + self.slot_size].copy_from_slice(&payload);
        self.mmap.flush_range(off, self.slot_size)?;
        Ok(())
    }

    fn clear_slot(&mut self, slot: usize) -> Result<(), PersistError> {
        let off = slot_offset(slot, self.slot_size);
        self.mmap[off] = 0;
        self.mmap.flush_range(off, 1)?;
        Ok(())
    }
}

fn slot_offset(slot: usize, slot_size: usize) -> usize {
    MAP_HDR_SIZE + slot * slot_size
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn write_header(mmap: &mut MmapMut, capacity: usize, key_size: usize, value_size: usize) {
    let mut hdr = Vec::with_capacity(MAP_HDR_SIZE);
    hdr.extend_from_slice(&MAP_HDR_MAGIC);
    hdr.extend_from_slice(&MAP_HDR_VERSION.to_le_bytes());
    hdr.extend_from_slice(&(capacity as u32).to_le_bytes());
    hdr.extend_from_slice(&(key_size as u32).to_le_bytes());
    hdr.extend_from_slice(&(value_size as u32).to_le_bytes());
    let crc = crc32(&hdr);
    hdr.extend_from_slice(&crc.to_le_bytes());
    mmap[..MAP_HDR_SIZE].copy_from_slice(&hdr);
}

fn read_header(mmap: &MmapMut) -> Result<(usize, usize, usize), PersistError> {
    if mmap.len() < MAP_HDR_SIZE {
        return Err(PersistError::HeaderMismatch("region shorter than header".into()));
    }
    let hdr = &mmap[..MAP_HDR_SIZE];
    let (magic, crc_bytes) = (&hdr[..4], &hdr[MAP_HDR_SIZE - 4..]);
    let stored_crc = u32::from_le_bytes(crc_bytes.try_into().map_err(|_| {
        PersistError::Internal("header crc slice has wrong length".into())
    })?);
    let actual_crc = crc32(&hdr[..MAP_HDR_SIZE - 4]);
    if stored_crc != actual_crc {
        return Err(PersistError::HeaderChecksumMismatch);
    }
    if magic != MAP_HDR_MAGIC {
        return Err(PersistError::HeaderMismatch(format!(
            "bad magic {magic:?}, expected {MAP_HDR_MAGIC:?}"
        )));
    }
    let version = u32::from_le_bytes(hdr[4..8].try_into().unwrap_or_default());
    if version != MAP_HDR_VERSION {
        return Err(PersistError::HeaderMismatch(format!(
            "unsupported version {version}"
        )));
    }
    let capacity = u32::from_le_bytes(hdr[8..12].try_into().unwrap_or_default()) as usize;
    let key_size = u32::from_le_bytes(hdr[12..16].try_into().unwrap_or_default()) as usize;
    let value_size = u32::from_le_bytes(hdr[16..20].try_into().unwrap_or_default()) as usize;
    Ok((capacity, key_size, value_size))
}

/// Computes the fixed encoded byte length of a sample value. Every type
/// this crate persists is fixed-size; this is used once at `create` time
/// to record `key_size`/`value_size` in the header.
pub fn fixed_encoded_size<T: Encode>(sample: &T) -> Result<usize, EncodingError> {
    Ok(encoding::encode_to_vec(sample)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Pos, SectType};
    use tempfile::tempdir;

    #[test]
    fn create_insert_and_restore_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("owner_map.mmap");

        let key_size = fixed_encoded_size(&Pos::new(0, 0)).unwrap();
        let value_size = fixed_encoded_size(&SectType::None).unwrap();

        {
            let mut map: OrderedMap<Pos, SectType> =
                OrderedMap::create(&path, 20 * 1024, key_size, value_size, 100).unwrap();
            map.insert(Pos::new(0, 0), SectType::Shaolin).unwrap();
            map.insert(Pos::new(1, 0), SectType::WuDang).unwrap();
        }

        let restored: OrderedMap<Pos, SectType> = OrderedMap::restore(&path).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get(&Pos::new(0, 0)), Some(SectType::Shaolin));
        assert_eq!(restored.get(&Pos::new(1, 0)), Some(SectType::WuDang));
        assert_eq!(restored.max_size(), 100);
    }

    #[test]
    fn remove_frees_the_slot_for_reuse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("owner_map.mmap");
        let key_size = fixed_encoded_size(&Pos::new(0, 0)).unwrap();
        let value_size = fixed_encoded_size(&SectType::None).unwrap();

        let mut map: OrderedMap<Pos, SectType> =
            OrderedMap::create(&path, 20 * 1024, key_size, value_size, 1).unwrap();
        map.insert(Pos::new(0, 0), SectType::Shaolin).unwrap();
        assert!(map.is_full());
        map.remove(&Pos::new(0, 0)).unwrap();
        assert!(!map.is_full());
        map.insert(Pos::new(5, 5), SectType::GaiBang).unwrap();
        assert_eq!(map.get(&Pos::new(5, 5)), Some(SectType::GaiBang));
    }

    #[test]
    fn insert_beyond_capacity_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("owner_map.mmap");
        let key_size = fixed_encoded_size(&Pos::new(0, 0)).unwrap();
        let value_size = fixed_encoded_size(&SectType::None).unwrap();

        let mut map: OrderedMap<Pos, SectType> =
            OrderedMap::create(&path, 20 * 1024, key_size, value_size, 1).unwrap();
        map.insert(Pos::new(0, 0), SectType::Shaolin).unwrap();
        let err = map.insert(Pos::new(1, 1), SectType::WuDang).unwrap_err();
        assert!(matches!(err, PersistError::Full(1)));
    }

    #[test]
    fn torn_slot_is_dropped_on_restore() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("owner_map.mmap");
        let key_size = fixed_encoded_size(&Pos::new(0, 0)).unwrap();
        let value_size = fixed_encoded_size(&SectType::None).unwrap();

        {
            let mut map: OrderedMap<Pos, SectType> =
                OrderedMap::create(&path, 20 * 1024, key_size, value_size, 4).unwrap();
            map.insert(Pos::new(0, 0), SectType::Shaolin).unwrap();
        }

        // Corrupt the committed slot's payload without updating its CRC,
        // simulating a torn write.
        {
            let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            let mut mmap = unsafe { MmapOptions::new().map_mut(&file).unwrap() };
            let off = slot_offset(0, SLOT_HDR_SIZE + key_size + value_size);
            mmap[off + SLOT_HDR_SIZE] ^= 0xFF;
            mmap.flush().unwrap();
        }

        let restored: OrderedMap<Pos, SectType> = OrderedMap::restore(&path).unwrap();
        assert_eq!(restored.len(), 0);
        assert_eq!(restored.max_size(), 4);
    }
}
