//! Named queue segment shared between processes.
//!
//! The segment is a regular file (normally on tmpfs under `/dev/shm`) mapped
//! `MAP_SHARED`. Layout, little-endian:
//!
//! ```text
//! 0   magic          [u8; 8]  "CTQUEUE\0", written last during init
//! 8   version        u32
//! 12  slot_size      u32
//! 16  capacity       u64
//! 24  elem_capacity  u64
//! 32  head           u64      monotonically increasing pop cursor
//! 40  tail           u64      monotonically increasing push cursor
//! 48  reserved       [u8; 16]
//! 64  slots          capacity * slot_size, each { len: u32, bytes[len] }
//! ```
//!
//! Every operation runs under an exclusive `flock` on the segment file and
//! commits with one aligned 8-byte atomic store: the slot is written before
//! `tail` moves and read before `head` moves. A participant that dies
//! mid-operation loses its lock with its file descriptors and never exposes a
//! torn slot.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{Result, TieringError};

const MAGIC: [u8; 8] = *b"CTQUEUE\0";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 64;

const OFF_VERSION: usize = 8;
const OFF_SLOT_SIZE: usize = 12;
const OFF_CAPACITY: usize = 16;
const OFF_ELEM_CAPACITY: usize = 24;
const OFF_HEAD: usize = 32;
const OFF_TAIL: usize = 40;

const LEN_PREFIX: usize = 4;

/// Bytes per slot for `elem_capacity`, or `None` when the slot would not fit
/// the header's `u32` field.
pub(super) fn slot_size_for(elem_capacity: usize) -> Option<usize> {
    LEN_PREFIX
        .checked_add(elem_capacity.checked_sub(1)?)?
        .checked_next_multiple_of(8)
        .filter(|size| u32::try_from(*size).is_ok())
}

fn segment_len(capacity: usize, slot_size: usize) -> Option<usize> {
    slot_size.checked_mul(capacity)?.checked_add(HEADER_LEN)
}

/// What an existing file under the segment name turned out to be.
#[derive(Debug, PartialEq, Eq)]
enum Existing {
    /// Empty, or zero-filled where the magic goes (interrupted init).
    Blank,
    Queue,
}

#[derive(Debug)]
pub(super) struct SharedSegment {
    name: String,
    path: PathBuf,
    file: File,
    map: MmapMut,
    capacity: u64,
    elem_capacity: usize,
    slot_size: usize,
}

impl SharedSegment {
    /// Creates the segment, or attaches to it when a compatible one exists.
    pub(super) fn open(
        dir: &Path,
        name: &str,
        capacity: usize,
        elem_capacity: usize,
    ) -> Result<Self> {
        let allocation = |reason: String| TieringError::Allocation {
            queue: name.to_string(),
            reason,
        };

        let slot_size = slot_size_for(elem_capacity).ok_or_else(|| {
            allocation(format!("element capacity {elem_capacity} is too large"))
        })?;
        let total = segment_len(capacity, slot_size)
            .ok_or_else(|| allocation("segment size overflows".into()))?;
        let path = dir.join(name);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o660)
            .open(&path)
            .map_err(|err| {
                allocation(format!("open {}: {err}", path.display()))
            })?;

        let guard = lock_exclusive(name, &file)?;

        let current_len = file
            .metadata()
            .map_err(|err| {
                allocation(format!("stat {}: {err}", path.display()))
            })?
            .len();

        let existing = inspect_existing(name, &file, current_len)?;
        match existing {
            Existing::Queue => validate_header(
                name,
                &file,
                current_len,
                total,
                capacity,
                elem_capacity,
            )?,
            Existing::Blank => {
                file.set_len(total as u64).map_err(|err| {
                    allocation(format!("size {}: {err}", path.display()))
                })?;
            }
        }

        // SAFETY: the file stays open for the lifetime of the mapping and all
        // concurrent access to the mapped bytes happens under the segment
        // flock (slots) or through atomics (cursors).
        let map = unsafe { MmapOptions::new().len(total).map_mut(&file) }
            .map_err(|err| {
                allocation(format!("mmap {}: {err}", path.display()))
            })?;

        let mut segment = Self {
            name: name.to_string(),
            path,
            file,
            map,
            capacity: capacity as u64,
            elem_capacity,
            slot_size,
        };

        if existing == Existing::Queue {
            let head = segment.load(OFF_HEAD);
            let tail = segment.load(OFF_TAIL);
            segment.check_cursors(head, tail)?;
            tracing::info!(
                target: "cloudtier::queue",
                queue = %segment.name,
                segment = %segment.path.display(),
                resumed = tail - head,
                "attached to existing queue segment"
            );
        } else {
            segment.initialize();
            tracing::info!(
                target: "cloudtier::queue",
                queue = %segment.name,
                segment = %segment.path.display(),
                capacity,
                elem_capacity,
                "created queue segment"
            );
        }

        drop(guard);
        Ok(segment)
    }

    pub(super) fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn push(&mut self, bytes: &[u8]) -> Result<bool> {
        let _guard = lock_exclusive(&self.name, &self.file)?;
        let head = self.load(OFF_HEAD);
        let tail = self.load(OFF_TAIL);
        let count = self.check_cursors(head, tail)?;
        if count >= self.capacity {
            return Ok(false);
        }

        let offset = self.slot_offset(tail);
        let body = offset + LEN_PREFIX;
        let len = bytes.len();
        self.map[offset..body].copy_from_slice(&(len as u32).to_le_bytes());
        self.map[body..body + len].copy_from_slice(bytes);
        self.store(OFF_TAIL, tail + 1);
        Ok(true)
    }

    pub(super) fn pop(&mut self) -> Result<Option<Vec<u8>>> {
        let _guard = lock_exclusive(&self.name, &self.file)?;
        let head = self.load(OFF_HEAD);
        let tail = self.load(OFF_TAIL);
        if self.check_cursors(head, tail)? == 0 {
            return Ok(None);
        }

        let offset = self.slot_offset(head);
        let body = offset + LEN_PREFIX;
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&self.map[offset..body]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len == 0 || len > self.elem_capacity - 1 {
            let slot = head % self.capacity;
            let reason = format!("slot {slot} holds invalid length {len}");
            return Err(self.corrupt(reason));
        }
        let bytes = self.map[body..body + len].to_vec();
        self.store(OFF_HEAD, head + 1);
        Ok(Some(bytes))
    }

    pub(super) fn len(&mut self) -> Result<usize> {
        let _guard = lock_exclusive(&self.name, &self.file)?;
        let head = self.load(OFF_HEAD);
        let tail = self.load(OFF_TAIL);
        Ok(self.check_cursors(head, tail)? as usize)
    }

    /// Flushes the mapping; the segment file itself is kept.
    pub(super) fn close(self) {
        if let Err(err) = self.map.flush() {
            tracing::warn!(
                target: "cloudtier::queue",
                queue = %self.name,
                error = %err,
                "failed to flush queue segment"
            );
        }
    }

    fn initialize(&mut self) {
        let elem_capacity = self.elem_capacity as u64;
        self.write_field(OFF_VERSION, &VERSION.to_le_bytes());
        self.write_field(OFF_SLOT_SIZE, &(self.slot_size as u32).to_le_bytes());
        self.write_field(OFF_CAPACITY, &self.capacity.to_le_bytes());
        self.write_field(OFF_ELEM_CAPACITY, &elem_capacity.to_le_bytes());
        self.store(OFF_HEAD, 0);
        self.store(OFF_TAIL, 0);
        self.map[..MAGIC.len()].copy_from_slice(&MAGIC);
    }

    fn write_field(&mut self, offset: usize, bytes: &[u8]) {
        self.map[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn slot_offset(&self, cursor: u64) -> usize {
        HEADER_LEN + (cursor % self.capacity) as usize * self.slot_size
    }

    fn check_cursors(&self, head: u64, tail: u64) -> Result<u64> {
        match tail.checked_sub(head) {
            Some(count) if count <= self.capacity => Ok(count),
            _ => Err(self.corrupt(format!(
                "cursors out of range (head {head}, tail {tail})"
            ))),
        }
    }

    fn corrupt(&self, reason: String) -> TieringError {
        TieringError::CorruptSegment {
            name: self.name.clone(),
            reason,
        }
    }

    fn cursor(&mut self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset % 8 == 0 && offset + 8 <= HEADER_LEN);
        let ptr = self.map.as_mut_ptr();
        // SAFETY: the mapping is page aligned and `offset` is a multiple of 8
        // inside the header, so the pointer is valid and aligned for as long
        // as `self.map` lives. Cursor words are only accessed atomically.
        unsafe { AtomicU64::from_ptr(ptr.add(offset).cast::<u64>()) }
    }

    fn load(&mut self, offset: usize) -> u64 {
        u64::from_le(self.cursor(offset).load(Ordering::Acquire))
    }

    fn store(&mut self, offset: usize, value: u64) {
        self.cursor(offset).store(value.to_le(), Ordering::Release);
    }
}

fn lock_exclusive(name: &str, file: &File) -> Result<Flock<File>> {
    let mut handle = file.try_clone()?;
    loop {
        match Flock::lock(handle, FlockArg::LockExclusive) {
            Ok(guard) => return Ok(guard),
            Err((returned, Errno::EINTR)) => handle = returned,
            Err((_, errno)) => {
                return Err(TieringError::Lock {
                    name: name.to_string(),
                    source: errno,
                });
            }
        }
    }
}

/// Classifies a file found under the segment name by its leading bytes.
///
/// The magic is written last, so a zero prefix is an init that never
/// finished. Anything else that is not a complete header belongs to someone
/// else and is left untouched.
fn inspect_existing(
    name: &str,
    file: &File,
    current_len: u64,
) -> Result<Existing> {
    if current_len == 0 {
        return Ok(Existing::Blank);
    }

    let readable = current_len.min(MAGIC.len() as u64) as usize;
    let mut prefix = [0u8; MAGIC.len()];
    file.read_exact_at(&mut prefix[..readable], 0)?;
    let prefix = &prefix[..readable];

    if prefix.iter().all(|byte| *byte == 0) {
        return Ok(Existing::Blank);
    }
    if current_len >= HEADER_LEN as u64 && prefix == MAGIC {
        return Ok(Existing::Queue);
    }
    Err(TieringError::NameConflict {
        name: name.to_string(),
        reason: "file does not identify a cloudtier queue".into(),
    })
}

fn validate_header(
    name: &str,
    file: &File,
    current_len: u64,
    expected_len: usize,
    capacity: usize,
    elem_capacity: usize,
) -> Result<()> {
    let conflict = |reason: String| TieringError::NameConflict {
        name: name.to_string(),
        reason,
    };

    let mut header = [0u8; HEADER_LEN];
    file.read_exact_at(&mut header, 0)?;

    let read_u32 = |off: usize| {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&header[off..off + 4]);
        u32::from_le_bytes(buf)
    };
    let read_u64 = |off: usize| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&header[off..off + 8]);
        u64::from_le_bytes(buf)
    };

    let version = read_u32(OFF_VERSION);
    if version != VERSION {
        return Err(conflict(format!(
            "layout version {version}, expected {VERSION}"
        )));
    }
    let found_capacity = read_u64(OFF_CAPACITY);
    if found_capacity != capacity as u64 {
        return Err(conflict(format!(
            "capacity {found_capacity}, expected {capacity}"
        )));
    }
    let found_elem = read_u64(OFF_ELEM_CAPACITY);
    if found_elem != elem_capacity as u64 {
        return Err(conflict(format!(
            "element capacity {found_elem}, expected {elem_capacity}"
        )));
    }
    let found_slot = read_u32(OFF_SLOT_SIZE) as usize;
    if Some(found_slot) != slot_size_for(elem_capacity) {
        return Err(conflict(format!(
            "slot size {found_slot} does not match layout"
        )));
    }
    if current_len != expected_len as u64 {
        return Err(conflict(format!(
            "segment is {current_len} bytes, expected {expected_len}"
        )));
    }
    Ok(())
}
