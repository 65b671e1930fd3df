use std::cell::UnsafeCell;
use std::mem;

use serde_derive::{Deserialize, Serialize};
use shared_memory::{Shmem, ShmemConf, ShmemError};

use crate::errors::ShmKvError;
use crate::sync::{SharedCondvar, SharedMutex};

pub const MAX_KEY_LEN: usize = 128;
pub const MAX_VALUE_LEN: usize = 512;
pub const DEFAULT_CAPACITY: usize = 20;

pub static DEFAULT_DATA_DIR: &str = "/dev/shm";
pub static DEFAULT_FILE_NAME: &str = "shmkv-queue";

/// Mutable ring state. Only the holder of the header mutex may touch it.
#[repr(C)]
pub(crate) struct RingState {
    pub read_index: usize,
    pub write_index: usize,
    pub running: bool,
}

impl RingState {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.write_index == self.read_index
    }

    #[inline]
    pub fn is_full(&self, capacity: usize) -> bool {
        (self.write_index + 1) % capacity == self.read_index
    }

    #[inline]
    pub fn occupied(&self, capacity: usize) -> usize {
        (self.write_index + capacity - self.read_index) % capacity
    }
}

/// Fixed-layout header at the start of the segment; the request slots
/// follow it immediately. Every attaching process computes identical
/// offsets, so all fields are fixed-size. There is no versioning field:
/// attached processes agree on capacity and layout out-of-band through
/// their shared configuration.
#[repr(C)]
pub(crate) struct RingHeader {
    state: UnsafeCell<RingState>,
    pub mutex: SharedMutex,
    pub not_full: SharedCondvar,
    pub not_empty: SharedCondvar,
}

impl RingHeader {
    /// # Safety
    ///
    /// The header mutex must be held for the lifetime of the returned
    /// reference, and no other reference to the state may exist in this
    /// process at the same time.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn state(&self) -> &mut RingState {
        &mut *self.state.get()
    }
}

/// One ring slot: a fixed-size, owning copy of a request. No pointers into
/// producer or consumer memory ever enter the segment.
#[repr(C)]
pub(crate) struct RequestSlot {
    pub op: u8,
    pub key_len: u32,
    pub value_len: u32,
    pub key: [u8; MAX_KEY_LEN],
    pub value: [u8; MAX_VALUE_LEN],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub data_dir: String,
    pub file_name: String,
    pub capacity: usize,
}

impl Default for SegmentConfig {
    fn default() -> SegmentConfig {
        SegmentConfig {
            data_dir: DEFAULT_DATA_DIR.to_string(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl SegmentConfig {
    pub fn builder() -> SegmentConfigBuilder {
        SegmentConfigBuilder::default()
    }

    pub fn flink_path(&self) -> String {
        format!("{}/{}", self.data_dir, self.file_name)
    }

    /// Rejected configurations are fatal before any core object exists.
    /// One slot is sacrificed to tell full from empty, so a ring needs at
    /// least two slots to hold anything at all.
    pub fn validate(&self) -> Result<(), ShmKvError> {
        if self.capacity < 2 {
            return Err(ShmKvError::Logic(format!(
                "ring capacity must be at least 2, got {}",
                self.capacity
            )));
        }
        if self.data_dir.is_empty() || self.file_name.is_empty() {
            return Err(ShmKvError::Logic(
                "segment data_dir and file_name must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct SegmentConfigBuilder {
    data_dir: Option<String>,
    file_name: Option<String>,
    capacity: Option<usize>,
}

impl SegmentConfigBuilder {
    pub fn data_dir<S: Into<String>>(mut self, data_dir: S) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn file_name<S: Into<String>>(mut self, file_name: S) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Result<SegmentConfig, ShmKvError> {
        let cfg = SegmentConfig {
            data_dir: self.data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            file_name: self
                .file_name
                .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
            capacity: self.capacity.unwrap_or(DEFAULT_CAPACITY),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

pub(crate) fn segment_size(capacity: usize) -> usize {
    mem::size_of::<RingHeader>() + capacity * mem::size_of::<RequestSlot>()
}

/// Creates the named segment, or reopens it when the link already exists.
/// Returns whether this process created (and therefore owns) it.
pub(crate) fn create_segment(cfg: &SegmentConfig) -> Result<(Shmem, bool), ShmKvError> {
    cfg.validate()?;
    let conf = || {
        ShmemConf::new()
            .flink(cfg.flink_path())
            .size(segment_size(cfg.capacity))
    };
    match conf().create() {
        Ok(shmem) => Ok((shmem, true)),
        Err(ShmemError::LinkExists) => Ok((open_segment(cfg)?, false)),
        Err(e) => Err(e.into()),
    }
}

/// Attaches to an existing segment. Never initializes anything inside it.
pub(crate) fn open_segment(cfg: &SegmentConfig) -> Result<Shmem, ShmKvError> {
    cfg.validate()?;
    let shmem = ShmemConf::new().flink(cfg.flink_path()).open()?;
    if shmem.len() < segment_size(cfg.capacity) {
        return Err(ShmKvError::Logic(format!(
            "segment {} holds {} bytes but capacity {} needs {}; \
             attached processes must agree on the ring layout",
            cfg.flink_path(),
            shmem.len(),
            cfg.capacity,
            segment_size(cfg.capacity)
        )));
    }
    Ok(shmem)
}
