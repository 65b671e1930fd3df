//! Bounded cross-process request ring.
//!
//! One mutex and two condition variables, all process-shared and embedded
//! in the mapped header, guard the ring indices and slots. Both directions
//! use the monitor pattern (lock, loop while the predicate holds, wait,
//! act, unlock), so spurious wakeups and multi-waiter races never corrupt
//! the indices.

use std::mem;
use std::str;

use shared_memory::Shmem;

use crate::core::{
    self, RequestSlot, RingHeader, SegmentConfig, MAX_KEY_LEN, MAX_VALUE_LEN,
};
use crate::errors::ShmKvError;
use crate::sync::{SharedCondvar, SharedMutex};

const OP_INSERT: u8 = 0;
const OP_READ: u8 = 1;
const OP_DELETE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Read,
    Delete,
}

/// A tagged operation travelling through the ring. Value is present for
/// Insert and absent for Read/Delete. Copied by value into and out of the
/// ring slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub operation: Operation,
    pub key: String,
    pub value: Option<String>,
}

impl Request {
    pub fn insert<K: Into<String>, V: Into<String>>(key: K, value: V) -> Request {
        Request {
            operation: Operation::Insert,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn read<K: Into<String>>(key: K) -> Request {
        Request {
            operation: Operation::Read,
            key: key.into(),
            value: None,
        }
    }

    pub fn delete<K: Into<String>>(key: K) -> Request {
        Request {
            operation: Operation::Delete,
            key: key.into(),
            value: None,
        }
    }
}

fn check_bounds(request: &Request) -> Result<(), ShmKvError> {
    if request.key.len() > MAX_KEY_LEN {
        return Err(ShmKvError::Logic(format!(
            "key is {} bytes, slot holds at most {}",
            request.key.len(),
            MAX_KEY_LEN
        )));
    }
    if let Some(value) = &request.value {
        if value.len() > MAX_VALUE_LEN {
            return Err(ShmKvError::Logic(format!(
                "value is {} bytes, slot holds at most {}",
                value.len(),
                MAX_VALUE_LEN
            )));
        }
    }
    if request.operation == Operation::Insert && request.value.is_none() {
        return Err(ShmKvError::Logic(format!(
            "insert for key {:?} carries no value",
            request.key
        )));
    }
    Ok(())
}

/// Caller has validated bounds via `check_bounds`.
fn encode_request(request: &Request, slot: &mut RequestSlot) {
    slot.op = match request.operation {
        Operation::Insert => OP_INSERT,
        Operation::Read => OP_READ,
        Operation::Delete => OP_DELETE,
    };
    slot.key_len = request.key.len() as u32;
    slot.key[..request.key.len()].copy_from_slice(request.key.as_bytes());
    match &request.value {
        Some(value) => {
            slot.value_len = value.len() as u32;
            slot.value[..value.len()].copy_from_slice(value.as_bytes());
        }
        None => slot.value_len = 0,
    }
}

fn decode_request(slot: &RequestSlot) -> Result<Request, ShmKvError> {
    let operation = match slot.op {
        OP_INSERT => Operation::Insert,
        OP_READ => Operation::Read,
        OP_DELETE => Operation::Delete,
        other => {
            return Err(ShmKvError::Logic(format!(
                "slot holds unknown operation tag {}",
                other
            )))
        }
    };
    let key_len = slot.key_len as usize;
    if key_len > MAX_KEY_LEN {
        return Err(ShmKvError::Logic(format!(
            "slot key length {} exceeds {}",
            key_len, MAX_KEY_LEN
        )));
    }
    let key = str::from_utf8(&slot.key[..key_len])
        .map_err(|e| ShmKvError::Logic(format!("slot key is not valid UTF-8: {}", e)))?
        .to_owned();
    let value = if operation == Operation::Insert {
        let value_len = slot.value_len as usize;
        if value_len > MAX_VALUE_LEN {
            return Err(ShmKvError::Logic(format!(
                "slot value length {} exceeds {}",
                value_len, MAX_VALUE_LEN
            )));
        }
        Some(
            str::from_utf8(&slot.value[..value_len])
                .map_err(|e| ShmKvError::Logic(format!("slot value is not valid UTF-8: {}", e)))?
                .to_owned(),
        )
    } else {
        None
    };
    Ok(Request {
        operation,
        key,
        value,
    })
}

/// One process's handle onto the shared ring. The creating process
/// initializes the embedded primitives and later tears them down; every
/// other process merely attaches.
pub struct RequestQueue {
    shmem: Shmem,
    header: *mut RingHeader,
    slots: *mut RequestSlot,
    capacity: usize,
    owner: bool,
}

// The indices and slots are only touched while the embedded process-shared
// mutex is held, so threads of one process may share a handle.
unsafe impl Send for RequestQueue {}
unsafe impl Sync for RequestQueue {}

impl RequestQueue {
    /// Creates the segment (or reopens an existing link), and when this
    /// process created it, zero-initializes the indices, marks the ring
    /// running and initializes the process-shared primitives. A primitive
    /// failure here is fatal: the queue never comes up half-initialized.
    pub fn create(cfg: &SegmentConfig) -> Result<RequestQueue, ShmKvError> {
        let (shmem, created) = core::create_segment(cfg)?;
        let queue = RequestQueue::from_mapping(shmem, cfg.capacity, created);
        if created {
            unsafe { queue.init_header()? };
        }
        Ok(queue)
    }

    /// Attaches to a segment some server process already created.
    pub fn attach(cfg: &SegmentConfig) -> Result<RequestQueue, ShmKvError> {
        let shmem = core::open_segment(cfg)?;
        Ok(RequestQueue::from_mapping(shmem, cfg.capacity, false))
    }

    fn from_mapping(shmem: Shmem, capacity: usize, owner: bool) -> RequestQueue {
        let base = shmem.as_ptr();
        let header = base as *mut RingHeader;
        let slots = unsafe { base.add(mem::size_of::<RingHeader>()) } as *mut RequestSlot;
        RequestQueue {
            shmem,
            header,
            slots,
            capacity,
            owner,
        }
    }

    unsafe fn init_header(&self) -> Result<(), ShmKvError> {
        let header = &mut *self.header;
        let state = header.state();
        state.read_index = 0;
        state.write_index = 0;
        state.running = true;
        SharedMutex::init_in_place(&mut header.mutex)?;
        SharedCondvar::init_in_place(&mut header.not_full)?;
        SharedCondvar::init_in_place(&mut header.not_empty)?;
        Ok(())
    }

    fn header(&self) -> &RingHeader {
        unsafe { &*self.header }
    }

    /// Blocks until a slot is free, then copies `request` into it and wakes
    /// one waiting consumer. If shutdown fires while the caller is parked
    /// on a full ring, the call wakes and the request is rejected with
    /// [`ShmKvError::Stopped`] rather than hanging.
    pub fn enqueue(&self, request: &Request) -> Result<(), ShmKvError> {
        check_bounds(request)?;
        let header = self.header();
        let mut guard = header.mutex.lock()?;
        loop {
            {
                let state = unsafe { header.state() };
                if !state.running {
                    return Err(ShmKvError::Stopped);
                }
                if !state.is_full(self.capacity) {
                    break;
                }
            }
            header.not_full.wait(&mut guard)?;
        }
        let state = unsafe { header.state() };
        encode_request(request, unsafe { &mut *self.slots.add(state.write_index) });
        state.write_index = (state.write_index + 1) % self.capacity;
        header.not_empty.signal()?;
        drop(guard);
        Ok(())
    }

    /// Blocks until a request is available or shutdown is signaled.
    /// Returns `None` on shutdown, even when requests are still queued:
    /// undequeued requests are abandoned by design. The running flag is
    /// re-checked on every wakeup so a broadcast during active draining is
    /// never missed.
    pub fn dequeue(&self) -> Result<Option<Request>, ShmKvError> {
        let header = self.header();
        let mut guard = header.mutex.lock()?;
        loop {
            {
                let state = unsafe { header.state() };
                if !state.running {
                    return Ok(None);
                }
                if !state.is_empty() {
                    break;
                }
            }
            header.not_empty.wait(&mut guard)?;
        }
        let state = unsafe { header.state() };
        let request = decode_request(unsafe { &*self.slots.add(state.read_index) })?;
        state.read_index = (state.read_index + 1) % self.capacity;
        header.not_full.signal()?;
        drop(guard);
        Ok(Some(request))
    }

    /// Transitions running→stopped and broadcasts both conditions so every
    /// parked consumer observes the stop result and every parked producer
    /// is woken to be rejected. The flag never transitions back.
    pub fn signal_shutdown(&self) -> Result<(), ShmKvError> {
        let header = self.header();
        let guard = header.mutex.lock()?;
        unsafe { header.state() }.running = false;
        header.not_empty.broadcast()?;
        header.not_full.broadcast()?;
        drop(guard);
        Ok(())
    }

    pub fn is_running(&self) -> Result<bool, ShmKvError> {
        let header = self.header();
        let _guard = header.mutex.lock()?;
        Ok(unsafe { header.state() }.running)
    }

    /// Occupied slot count; never exceeds `capacity() - 1`.
    pub fn len(&self) -> Result<usize, ShmKvError> {
        let header = self.header();
        let _guard = header.mutex.lock()?;
        Ok(unsafe { header.state() }.occupied(self.capacity))
    }

    pub fn is_empty(&self) -> Result<bool, ShmKvError> {
        Ok(self.len()? == 0)
    }

    /// Slot count of the ring; usable capacity is one less.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Destroys the embedded primitives. Creating process only, after
    /// every attached process has stopped using the queue; the segment
    /// itself is unlinked when this handle drops.
    pub fn teardown(&self) -> Result<(), ShmKvError> {
        if !self.owner {
            return Err(ShmKvError::Logic(
                "teardown called on a non-owning queue handle".to_string(),
            ));
        }
        let header = self.header();
        unsafe {
            header.mutex.destroy()?;
            header.not_full.destroy()?;
            header.not_empty.destroy()?;
        }
        Ok(())
    }

    /// Size in bytes of the mapped segment.
    pub fn segment_len(&self) -> usize {
        self.shmem.len()
    }
}
