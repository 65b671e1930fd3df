//! Mutex and condition variable usable across process boundaries.
//!
//! The primitives live inside a memory-mapped struct, so they are built on
//! raw pthread handles initialized with `PTHREAD_PROCESS_SHARED`. They carry
//! an explicit lifecycle: `init_in_place` once from the creating process,
//! `destroy` from the same process after every attacher is gone. Ordinary
//! in-process locks must never be placed in the segment.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crate::errors::ShmKvError;

fn check(rc: libc::c_int, op: &'static str) -> Result<(), ShmKvError> {
    if rc == 0 {
        Ok(())
    } else {
        Err(ShmKvError::Sync { op, errno: rc })
    }
}

#[repr(C)]
pub struct SharedMutex {
    raw: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for SharedMutex {}
unsafe impl Sync for SharedMutex {}

impl SharedMutex {
    /// Initializes the mutex storage at `this` with a process-shared
    /// attribute.
    ///
    /// # Safety
    ///
    /// `this` must point to writable memory that stays mapped (and never
    /// moves) for as long as any process uses the mutex. Call exactly once,
    /// from the creating process, before any `lock`.
    pub unsafe fn init_in_place(this: *mut SharedMutex) -> Result<(), ShmKvError> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(
            libc::pthread_mutexattr_init(attr.as_mut_ptr()),
            "pthread_mutexattr_init",
        )?;
        let result = check(
            libc::pthread_mutexattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED),
            "pthread_mutexattr_setpshared",
        )
        .and_then(|_| {
            check(
                libc::pthread_mutex_init((*this).raw.get(), attr.as_ptr()),
                "pthread_mutex_init",
            )
        });
        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
        result
    }

    pub fn lock(&self) -> Result<SharedMutexGuard<'_>, ShmKvError> {
        check(
            unsafe { libc::pthread_mutex_lock(self.raw.get()) },
            "pthread_mutex_lock",
        )?;
        Ok(SharedMutexGuard { mutex: self })
    }

    /// # Safety
    ///
    /// Creating process only, after every attached process has stopped
    /// using the mutex. No `lock` may follow.
    pub unsafe fn destroy(&self) -> Result<(), ShmKvError> {
        check(
            libc::pthread_mutex_destroy(self.raw.get()),
            "pthread_mutex_destroy",
        )
    }
}

pub struct SharedMutexGuard<'a> {
    mutex: &'a SharedMutex,
}

impl Drop for SharedMutexGuard<'_> {
    fn drop(&mut self) {
        // Unlocking a held mutex only fails if the handle itself is torn,
        // at which point the process cannot continue anyway.
        unsafe { libc::pthread_mutex_unlock(self.mutex.raw.get()) };
    }
}

#[repr(C)]
pub struct SharedCondvar {
    raw: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for SharedCondvar {}
unsafe impl Sync for SharedCondvar {}

impl SharedCondvar {
    /// # Safety
    ///
    /// Same contract as [`SharedMutex::init_in_place`].
    pub unsafe fn init_in_place(this: *mut SharedCondvar) -> Result<(), ShmKvError> {
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        check(
            libc::pthread_condattr_init(attr.as_mut_ptr()),
            "pthread_condattr_init",
        )?;
        let result = check(
            libc::pthread_condattr_setpshared(attr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED),
            "pthread_condattr_setpshared",
        )
        .and_then(|_| {
            check(
                libc::pthread_cond_init((*this).raw.get(), attr.as_ptr()),
                "pthread_cond_init",
            )
        });
        libc::pthread_condattr_destroy(attr.as_mut_ptr());
        result
    }

    /// Atomically releases the guarded mutex and parks the caller; the
    /// mutex is held again when this returns. Wakeups may be spurious, so
    /// callers loop over their predicate.
    pub fn wait(&self, guard: &mut SharedMutexGuard<'_>) -> Result<(), ShmKvError> {
        check(
            unsafe { libc::pthread_cond_wait(self.raw.get(), guard.mutex.raw.get()) },
            "pthread_cond_wait",
        )
    }

    pub fn signal(&self) -> Result<(), ShmKvError> {
        check(
            unsafe { libc::pthread_cond_signal(self.raw.get()) },
            "pthread_cond_signal",
        )
    }

    pub fn broadcast(&self) -> Result<(), ShmKvError> {
        check(
            unsafe { libc::pthread_cond_broadcast(self.raw.get()) },
            "pthread_cond_broadcast",
        )
    }

    /// # Safety
    ///
    /// Same contract as [`SharedMutex::destroy`].
    pub unsafe fn destroy(&self) -> Result<(), ShmKvError> {
        check(
            libc::pthread_cond_destroy(self.raw.get()),
            "pthread_cond_destroy",
        )
    }
}
