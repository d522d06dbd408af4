//! Process-shared synchronization primitives and the shutdown token.
//!
//! The primitives are meant to live inside a [`SharedRegion`](crate::shm::SharedRegion):
//! they are `#[repr(C)]` wrappers over POSIX unnamed semaphores and pthread
//! mutexes/condition variables initialized with `PTHREAD_PROCESS_SHARED`.
//!
//! Every blocking wait is a loop of timed waits of [`WAIT_TICK`]. Before each
//! tick the caller-supplied check runs; returning an error from it (usually
//! [`Error::Cancelled`]) aborts the wait without holding anything beyond
//! what the caller already held. `EINTR` and timeouts just start the next tick.

use crate::error::{Error, Result};
use std::cell::UnsafeCell;
use std::io;
use std::mem::MaybeUninit;
use std::ptr::addr_of_mut;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Upper bound on how long a blocked thread goes without checking for
/// cancellation.
pub const WAIT_TICK: Duration = Duration::from_millis(20);

// =============================================================================
// Shutdown
// =============================================================================

/// Cancellation context shared by every thread taking part in one service.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// `Err(Error::Cancelled)` once triggered. Usable directly as a wait check.
    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn deadline(clock: libc::clockid_t) -> libc::timespec {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(clock, &mut ts) };
    ts.tv_sec += WAIT_TICK.as_secs() as libc::time_t;
    ts.tv_nsec += WAIT_TICK.subsec_nanos() as libc::c_long;
    if ts.tv_nsec >= 1_000_000_000 {
        ts.tv_nsec -= 1_000_000_000;
        ts.tv_sec += 1;
    }
    ts
}

fn check_rc(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

// =============================================================================
// Semaphore
// =============================================================================

/// Counting semaphore placed in shared memory.
#[repr(C)]
pub struct ShmSemaphore {
    inner: UnsafeCell<libc::sem_t>,
}

unsafe impl Send for ShmSemaphore {}
unsafe impl Sync for ShmSemaphore {}

impl ShmSemaphore {
    /// Initializes the semaphore in place.
    ///
    /// # Safety
    /// `this` must point into memory mapped by every process that will use
    /// the semaphore, and must not be in use yet.
    pub unsafe fn init(this: *mut Self, value: u32) -> io::Result<()> {
        let raw = unsafe { UnsafeCell::raw_get(addr_of_mut!((*this).inner)) };
        if unsafe { libc::sem_init(raw, 1, value) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn raw(&self) -> *mut libc::sem_t {
        self.inner.get()
    }

    pub fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.raw()) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Takes one permit without blocking. Returns `false` if none is available.
    pub fn try_acquire(&self) -> io::Result<bool> {
        loop {
            if unsafe { libc::sem_trywait(self.raw()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Blocks until a permit is available, running `check` before every tick.
    pub fn acquire(&self, check: impl Fn() -> Result<()>) -> Result<()> {
        loop {
            check()?;
            let ts = deadline(libc::CLOCK_REALTIME);
            if unsafe { libc::sem_timedwait(self.raw(), &ts) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) | Some(libc::EINTR) => continue,
                _ => return Err(Error::Sync(err)),
            }
        }
    }

    /// Like [`acquire`](Self::acquire), but the permit goes back to the
    /// semaphore when the returned guard drops unless it is
    /// [forgotten](Permit::forget).
    pub fn acquire_permit(&self, check: impl Fn() -> Result<()>) -> Result<Permit<'_>> {
        self.acquire(check)?;
        Ok(Permit {
            sem: self,
            armed: true,
        })
    }

    /// Current count. Zero while threads are blocked on it.
    pub fn value(&self) -> i32 {
        let mut value: libc::c_int = 0;
        unsafe { libc::sem_getvalue(self.raw(), &mut value) };
        value
    }
}

/// One permit taken from a [`ShmSemaphore`].
#[must_use = "dropping a permit returns it immediately"]
pub struct Permit<'a> {
    sem: &'a ShmSemaphore,
    armed: bool,
}

impl Permit<'_> {
    /// Keeps the permit taken. Whoever takes over the resource posts it back.
    pub fn forget(mut self) {
        self.armed = false;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.sem.post() {
                tracing::error!(error = %e, "failed to return semaphore permit");
            }
        }
    }
}

// =============================================================================
// Mutex
// =============================================================================

/// Process-shared pthread mutex.
#[repr(C)]
pub struct ShmMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for ShmMutex {}
unsafe impl Sync for ShmMutex {}

impl ShmMutex {
    /// Initializes the mutex in place.
    ///
    /// # Safety
    /// Same contract as [`ShmSemaphore::init`].
    pub unsafe fn init(this: *mut Self) -> io::Result<()> {
        let raw = unsafe { UnsafeCell::raw_get(addr_of_mut!((*this).inner)) };
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        unsafe {
            check_rc(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
            let result = check_rc(libc::pthread_mutexattr_setpshared(
                attr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            ))
            .and_then(|()| check_rc(libc::pthread_mutex_init(raw, attr.as_ptr())));
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            result
        }
    }

    fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.inner.get()
    }

    pub fn lock(&self) -> io::Result<ShmMutexGuard<'_>> {
        check_rc(unsafe { libc::pthread_mutex_lock(self.raw()) })?;
        Ok(ShmMutexGuard { mutex: self })
    }
}

pub struct ShmMutexGuard<'a> {
    mutex: &'a ShmMutex,
}

impl Drop for ShmMutexGuard<'_> {
    fn drop(&mut self) {
        unsafe { libc::pthread_mutex_unlock(self.mutex.raw()) };
    }
}

// =============================================================================
// Condition variable
// =============================================================================

/// Process-shared pthread condition variable on `CLOCK_MONOTONIC`.
#[repr(C)]
pub struct ShmCondvar {
    inner: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for ShmCondvar {}
unsafe impl Sync for ShmCondvar {}

impl ShmCondvar {
    /// Initializes the condition variable in place.
    ///
    /// # Safety
    /// Same contract as [`ShmSemaphore::init`].
    pub unsafe fn init(this: *mut Self) -> io::Result<()> {
        let raw = unsafe { UnsafeCell::raw_get(addr_of_mut!((*this).inner)) };
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        unsafe {
            check_rc(libc::pthread_condattr_init(attr.as_mut_ptr()))?;
            let result = check_rc(libc::pthread_condattr_setpshared(
                attr.as_mut_ptr(),
                libc::PTHREAD_PROCESS_SHARED,
            ))
            .and_then(|()| {
                check_rc(libc::pthread_condattr_setclock(
                    attr.as_mut_ptr(),
                    libc::CLOCK_MONOTONIC,
                ))
            })
            .and_then(|()| check_rc(libc::pthread_cond_init(raw, attr.as_ptr())));
            libc::pthread_condattr_destroy(attr.as_mut_ptr());
            result
        }
    }

    fn raw(&self) -> *mut libc::pthread_cond_t {
        self.inner.get()
    }

    pub fn notify_one(&self) -> io::Result<()> {
        check_rc(unsafe { libc::pthread_cond_signal(self.raw()) })
    }

    /// Waits while `condition` holds. `condition` runs with the mutex held.
    ///
    /// On error the guard is still held and `condition` was true at the
    /// last evaluation.
    pub fn wait_while(
        &self,
        guard: &mut ShmMutexGuard<'_>,
        mut condition: impl FnMut() -> bool,
        check: impl Fn() -> Result<()>,
    ) -> Result<()> {
        while condition() {
            check()?;
            let ts = deadline(libc::CLOCK_MONOTONIC);
            let rc = unsafe { libc::pthread_cond_timedwait(self.raw(), guard.mutex.raw(), &ts) };
            match rc {
                0 | libc::ETIMEDOUT | libc::EINTR => {}
                e => return Err(Error::Sync(io::Error::from_raw_os_error(e))),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    // Leaked so that the primitives never move after initialization.
    fn leaked_semaphore(value: u32) -> &'static ShmSemaphore {
        let sem = Box::leak(Box::new(MaybeUninit::<ShmSemaphore>::uninit()));
        unsafe {
            ShmSemaphore::init(sem.as_mut_ptr(), value).unwrap();
            sem.assume_init_ref()
        }
    }

    fn leaked_pair() -> (&'static ShmMutex, &'static ShmCondvar) {
        let mutex = Box::leak(Box::new(MaybeUninit::<ShmMutex>::uninit()));
        let cond = Box::leak(Box::new(MaybeUninit::<ShmCondvar>::uninit()));
        unsafe {
            ShmMutex::init(mutex.as_mut_ptr()).unwrap();
            ShmCondvar::init(cond.as_mut_ptr()).unwrap();
            (mutex.assume_init_ref(), cond.assume_init_ref())
        }
    }

    #[test]
    fn test_permit_returns_on_drop() {
        let sem = leaked_semaphore(2);
        let shutdown = Shutdown::new();
        {
            let _a = sem.acquire_permit(|| shutdown.check()).unwrap();
            let b = sem.acquire_permit(|| shutdown.check()).unwrap();
            assert_eq!(sem.value(), 0);
            b.forget();
        }
        assert_eq!(sem.value(), 1);
        assert!(sem.try_acquire().unwrap());
        assert!(!sem.try_acquire().unwrap());
    }

    #[test]
    fn test_acquire_cancelled() {
        let sem = leaked_semaphore(0);
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.trigger();
        });

        let start = Instant::now();
        let result = sem.acquire(|| shutdown.check());
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(sem.value(), 0);
        t.join().unwrap();
    }

    #[test]
    fn test_acquire_wakes_on_post() {
        let sem = leaked_semaphore(0);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            sem.post().unwrap();
        });
        sem.acquire(|| Ok(())).unwrap();
        assert_eq!(sem.value(), 0);
        t.join().unwrap();
    }

    #[test]
    fn test_condvar_handshake() {
        let (mutex, cond) = leaked_pair();
        let flag = Arc::new(AtomicBool::new(false));

        let f2 = flag.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let _guard = mutex.lock().unwrap();
            f2.store(true, Ordering::Relaxed);
            cond.notify_one().unwrap();
        });

        let mut guard = mutex.lock().unwrap();
        cond.wait_while(&mut guard, || !flag.load(Ordering::Relaxed), || Ok(()))
            .unwrap();
        drop(guard);
        t.join().unwrap();
    }

    #[test]
    fn test_condvar_wait_cancelled() {
        let (mutex, cond) = leaked_pair();
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut guard = mutex.lock().unwrap();
        let result = cond.wait_while(&mut guard, || true, || shutdown.check());
        assert!(matches!(result, Err(Error::Cancelled)));
        drop(guard);
        // The guard released the mutex.
        drop(mutex.lock().unwrap());
    }
}
