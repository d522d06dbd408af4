//! Synchronous slot-indexed request/response ring in shared memory.
//!
//! ## Layout
//!
//! ```text
//! [RingHeader][pad][Slot 0][Slot 1]...[Slot N-1]
//! ```
//!
//! The header holds the layout description, the liveness flag of the owning
//! side and the three semaphores. Every slot carries its own mutex and
//! condition variable, a state word and a request/response union.
//!
//! ## Handshake
//!
//! A requester takes an `empty_slots` permit, claims slot `next_index` under
//! `index_lock`, writes its request and posts `posted_slots`. The server
//! drains slots in order starting at slot 0, writes the response in place
//! and marks the slot `RESPONDED`. The requester copies the response out and
//! flips the state back to `POSTED`; only then does the server hand the slot
//! back through `empty_slots`.
//!
//! A requester cancelled before the server picked up its slot marks it
//! `ABANDONED`. The server skips the handler for such a slot and recycles it.
//!
//! A handler that cannot answer refuses the request instead. The slot is
//! then marked `REFUSED` and the requester fails with
//! [`Error::ServerDisconnected`].

use crate::Serial;
use crate::error::{Error, Result};
use crate::shm::SharedRegion;
use crate::sync::{ShmCondvar, ShmMutex, ShmSemaphore, Shutdown};
use std::cell::UnsafeCell;
use std::io;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::path::Path;
use std::ptr::{NonNull, addr_of_mut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// === Constants ===

const MAGIC: u64 = 0x5348_4D52_494E_4721; // "SHMRING!"
const VERSION: u32 = 2;

const POSTED: u32 = 0;
const RESPONDED: u32 = 1;
const ABANDONED: u32 = 2;
const REFUSED: u32 = 3;

fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

// === Header ===

#[repr(C)]
struct RingHeader {
    magic: AtomicU64,
    version: u32,
    slot_count: u32,
    req_size: u32,
    resp_size: u32,
    slot_size: u32,
    server_alive: AtomicBool,
    empty_slots: ShmSemaphore,
    posted_slots: ShmSemaphore,
    // Binary semaphore guarding `next_index`.
    index_lock: ShmSemaphore,
    next_index: UnsafeCell<u32>,
    // Owned by the serve loop. Survives a restart of the loop.
    serve_index: UnsafeCell<u32>,
}

// === Slot ===

#[repr(C)]
union Entry<Req: Copy, Resp: Copy> {
    req: Req,
    rsp: Resp,
}

#[repr(C)]
struct Slot<Req: Copy, Resp: Copy> {
    mutex: ShmMutex,
    cond: ShmCondvar,
    state: UnsafeCell<u32>,
    entry: UnsafeCell<Entry<Req, Resp>>,
}

fn slots_offset<Req: Serial, Resp: Serial>() -> usize {
    align_up(size_of::<RingHeader>(), align_of::<Slot<Req, Resp>>())
}

fn region_size<Req: Serial, Resp: Serial>(capacity: u32) -> usize {
    slots_offset::<Req, Resp>() + capacity as usize * size_of::<Slot<Req, Resp>>()
}

// =============================================================================
// Exchange
// =============================================================================

/// One request as seen by a [`RingChannel::serve`] handler.
///
/// The handler must call [`respond`](Self::respond) or
/// [`refuse`](Self::refuse) before returning.
pub struct Exchange<Req, Resp> {
    request: Req,
    reply: Option<Reply<Resp>>,
}

enum Reply<Resp> {
    Respond(Resp),
    Refuse,
}

impl<Req: Copy, Resp> Exchange<Req, Resp> {
    pub fn request(&self) -> Req {
        self.request
    }

    /// Sets the response written back into the slot. A later call replaces it.
    pub fn respond(&mut self, resp: Resp) {
        self.reply = Some(Reply::Respond(resp));
    }

    /// Answers without a response: the requester gets
    /// [`Error::ServerDisconnected`]. A later `respond` replaces it.
    pub fn refuse(&mut self) {
        self.reply = Some(Reply::Refuse);
    }

    pub fn has_responded(&self) -> bool {
        self.reply.is_some()
    }
}

// =============================================================================
// RingChannel
// =============================================================================

/// A fixed-capacity synchronous request/response channel in a named shared
/// memory segment.
///
/// The creating side owns the segment: it typically runs
/// [`serve`](Self::serve), and dropping it unlinks the name and tells
/// blocked requesters that the server is gone.
pub struct RingChannel<Req: Serial, Resp: Serial> {
    region: SharedRegion,
    header: NonNull<RingHeader>,
    slots: NonNull<Slot<Req, Resp>>,
    capacity: u32,
    serving: AtomicBool,
    _marker: PhantomData<(Req, Resp)>,
}

unsafe impl<Req: Serial + Send, Resp: Serial + Send> Send for RingChannel<Req, Resp> {}
unsafe impl<Req: Serial + Send, Resp: Serial + Send> Sync for RingChannel<Req, Resp> {}

impl<Req: Serial, Resp: Serial> RingChannel<Req, Resp> {
    /// Creates the segment and initializes every primitive in it.
    ///
    /// # Safety
    /// Every process opening the name must use the same `Req`/`Resp` types.
    /// Sizes are checked on open, field layout is not.
    pub unsafe fn create<P: AsRef<Path>>(path: P, capacity: u32) -> Result<Self> {
        assert!(capacity > 0, "ring capacity must be > 0");

        let name = path.as_ref().display().to_string();
        let size = region_size::<Req, Resp>(capacity);
        let region = unsafe { SharedRegion::create(&path, size) }
            .map_err(|source| Error::Region { name, source })?;

        let header = region.as_ptr() as *mut RingHeader;
        let slots = unsafe { region.as_ptr().add(slots_offset::<Req, Resp>()) } as *mut Slot<Req, Resp>;

        // The segment is zero-filled, so states start out POSTED and the
        // index at 0. Primitives must be initialized before the magic is
        // published.
        unsafe {
            addr_of_mut!((*header).version).write(VERSION);
            addr_of_mut!((*header).slot_count).write(capacity);
            addr_of_mut!((*header).req_size).write(size_of::<Req>() as u32);
            addr_of_mut!((*header).resp_size).write(size_of::<Resp>() as u32);
            addr_of_mut!((*header).slot_size).write(size_of::<Slot<Req, Resp>>() as u32);
            ShmSemaphore::init(addr_of_mut!((*header).empty_slots), capacity)?;
            ShmSemaphore::init(addr_of_mut!((*header).posted_slots), 0)?;
            ShmSemaphore::init(addr_of_mut!((*header).index_lock), 1)?;

            for i in 0..capacity as usize {
                let slot = slots.add(i);
                ShmMutex::init(addr_of_mut!((*slot).mutex))?;
                ShmCondvar::init(addr_of_mut!((*slot).cond))?;
            }

            (*header).server_alive.store(true, Ordering::Release);
            (*header).magic.store(MAGIC, Ordering::Release);
        }

        tracing::debug!(name = region.name(), capacity, size, "created ring channel");
        Ok(Self::from_region(region, capacity))
    }

    /// Maps a ring created by another handle, possibly in another process.
    ///
    /// # Safety
    /// The ring must have been created with the same `Req`/`Resp` types.
    pub unsafe fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let name = path.as_ref().display().to_string();

        let header_map = map_existing(&path, size_of::<RingHeader>(), &name)?;
        let capacity = {
            let header = unsafe { &*(header_map.as_ptr() as *const RingHeader) };
            validate_header::<Req, Resp>(header, &name)?
        };
        header_map.unmap().map_err(|source| Error::Region {
            name: name.clone(),
            source,
        })?;

        let region = map_existing(&path, region_size::<Req, Resp>(capacity), &name)?;
        Ok(Self::from_region(region, capacity))
    }

    fn from_region(region: SharedRegion, capacity: u32) -> Self {
        let base = region.as_ptr();
        // SAFETY: the mapping is non-null and sized for `capacity` slots.
        let header = unsafe { NonNull::new_unchecked(base as *mut RingHeader) };
        let slots = unsafe {
            NonNull::new_unchecked(base.add(slots_offset::<Req, Resp>()) as *mut Slot<Req, Resp>)
        };
        Self {
            region,
            header,
            slots,
            capacity,
            serving: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    fn header(&self) -> &RingHeader {
        unsafe { self.header.as_ref() }
    }

    fn slot(&self, index: u32) -> &Slot<Req, Resp> {
        debug_assert!(index < self.capacity);
        unsafe { &*self.slots.as_ptr().add(index as usize) }
    }

    /// Sends `req` and blocks until the server answered it.
    ///
    /// Fails with [`Error::Cancelled`] once `shutdown` triggers and with
    /// [`Error::ServerDisconnected`] once the owning side is gone or the
    /// handler refused the request. A request cancelled after the server
    /// answered it still returns the answer.
    pub fn request(&self, req: Req, shutdown: &Shutdown) -> Result<Resp> {
        let header = self.header();
        let check = || {
            shutdown.check()?;
            if !header.server_alive.load(Ordering::Acquire) {
                return Err(Error::ServerDisconnected);
            }
            Ok(())
        };

        let empty = header.empty_slots.acquire_permit(&check)?;
        let index = {
            let _gate = header.index_lock.acquire_permit(&check)?;
            let index = unsafe { *header.next_index.get() };
            let slot = self.slot(index);
            {
                let _guard = slot.mutex.lock()?;
                unsafe {
                    (*slot.entry.get()).req = req;
                    *slot.state.get() = POSTED;
                }
            }
            // On failure the index stays put and the permit goes back.
            header.posted_slots.post()?;
            unsafe { *header.next_index.get() = (index + 1) % self.capacity };
            index
        };
        // The server hands the slot back once the handshake completes.
        empty.forget();

        let slot = self.slot(index);
        let state = slot.state.get();
        let mut guard = slot.mutex.lock()?;
        let answered = || matches!(unsafe { *state }, RESPONDED | REFUSED);
        if let Err(e) = slot.cond.wait_while(&mut guard, || !answered(), &check) {
            unsafe { *state = ABANDONED };
            tracing::debug!(name = self.name(), index, error = %e, "abandoned ring slot");
            return Err(e);
        }

        let outcome = match unsafe { *state } {
            REFUSED => Err(Error::ServerDisconnected),
            _ => Ok(unsafe { (*slot.entry.get()).rsp }),
        };
        unsafe { *state = POSTED };
        slot.cond.notify_one()?;
        outcome
    }

    /// Answers requests until `shutdown` triggers.
    ///
    /// `handler` runs with exclusive access to one slot and must respond or
    /// refuse. Only one serve loop may run per handle.
    pub fn serve<F>(&self, shutdown: &Shutdown, mut handler: F) -> Result<()>
    where
        F: FnMut(&mut Exchange<Req, Resp>),
    {
        let _serving = ServingGuard::acquire(&self.serving);
        let header = self.header();
        let check = || shutdown.check();
        let mut index = unsafe { *header.serve_index.get() };

        tracing::debug!(name = self.name(), "serving ring channel");
        loop {
            match header.posted_slots.acquire(&check) {
                Ok(()) => {}
                Err(Error::Cancelled) => break,
                Err(e) => return Err(e),
            }

            let slot = self.slot(index);
            let state = slot.state.get();
            let mut guard = slot.mutex.lock()?;

            if unsafe { *state } == ABANDONED {
                tracing::debug!(name = self.name(), index, "skipping abandoned slot");
            } else {
                let mut exchange = Exchange {
                    request: unsafe { (*slot.entry.get()).req },
                    reply: None,
                };
                handler(&mut exchange);
                match exchange.reply {
                    Some(Reply::Respond(resp)) => unsafe {
                        (*slot.entry.get()).rsp = resp;
                        *state = RESPONDED;
                    },
                    Some(Reply::Refuse) => {
                        tracing::debug!(name = self.name(), index, "refused request");
                        unsafe { *state = REFUSED };
                    }
                    None => panic!("ring handler returned without responding (slot {index})"),
                }
                slot.cond.notify_one()?;

                // The requester acks by flipping the state back to POSTED.
                match slot
                    .cond
                    .wait_while(&mut guard, || unsafe { *state } != POSTED, &check)
                {
                    Ok(()) => {}
                    Err(Error::Cancelled) => break,
                    Err(e) => return Err(e),
                }
            }

            unsafe { *state = POSTED };
            drop(guard);
            header.empty_slots.post()?;
            index = (index + 1) % self.capacity;
            unsafe { *header.serve_index.get() = index };
        }

        tracing::debug!(name = self.name(), "ring channel serve loop stopped");
        Ok(())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Slots free for new requests.
    pub fn empty_slots(&self) -> u32 {
        self.header().empty_slots.value().max(0) as u32
    }

    /// Requests waiting for the server.
    pub fn posted_slots(&self) -> u32 {
        self.header().posted_slots.value().max(0) as u32
    }

    /// The segment name, with its leading `/`.
    pub fn name(&self) -> &str {
        self.region.name()
    }

    pub fn is_owner(&self) -> bool {
        self.region.is_owner()
    }
}

impl<Req: Serial, Resp: Serial> Drop for RingChannel<Req, Resp> {
    fn drop(&mut self) {
        if self.region.is_owner() {
            self.header().server_alive.store(false, Ordering::Release);
        }
    }
}

struct ServingGuard<'a>(&'a AtomicBool);

impl<'a> ServingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Self {
        assert!(
            !flag.swap(true, Ordering::AcqRel),
            "serve is already running on this ring channel"
        );
        Self(flag)
    }
}

impl Drop for ServingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn map_existing<P: AsRef<Path>>(path: P, size: usize, name: &str) -> Result<SharedRegion> {
    match unsafe { SharedRegion::open(path, size) } {
        Ok(region) => Ok(region),
        // Still being sized by its creator.
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::NotReady(name.to_string())),
        Err(source) => Err(Error::Region {
            name: name.to_string(),
            source,
        }),
    }
}

fn validate_header<Req: Serial, Resp: Serial>(header: &RingHeader, name: &str) -> Result<u32> {
    match header.magic.load(Ordering::Acquire) {
        0 => return Err(Error::NotReady(name.to_string())),
        MAGIC => {}
        _ => return Err(Error::LayoutMismatch(name.to_string())),
    }
    if header.version != VERSION
        || header.slot_count == 0
        || header.req_size != size_of::<Req>() as u32
        || header.resp_size != size_of::<Resp>() as u32
        || header.slot_size != size_of::<Slot<Req, Resp>>() as u32
    {
        return Err(Error::LayoutMismatch(name.to_string()));
    }
    if !header.server_alive.load(Ordering::Acquire) {
        return Err(Error::ServerDisconnected);
    }
    Ok(header.slot_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::thread;
    use std::time::{Duration, Instant};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn test_name() -> String {
        format!(
            "/ring_unit_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while !cond() {
            assert!(start.elapsed() < Duration::from_secs(10), "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Cancels the requester side when a should_panic test unwinds.
    struct TriggerOnDrop(Shutdown);

    impl Drop for TriggerOnDrop {
        fn drop(&mut self) {
            self.0.trigger();
        }
    }

    #[test]
    fn test_create_and_open() {
        let name = test_name();
        let owner = unsafe { RingChannel::<u64, u64>::create(&name, 4) }.unwrap();
        assert!(owner.is_owner());
        assert_eq!(owner.name(), name);

        let peer = unsafe { RingChannel::<u64, u64>::open(&name) }.unwrap();
        assert!(!peer.is_owner());
        assert_eq!(peer.capacity(), 4);
        assert_eq!(peer.empty_slots(), 4);
        assert_eq!(peer.posted_slots(), 0);
    }

    #[test]
    fn test_open_rejects_other_types() {
        let name = test_name();
        let _owner = unsafe { RingChannel::<u64, u64>::create(&name, 2) }.unwrap();
        let err = unsafe { RingChannel::<u32, u64>::open(&name) }.err().unwrap();
        assert!(matches!(err, Error::LayoutMismatch(_)));
    }

    #[test]
    fn test_open_missing() {
        let err = unsafe { RingChannel::<u64, u64>::open(test_name()) }.err().unwrap();
        match err {
            Error::Region { source, .. } => assert_eq!(source.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_open_unpublished_is_not_ready() {
        let name = test_name();
        let _raw = unsafe { SharedRegion::create(&name, 4096) }.unwrap();
        let err = unsafe { RingChannel::<u64, u64>::open(&name) }.err().unwrap();
        assert!(matches!(err, Error::NotReady(_)));
    }

    #[test]
    fn test_round_trip() {
        let name = test_name();
        let server = Arc::new(unsafe { RingChannel::<u64, u64>::create(&name, 2) }.unwrap());
        let shutdown = Shutdown::new();

        let srv = server.clone();
        let stop = shutdown.clone();
        let t = thread::spawn(move || srv.serve(&stop, |ex| ex.respond(ex.request() * 3)));

        let client = unsafe { RingChannel::<u64, u64>::open(&name) }.unwrap();
        let requester = Shutdown::new();
        for i in 0..20 {
            assert_eq!(client.request(i, &requester).unwrap(), i * 3);
        }

        shutdown.trigger();
        t.join().unwrap().unwrap();
        assert_eq!(server.empty_slots(), 2);
        assert_eq!(server.posted_slots(), 0);
    }

    #[test]
    fn test_serve_restart_keeps_position() {
        let name = test_name();
        let server = Arc::new(unsafe { RingChannel::<u64, u64>::create(&name, 3) }.unwrap());
        let client = unsafe { RingChannel::<u64, u64>::open(&name) }.unwrap();
        let requester = Shutdown::new();

        for round in 0..2u64 {
            let shutdown = Shutdown::new();
            let (srv, stop) = (server.clone(), shutdown.clone());
            let t = thread::spawn(move || srv.serve(&stop, |ex| ex.respond(ex.request() + 100)));
            for i in 0..2 {
                let req = round * 10 + i;
                assert_eq!(client.request(req, &requester).unwrap(), req + 100);
            }
            shutdown.trigger();
            t.join().unwrap().unwrap();
        }
        assert_eq!(server.empty_slots(), 3);
    }

    #[test]
    fn test_abandoned_slot_is_recycled() {
        let name = test_name();
        let server = Arc::new(unsafe { RingChannel::<u64, u64>::create(&name, 1) }.unwrap());

        // No server yet: the request is posted and then cancelled.
        let requester = Shutdown::new();
        let client = Arc::new(unsafe { RingChannel::<u64, u64>::open(&name) }.unwrap());
        let (c, stop) = (client.clone(), requester.clone());
        let t = thread::spawn(move || c.request(7, &stop));
        wait_until(|| server.posted_slots() == 1);
        requester.trigger();
        assert!(matches!(t.join().unwrap(), Err(Error::Cancelled)));
        assert_eq!(server.empty_slots(), 0);

        let calls = Arc::new(AtomicUsize::new(0));
        let shutdown = Shutdown::new();
        let (srv, stop, counter) = (server.clone(), shutdown.clone(), calls.clone());
        let t = thread::spawn(move || {
            srv.serve(&stop, |ex| {
                counter.fetch_add(1, Ordering::Relaxed);
                ex.respond(ex.request() + 1)
            })
        });

        wait_until(|| server.empty_slots() == 1);
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        assert_eq!(client.request(41, &Shutdown::new()).unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        shutdown.trigger();
        t.join().unwrap().unwrap();
    }

    #[test]
    fn test_refused_request_reports_disconnect() {
        let name = test_name();
        let server = Arc::new(unsafe { RingChannel::<u64, u64>::create(&name, 2) }.unwrap());
        let shutdown = Shutdown::new();

        let (srv, stop) = (server.clone(), shutdown.clone());
        let t = thread::spawn(move || {
            srv.serve(&stop, |ex| match ex.request() {
                0 => ex.refuse(),
                n => ex.respond(n * 2),
            })
        });

        let client = unsafe { RingChannel::<u64, u64>::open(&name) }.unwrap();
        let requester = Shutdown::new();
        for _ in 0..3 {
            let err = client.request(0, &requester).err().unwrap();
            assert!(matches!(err, Error::ServerDisconnected));
            assert_eq!(client.request(4, &requester).unwrap(), 8);
        }

        shutdown.trigger();
        t.join().unwrap().unwrap();
        assert_eq!(server.empty_slots(), 2);
    }

    #[test]
    fn test_failed_post_keeps_slot_and_permit() {
        let name = test_name();
        let server = Arc::new(unsafe { RingChannel::<u64, u64>::create(&name, 2) }.unwrap());
        let posted = std::ptr::from_ref(&server.header().posted_slots).cast_mut();

        // A full semaphore makes sem_post fail with EOVERFLOW.
        unsafe { ShmSemaphore::init(posted, i32::MAX as u32) }.unwrap();
        let err = server.request(1, &Shutdown::new()).err().unwrap();
        assert!(matches!(err, Error::Sync(_)));
        assert_eq!(server.empty_slots(), 2);
        assert_eq!(unsafe { *server.header().next_index.get() }, 0);

        unsafe { ShmSemaphore::init(posted, 0) }.unwrap();
        let shutdown = Shutdown::new();
        let (srv, stop) = (server.clone(), shutdown.clone());
        let t = thread::spawn(move || srv.serve(&stop, |ex| ex.respond(ex.request() + 1)));
        assert_eq!(server.request(5, &Shutdown::new()).unwrap(), 6);

        shutdown.trigger();
        t.join().unwrap().unwrap();
        assert_eq!(server.empty_slots(), 2);
    }

    #[test]
    fn test_server_disconnect() {
        let name = test_name();
        let owner = unsafe { RingChannel::<u64, u64>::create(&name, 1) }.unwrap();
        let peer = unsafe { RingChannel::<u64, u64>::open(&name) }.unwrap();
        drop(owner);

        let err = peer.request(1, &Shutdown::new()).err().unwrap();
        assert!(matches!(err, Error::ServerDisconnected));
    }

    #[test]
    fn test_blocked_requester_sees_disconnect() {
        let name = test_name();
        let owner = unsafe { RingChannel::<u64, u64>::create(&name, 1) }.unwrap();
        let peer = Arc::new(unsafe { RingChannel::<u64, u64>::open(&name) }.unwrap());

        let p = peer.clone();
        let t = thread::spawn(move || p.request(1, &Shutdown::new()));
        wait_until(|| peer.posted_slots() == 1);
        drop(owner);

        assert!(matches!(t.join().unwrap(), Err(Error::ServerDisconnected)));
    }

    #[test]
    fn test_serve_cancelled_while_idle() {
        let name = test_name();
        let server = unsafe { RingChannel::<u64, u64>::create(&name, 1) }.unwrap();
        let shutdown = Shutdown::new();
        shutdown.trigger();
        server.serve(&shutdown, |ex| ex.respond(0)).unwrap();
    }

    fn serve_one(handler: impl FnMut(&RingChannel<u64, u64>, &mut Exchange<u64, u64>)) {
        let name = test_name();
        let server = unsafe { RingChannel::<u64, u64>::create(&name, 1) }.unwrap();
        let client = unsafe { RingChannel::<u64, u64>::open(&name) }.unwrap();

        let requester = TriggerOnDrop(Shutdown::new());
        let stop = requester.0.clone();
        thread::spawn(move || {
            let _ = client.request(1, &stop);
        });

        let mut handler = handler;
        let _ = server.serve(&Shutdown::new(), |ex| handler(&server, ex));
    }

    #[test]
    #[should_panic(expected = "without responding")]
    fn test_handler_must_respond() {
        serve_one(|_, _| {});
    }

    #[test]
    #[should_panic(expected = "already running")]
    fn test_second_serve_panics() {
        serve_one(|server, _| {
            let _ = server.serve(&Shutdown::new(), |ex: &mut Exchange<u64, u64>| ex.respond(0));
        });
    }
}
