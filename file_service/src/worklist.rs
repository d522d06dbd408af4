//! Fan-in dispatcher from many session workers to one file server.
//!
//! Every session owns one node of a circular list. A worker posts a job on
//! its node and sleeps until the server completed it; the server waits on
//! `pending`, walks the ring from the node it served last and claims the
//! first node with posted work. Walking in ring order from the last
//! position keeps the service round-robin across sessions.
//!
//! Nodes live in an arena addressed by [`NodeHandle`]s. The list lock only
//! covers the links; a node's work state sits behind the node's own lock.

use parking_lot::{Condvar, Mutex};
use shm_ring::{Shutdown, WAIT_TICK};
use std::sync::Arc;

/// The wait was cut short by shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("work cancelled by shutdown")]
pub struct Cancelled;

/// Stable reference to a node. Stale once the node is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: usize,
    generation: u64,
}

// =============================================================================
// Nodes
// =============================================================================

enum NodeState<J> {
    Idle,
    Posted(J),
    Claimed,
    Completed(J),
}

struct WorkNode<J> {
    state: Mutex<NodeState<J>>,
    cond: Condvar,
}

impl<J> WorkNode<J> {
    fn new() -> Self {
        Self {
            state: Mutex::new(NodeState::Idle),
            cond: Condvar::new(),
        }
    }
}

struct Link<J> {
    next: usize,
    node: Arc<WorkNode<J>>,
}

struct Entry<J> {
    generation: u64,
    link: Option<Link<J>>,
}

struct Links<J> {
    entries: Vec<Entry<J>>,
    head: Option<usize>,
    free: Vec<usize>,
    len: usize,
}

impl<J> Links<J> {
    fn get(&self, handle: NodeHandle) -> Option<&Link<J>> {
        let entry = self.entries.get(handle.index)?;
        if entry.generation != handle.generation {
            return None;
        }
        entry.link.as_ref()
    }

    fn handle(&self, index: usize) -> NodeHandle {
        NodeHandle {
            index,
            generation: self.entries[index].generation,
        }
    }

    fn next_of(&self, index: usize) -> usize {
        match &self.entries[index].link {
            Some(link) => link.next,
            None => index,
        }
    }

    /// The node after `last`, or the head when `last` is gone.
    fn after(&self, last: Option<NodeHandle>) -> Option<(NodeHandle, Arc<WorkNode<J>>)> {
        let index = match last.and_then(|h| self.get(h)) {
            Some(link) => link.next,
            None => self.head?,
        };
        let link = self.entries[index].link.as_ref()?;
        Some((self.handle(index), link.node.clone()))
    }
}

// =============================================================================
// Pending counter
// =============================================================================

/// Number of nodes with posted work. Only changed while the lock of the
/// node whose state flips to or from `Posted` is held, so it never drifts
/// from the node states.
struct PendingWork {
    count: Mutex<usize>,
    cond: Condvar,
}

impl PendingWork {
    fn increment(&self) {
        *self.count.lock() += 1;
        self.cond.notify_one();
    }

    fn decrement(&self) {
        let mut count = self.count.lock();
        debug_assert!(*count > 0, "pending work count underflow");
        *count = count.saturating_sub(1);
    }

    /// Blocks until some node has posted work. Does not take it.
    fn wait(&self, shutdown: &Shutdown) -> Result<(), Cancelled> {
        let mut count = self.count.lock();
        loop {
            if *count > 0 {
                return Ok(());
            }
            if shutdown.is_triggered() {
                return Err(Cancelled);
            }
            self.cond.wait_for(&mut count, WAIT_TICK);
        }
    }
}

// =============================================================================
// WorkList
// =============================================================================

pub struct WorkList<J> {
    links: Mutex<Links<J>>,
    pending: PendingWork,
}

impl<J> Default for WorkList<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J> WorkList<J> {
    pub fn new() -> Self {
        Self {
            links: Mutex::new(Links {
                entries: Vec::new(),
                head: None,
                free: Vec::new(),
                len: 0,
            }),
            pending: PendingWork {
                count: Mutex::new(0),
                cond: Condvar::new(),
            },
        }
    }

    /// Adds an idle node to the ring.
    pub fn insert(&self) -> NodeHandle {
        let mut links = self.links.lock();
        let index = match links.free.pop() {
            Some(index) => index,
            None => {
                links.entries.push(Entry {
                    generation: 0,
                    link: None,
                });
                links.entries.len() - 1
            }
        };

        let next = match links.head {
            Some(head) => {
                let after_head = links.next_of(head);
                if let Some(link) = links.entries[head].link.as_mut() {
                    link.next = index;
                }
                after_head
            }
            None => {
                links.head = Some(index);
                index
            }
        };
        links.entries[index].link = Some(Link {
            next,
            node: Arc::new(WorkNode::new()),
        });
        links.len += 1;
        links.handle(index)
    }

    /// Unlinks a node. Returns `false` for a stale handle.
    ///
    /// The node must not have work outstanding.
    pub fn remove(&self, handle: NodeHandle) -> bool {
        let mut links = self.links.lock();
        let Some(next) = links.get(handle).map(|link| link.next) else {
            return false;
        };
        let index = handle.index;

        if next == index {
            links.head = None;
        } else {
            let mut prev = next;
            while links.next_of(prev) != index {
                prev = links.next_of(prev);
            }
            if let Some(link) = links.entries[prev].link.as_mut() {
                link.next = next;
            }
            if links.head == Some(index) {
                links.head = Some(next);
            }
        }

        let entry = &mut links.entries[index];
        entry.link = None;
        entry.generation += 1;
        links.free.push(index);
        links.len -= 1;
        true
    }

    pub fn len(&self) -> usize {
        self.links.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.links.lock().head.is_none()
    }

    /// Number of nodes with posted, unclaimed work.
    pub fn pending_count(&self) -> usize {
        *self.pending.count.lock()
    }

    fn node(&self, handle: NodeHandle) -> Option<Arc<WorkNode<J>>> {
        self.links.lock().get(handle).map(|link| link.node.clone())
    }

    /// Posts `job` on the node and blocks until the server completed it.
    ///
    /// On shutdown, work nobody claimed yet is withdrawn. Work already
    /// claimed is always waited for, since the server completes every claim.
    ///
    /// # Panics
    /// If the handle is stale or the node already has work.
    pub fn mark_work(&self, handle: NodeHandle, job: J, shutdown: &Shutdown) -> Result<J, Cancelled> {
        let Some(node) = self.node(handle) else {
            panic!("mark_work on removed node {handle:?}");
        };

        let mut state = node.state.lock();
        assert!(
            matches!(*state, NodeState::Idle),
            "work posted twice on node {handle:?}"
        );
        *state = NodeState::Posted(job);
        self.pending.increment();

        loop {
            match std::mem::replace(&mut *state, NodeState::Idle) {
                NodeState::Completed(job) => return Ok(job),
                NodeState::Posted(job) if shutdown.is_triggered() => {
                    drop(job);
                    self.pending.decrement();
                    return Err(Cancelled);
                }
                other => *state = other,
            }
            node.cond.wait_for(&mut state, WAIT_TICK);
        }
    }

    /// Waits for posted work and claims the first node after `last` that has
    /// some.
    pub fn scan_for_work(&self, last: Option<NodeHandle>, shutdown: &Shutdown) -> Result<Claim<'_, J>, Cancelled> {
        loop {
            self.pending.wait(shutdown)?;
            if let Some(claim) = self.claim_next(last) {
                return Ok(claim);
            }
            tracing::trace!("posted work was withdrawn before the scan reached it");
        }
    }

    /// Walks the whole ring once, starting after `last`. The list lock is
    /// held for the walk, so nodes inserted or removed meanwhile cannot make
    /// it skip a node.
    fn claim_next(&self, last: Option<NodeHandle>) -> Option<Claim<'_, J>> {
        let links = self.links.lock();
        let (mut handle, mut node) = links.after(last)?;

        for _ in 0..links.len {
            let job = {
                let mut state = node.state.lock();
                match std::mem::replace(&mut *state, NodeState::Claimed) {
                    NodeState::Posted(job) => {
                        self.pending.decrement();
                        Some(job)
                    }
                    other => {
                        *state = other;
                        None
                    }
                }
            };
            if let Some(job) = job {
                return Some(Claim {
                    handle,
                    node,
                    job: Some(job),
                    _list: std::marker::PhantomData,
                });
            }
            (handle, node) = links.after(Some(handle))?;
        }
        None
    }
}

// =============================================================================
// Claim
// =============================================================================

/// Work taken off a node. Completing it, or dropping it, hands the job back
/// to the poster.
pub struct Claim<'a, J> {
    handle: NodeHandle,
    node: Arc<WorkNode<J>>,
    job: Option<J>,
    _list: std::marker::PhantomData<&'a WorkList<J>>,
}

impl<J> Claim<'_, J> {
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    pub fn job(&self) -> &J {
        match &self.job {
            Some(job) => job,
            None => unreachable!("claim already completed"),
        }
    }

    pub fn job_mut(&mut self) -> &mut J {
        match &mut self.job {
            Some(job) => job,
            None => unreachable!("claim already completed"),
        }
    }

    pub fn complete(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(job) = self.job.take() {
            *self.node.state.lock() = NodeState::Completed(job);
            self.node.cond.notify_one();
        }
    }
}

impl<J> Drop for Claim<'_, J> {
    fn drop(&mut self) {
        self.finish();
    }
}
