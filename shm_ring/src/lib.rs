//! Synchronous request/response rings over POSIX shared memory.
//!
//! A [`RingChannel`] turns one named shared memory segment into a bounded,
//! slot-indexed transport between any number of requesting threads or
//! processes and a single serving thread. Every blocking wait is
//! cancellable through a [`Shutdown`] token.
//!
//! ## Requester API
//!
//! - `request(req, shutdown)`: blocks until the server answered
//!
//! ## Server API
//!
//! - `serve(shutdown, handler)`: answers requests in slot order until
//!   shutdown; `handler` gets an [`Exchange`] and must respond or refuse

pub mod error;
pub mod ring;
pub mod shm;
pub mod sync;

pub use error::{Error, Result};
pub use ring::{Exchange, RingChannel};
pub use shm::SharedRegion;
pub use sync::{Shutdown, WAIT_TICK};

// === Serial trait ===

/// Marker trait for types that can be placed in a ring slot.
///
/// # Safety
/// Implementors must be plain data: `Copy`, no pointers or references, and
/// valid for every bit pattern another process may write.
pub unsafe trait Serial: Copy {}

unsafe impl Serial for u8 {}
unsafe impl Serial for u16 {}
unsafe impl Serial for u32 {}
unsafe impl Serial for u64 {}
unsafe impl Serial for u128 {}
unsafe impl Serial for usize {}
unsafe impl Serial for i8 {}
unsafe impl Serial for i16 {}
unsafe impl Serial for i32 {}
unsafe impl Serial for i64 {}
unsafe impl Serial for i128 {}
unsafe impl Serial for isize {}
unsafe impl Serial for f32 {}
unsafe impl Serial for f64 {}
unsafe impl<T: Serial, const N: usize> Serial for [T; N] {}
