//! Seekable byte-stream primitives the container readers are built from.
//!
//! Every base stream is shared behind [`SharedStream`], an `Arc<Mutex<..>>`
//! over the raw file or buffer. Sub-views lock the base around each
//! `seek + read`/`seek + write` pair, so any number of views over the same
//! base can be used from different threads. Dropping a view never closes the
//! base; the base closes when the last `Arc` owner goes away.

mod concat;
mod sub_file;

pub use concat::ConcatFile;
pub use sub_file::SubFile;

use std::io::{Read, Seek, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// Anything usable as the base of a container: readable, writable (possibly
/// failing at the OS level for read-only files), seekable, and sendable
/// across threads.
pub trait RandomAccess: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> RandomAccess for T {}

/// A base stream shared between sub-views. The mutex serialises cursor
/// movement and transfers on the base.
pub type SharedStream = Arc<Mutex<dyn RandomAccess>>;

/// Wraps a stream into a [`SharedStream`].
pub fn shared<S: RandomAccess + 'static>(stream: S) -> SharedStream {
    Arc::new(Mutex::new(stream))
}

/// Locks a shared stream, recovering from poisoning: a panic mid-read in
/// another thread leaves bytes, not broken invariants.
pub(crate) fn lock(stream: &SharedStream) -> MutexGuard<'_, dyn RandomAccess + 'static> {
    stream.lock().unwrap_or_else(move |e| e.into_inner())
}
