//! In-process buffer host
//!
//! [`HeapHost`] plays the role the JVM plays for the JNI entry points: it owns
//! byte arrays and lends native views of them. Views are either aliases of
//! the array storage or private copies, selected at construction, which
//! mirrors the two behaviours a JVM may pick for `Get<Type>ArrayElements`.
//! Every acquire and release is counted so callers can check that no view
//! outlives the operation that opened it.

use crate::binding::{AccessMode, BufferHost, RawView};
use crate::error::{BridgeError, BridgeResult};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::{mem, ptr, slice};

const WORD: usize = mem::size_of::<u64>();

fn words_for(len: usize) -> usize {
    len.div_ceil(WORD)
}

fn word_bytes(words: &[u64], len: usize) -> &[u8] {
    debug_assert!(len <= words.len() * WORD);
    unsafe { slice::from_raw_parts(words.as_ptr().cast::<u8>(), len) }
}

struct HeapStorage {
    len: usize,
    // Word-backed so views are aligned for codec state structures
    words: Mutex<Box<[u64]>>,
}

/// A shared, fixed-length byte array
#[derive(Clone)]
pub struct HeapArray {
    inner: Arc<HeapStorage>,
}

impl HeapArray {
    pub fn zeroed(len: usize) -> Self {
        Self {
            inner: Arc::new(HeapStorage {
                len,
                words: Mutex::new(vec![0u64; words_for(len)].into_boxed_slice()),
            }),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let array = Self::zeroed(bytes.len());
        {
            let mut words = array.inner.words.lock();
            let dst = unsafe {
                slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), bytes.len())
            };
            dst.copy_from_slice(bytes);
        }
        array
    }

    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Snapshot of the current contents.
    ///
    /// Blocks while an aliasing binding is open on this array.
    pub fn to_vec(&self) -> Vec<u8> {
        let words = self.inner.words.lock();
        word_bytes(&words, self.inner.len).to_vec()
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl std::fmt::Debug for HeapArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapArray")
            .field("id", &self.id())
            .field("len", &self.inner.len)
            .finish()
    }
}

/// Binding accounting for a [`HeapHost`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingStats {
    /// Arrays allocated through [`BufferHost::create`]
    pub created: usize,
    pub acquired: usize,
    pub released: usize,
    /// Releases that wrote a copy back (read-write copy views)
    pub committed: usize,
    /// Created arrays dropped by the bridge instead of returned
    pub discarded: usize,
}

/// Heap-backed [`BufferHost`] with acquire/release accounting
#[derive(Default)]
pub struct HeapHost {
    copy_views: bool,
    stats: Mutex<BindingStats>,
    open: Mutex<Vec<usize>>,
}

impl HeapHost {
    /// Host whose views alias array storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host whose views are private copies, committed back only for
    /// read-write bindings.
    pub fn copying() -> Self {
        Self {
            copy_views: true,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> BindingStats {
        self.stats.lock().clone()
    }

    /// Number of views currently handed out.
    pub fn open_bindings(&self) -> usize {
        self.open.lock().len()
    }

    fn stats_mut(&self) -> MutexGuard<'_, BindingStats> {
        self.stats.lock()
    }
}

impl BufferHost for HeapHost {
    type Buffer = HeapArray;

    fn create(&self, len: usize) -> BridgeResult<HeapArray> {
        self.stats_mut().created += 1;
        Ok(HeapArray::zeroed(len))
    }

    fn len(&self, buffer: &HeapArray) -> BridgeResult<usize> {
        Ok(buffer.len())
    }

    fn pin(&self, buffer: &HeapArray, _mode: AccessMode) -> BridgeResult<RawView> {
        {
            let mut open = self.open.lock();
            if open.contains(&buffer.id()) {
                return Err(BridgeError::Runtime("byte array is already bound".to_string()));
            }
            open.push(buffer.id());
        }
        self.stats_mut().acquired += 1;

        let storage = &buffer.inner;
        let view = if self.copy_views {
            let copy: Box<[u64]> = storage.words.lock().clone();
            RawView {
                ptr: Box::into_raw(copy).cast::<u8>(),
                len: storage.len,
                is_copy: true,
            }
        } else {
            // Held locked until unpin; `to_vec` on this array waits meanwhile.
            let words = MutexGuard::leak(storage.words.lock());
            RawView {
                ptr: words.as_mut_ptr().cast::<u8>(),
                len: storage.len,
                is_copy: false,
            }
        };
        Ok(view)
    }

    unsafe fn unpin(&self, buffer: &HeapArray, view: RawView, mode: AccessMode) {
        let storage = &buffer.inner;
        if view.is_copy {
            let copy = Box::from_raw(ptr::slice_from_raw_parts_mut(
                view.ptr.cast::<u64>(),
                words_for(view.len),
            ));
            if mode == AccessMode::ReadWrite {
                *storage.words.lock() = copy;
                self.stats_mut().committed += 1;
            }
        } else {
            storage.words.force_unlock();
        }

        let mut open = self.open.lock();
        match open.iter().position(|id| *id == buffer.id()) {
            Some(idx) => {
                open.swap_remove(idx);
            }
            None => log::error!("released a view of {:?} that was not open", buffer),
        }
        drop(open);
        self.stats_mut().released += 1;
    }

    fn discard(&self, _buffer: HeapArray) {
        self.stats_mut().discarded += 1;
    }
}
