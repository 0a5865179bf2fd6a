//! Scoped native access to caller-owned byte buffers
//!
//! A [`BufferHost`] is whatever owns the byte arrays (the JVM through JNI, or
//! [`HeapHost`](crate::host::HeapHost) in-process). The bridge never touches
//! caller memory except through a binding, and bindings release themselves
//! on drop so every exit path, including `?` early returns, gives the view
//! back exactly once.

use crate::error::BridgeResult;
use std::slice;

/// How a binding may use the buffer it views
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Mutations through the view are discarded on release
    ReadOnly,
    /// Mutations are committed back to the caller's buffer on release
    ReadWrite,
}

/// A native-addressable view handed out by a [`BufferHost`]
#[derive(Debug, Clone, Copy)]
pub struct RawView {
    pub ptr: *mut u8,
    pub len: usize,
    /// Whether `ptr` points at a private copy rather than the caller's memory
    pub is_copy: bool,
}

/// Collaborator that owns byte buffers and can expose them to native code.
pub trait BufferHost {
    type Buffer;

    /// Allocate a new zero-filled buffer of `len` bytes.
    fn create(&self, len: usize) -> BridgeResult<Self::Buffer>;

    /// Length of `buffer` in bytes.
    fn len(&self, buffer: &Self::Buffer) -> BridgeResult<usize>;

    /// Obtain a native view of `buffer`.
    ///
    /// The view stays valid until it is passed to [`BufferHost::unpin`].
    fn pin(&self, buffer: &Self::Buffer, mode: AccessMode) -> BridgeResult<RawView>;

    /// Give a view back, committing or discarding mutations according to `mode`.
    ///
    /// # Safety
    ///
    /// `view` must come from `pin` on the same buffer with the same mode and
    /// must not be used afterwards.
    unsafe fn unpin(&self, buffer: &Self::Buffer, view: RawView, mode: AccessMode);

    /// Drop a buffer the bridge created but will not hand out.
    fn discard(&self, _buffer: Self::Buffer) {}
}

/// Exclusive native access to one caller-owned buffer for one operation.
pub struct BufferBinding<'h, H: BufferHost> {
    host: &'h H,
    buffer: &'h H::Buffer,
    view: Option<RawView>,
    mode: AccessMode,
}

impl<'h, H: BufferHost> BufferBinding<'h, H> {
    /// Open `buffer` in the given mode.
    ///
    /// Failure here means the host could not produce a view at all; it is
    /// propagated as-is and never retried.
    pub fn acquire(host: &'h H, buffer: &'h H::Buffer, mode: AccessMode) -> BridgeResult<Self> {
        let view = host.pin(buffer, mode)?;
        Ok(Self {
            host,
            buffer,
            view: Some(view),
            mode,
        })
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn is_copy(&self) -> bool {
        self.view.map(|v| v.is_copy).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.view.map(|v| v.len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.view {
            Some(v) if v.len > 0 => unsafe { slice::from_raw_parts(v.ptr, v.len) },
            _ => &[],
        }
    }

    /// Mutable access to the view. Only meaningful for read-write bindings.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        debug_assert_eq!(self.mode, AccessMode::ReadWrite, "mutating a read-only binding");
        match self.view {
            Some(v) if v.len > 0 => unsafe { slice::from_raw_parts_mut(v.ptr, v.len) },
            _ => &mut [],
        }
    }

    /// Release the binding now instead of at end of scope.
    pub fn release(self) {}
}

impl<H: BufferHost> Drop for BufferBinding<'_, H> {
    fn drop(&mut self) {
        if let Some(view) = self.view.take() {
            unsafe { self.host.unpin(self.buffer, view, self.mode) };
        }
    }
}

/// A buffer freshly created by the bridge, bound read-write.
///
/// [`OwnedBinding::finish`] commits the contents and hands the buffer out.
/// Dropping it instead releases the view and discards the buffer, so a
/// half-built result never reaches the caller.
pub struct OwnedBinding<'h, H: BufferHost> {
    host: &'h H,
    buffer: Option<H::Buffer>,
    view: Option<RawView>,
}

/// Create a `len` byte buffer and immediately bind it read-write.
pub fn create_buffer<H: BufferHost>(host: &H, len: usize) -> BridgeResult<OwnedBinding<'_, H>> {
    let buffer = host.create(len)?;
    let view = match host.pin(&buffer, AccessMode::ReadWrite) {
        Ok(view) => view,
        Err(err) => {
            host.discard(buffer);
            return Err(err);
        }
    };
    Ok(OwnedBinding {
        host,
        buffer: Some(buffer),
        view: Some(view),
    })
}

impl<H: BufferHost> OwnedBinding<'_, H> {
    pub fn len(&self) -> usize {
        self.view.map(|v| v.len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.view {
            Some(v) if v.len > 0 => unsafe { slice::from_raw_parts_mut(v.ptr, v.len) },
            _ => &mut [],
        }
    }

    /// Commit the contents and give up ownership of the buffer.
    pub fn finish(mut self) -> H::Buffer {
        self.unpin();
        match self.buffer.take() {
            Some(buffer) => buffer,
            // Only `finish` and `drop` take the buffer, and both consume self.
            None => unreachable!("owned binding finished twice"),
        }
    }

    fn unpin(&mut self) {
        if let (Some(view), Some(buffer)) = (self.view.take(), self.buffer.as_ref()) {
            unsafe { self.host.unpin(buffer, view, AccessMode::ReadWrite) };
        }
    }
}

impl<H: BufferHost> Drop for OwnedBinding<'_, H> {
    fn drop(&mut self) {
        self.unpin();
        if let Some(buffer) = self.buffer.take() {
            self.host.discard(buffer);
        }
    }
}

/// Copy `src` into a freshly created buffer.
pub fn buffer_from_slice<H: BufferHost>(host: &H, src: &[u8]) -> BridgeResult<H::Buffer> {
    let mut out = create_buffer(host, src.len())?;
    out.as_mut_slice().copy_from_slice(src);
    Ok(out.finish())
}
