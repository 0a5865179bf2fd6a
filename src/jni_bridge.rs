//! JNI entry points
//!
//! Native methods of `net.labymod.opus.OpusCodec`. Java `byte[]` arrays are
//! exposed through [`JniHost`]; any [`BridgeError`] becomes a pending Java
//! exception and the method returns `null`.

use crate::binding::{AccessMode, BufferHost, RawView};
use crate::codec::{decode_frame, encode_frame, Window};
use crate::error::{BridgeError, BridgeResult, FALLBACK_EXCEPTION_CLASS};
use crate::state::{create_decoder, create_encoder, DecoderState, EncoderState};
use jni::objects::{JByteArray, JClass, JThrowable};
use jni::sys::{self, jbyte, jbyteArray, jint, jsize, JNI_ABORT, JNI_FALSE, JNI_TRUE, JNI_VERSION_1_6};
use jni::JNIEnv;
use libc::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

/// [`BufferHost`] over Java `byte[]` local references
pub struct JniHost {
    env: *mut sys::JNIEnv,
}

impl JniHost {
    /// Wrap the env of the current native call.
    ///
    /// The host must not outlive that call.
    pub fn new(env: &JNIEnv<'_>) -> Self {
        Self { env: env.get_raw() }
    }

    fn table(&self) -> &sys::JNINativeInterface_ {
        unsafe { &**self.env }
    }
}

fn missing(name: &str) -> BridgeError {
    BridgeError::Runtime(format!("JNI function {} is unavailable", name))
}

fn non_null(array: jbyteArray) -> BridgeResult<jbyteArray> {
    if array.is_null() {
        Err(BridgeError::InvalidArgument("byte array must not be null".to_string()))
    } else {
        Ok(array)
    }
}

impl BufferHost for JniHost {
    type Buffer = jbyteArray;

    fn create(&self, len: usize) -> BridgeResult<jbyteArray> {
        let new_byte_array = self.table().NewByteArray.ok_or_else(|| missing("NewByteArray"))?;
        let size = jsize::try_from(len)
            .map_err(|_| BridgeError::OutOfMemory(format!("{} bytes exceed a Java array", len)))?;
        let array = unsafe { new_byte_array(self.env, size) };
        if array.is_null() {
            return Err(BridgeError::OutOfMemory(format!("failed to allocate {} bytes", len)));
        }
        Ok(array)
    }

    fn len(&self, buffer: &jbyteArray) -> BridgeResult<usize> {
        let array = non_null(*buffer)?;
        let get_array_length = self.table().GetArrayLength.ok_or_else(|| missing("GetArrayLength"))?;
        let len = unsafe { get_array_length(self.env, array) };
        Ok(len.max(0) as usize)
    }

    fn pin(&self, buffer: &jbyteArray, _mode: AccessMode) -> BridgeResult<RawView> {
        let len = self.len(buffer)?;
        let get_elements = self
            .table()
            .GetByteArrayElements
            .ok_or_else(|| missing("GetByteArrayElements"))?;
        let mut is_copy = JNI_FALSE;
        let data = unsafe { get_elements(self.env, *buffer, &mut is_copy) };
        if data.is_null() {
            return Err(BridgeError::OutOfMemory("unable to access byte array elements".to_string()));
        }
        Ok(RawView {
            ptr: data.cast::<u8>(),
            len,
            is_copy: is_copy == JNI_TRUE,
        })
    }

    unsafe fn unpin(&self, buffer: &jbyteArray, view: RawView, mode: AccessMode) {
        let Some(release_elements) = self.table().ReleaseByteArrayElements else {
            log::error!("JNI function ReleaseByteArrayElements is unavailable");
            return;
        };
        let release_mode = match mode {
            AccessMode::ReadOnly => JNI_ABORT,
            AccessMode::ReadWrite => 0,
        };
        release_elements(self.env, *buffer, view.ptr.cast::<jbyte>(), release_mode);
    }

    fn discard(&self, buffer: jbyteArray) {
        if let Some(delete_local_ref) = self.table().DeleteLocalRef {
            unsafe { delete_local_ref(self.env, buffer) };
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run an entry point body, turning a panic into a runtime failure.
fn guarded<T>(body: impl FnOnce() -> BridgeResult<T>) -> BridgeResult<T> {
    panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        Err(BridgeError::Runtime(format!(
            "panic in native code: {}",
            panic_message(payload)
        )))
    })
}

fn find_class<'local>(env: &mut JNIEnv<'local>, name: &str) -> Option<JClass<'local>> {
    match env.find_class(name) {
        Ok(class) => Some(class),
        Err(_) => {
            let _ = env.exception_clear();
            None
        }
    }
}

/// Raise `error` as a Java exception.
///
/// An exception the JVM already raised (an `OutOfMemoryError` from a failed
/// allocation, say) is left in place.
fn throw(env: &mut JNIEnv<'_>, error: &BridgeError) {
    if env.exception_check().unwrap_or(false) {
        log::warn!("{} (a Java exception is already pending)", error);
        return;
    }
    log::warn!("raising {}: {}", error.java_class(), error);

    let Some(class) = find_class(env, error.java_class())
        .or_else(|| find_class(env, FALLBACK_EXCEPTION_CLASS))
    else {
        log::error!("no exception class available to raise {}", error);
        return;
    };

    let thrown = match error.message() {
        Some(message) => env.throw_new(&class, message),
        None => env
            .new_object(&class, "()V", &[])
            .and_then(|obj| env.throw(JThrowable::from(obj))),
    };
    if let Err(err) = thrown {
        log::error!("failed to raise {}: {}", error.java_class(), err);
    }
}

fn finish(env: &mut JNIEnv<'_>, result: BridgeResult<jbyteArray>) -> jbyteArray {
    match result {
        Ok(array) => array,
        Err(error) => {
            throw(env, &error);
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub extern "system" fn JNI_OnLoad(_vm: *mut sys::JavaVM, _reserved: *mut c_void) -> jint {
    crate::init_logging();
    JNI_VERSION_1_6
}

#[no_mangle]
pub extern "system" fn Java_net_labymod_opus_OpusCodec_createEncoder<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    sample_rate: jint,
    channels: jint,
    bit_rate: jint,
) -> jbyteArray {
    let host = JniHost::new(&env);
    let result = guarded(|| {
        create_encoder(&host, sample_rate, channels, bit_rate).map(EncoderState::into_buffer)
    });
    finish(&mut env, result)
}

#[no_mangle]
pub extern "system" fn Java_net_labymod_opus_OpusCodec_createDecoder<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    sample_rate: jint,
    channels: jint,
) -> jbyteArray {
    let host = JniHost::new(&env);
    let result = guarded(|| create_decoder(&host, sample_rate, channels).map(DecoderState::into_buffer));
    finish(&mut env, result)
}

#[no_mangle]
pub extern "system" fn Java_net_labymod_opus_OpusCodec_encodeFrame0<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    encoder: JByteArray<'local>,
    data: JByteArray<'local>,
    offset: jint,
    length: jint,
    max_packet_size: jint,
    channels: jint,
    frame_size: jint,
) -> jbyteArray {
    let host = JniHost::new(&env);
    let result = guarded(|| {
        let state = unsafe { EncoderState::from_buffer_unchecked(non_null(encoder.as_raw())?) };
        encode_frame(
            &host,
            &state,
            &data.as_raw(),
            Window::new(offset, length),
            max_packet_size,
            channels,
            frame_size,
        )
    });
    finish(&mut env, result)
}

#[no_mangle]
pub extern "system" fn Java_net_labymod_opus_OpusCodec_decodeFrame0<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    decoder: JByteArray<'local>,
    data: JByteArray<'local>,
    offset: jint,
    length: jint,
    max_frame_size: jint,
    channels: jint,
) -> jbyteArray {
    let host = JniHost::new(&env);
    let result = guarded(|| {
        let state = unsafe { DecoderState::from_buffer_unchecked(non_null(decoder.as_raw())?) };
        decode_frame(
            &host,
            &state,
            &data.as_raw(),
            Window::new(offset, length),
            max_frame_size,
            channels,
        )
    });
    finish(&mut env, result)
}
