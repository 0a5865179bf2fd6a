//! Opus FFI bindings
//!
//! This module provides FFI declarations for the single-stream Opus encoder
//! and decoder. State memory is allocated by the caller (sized with the
//! `*_get_size` queries) and initialized in place, so no create/destroy
//! pair is needed. `build.rs` adds the search path and link kind for libopus.

use libc::{c_char, c_int, c_uchar};
use std::ffi::CStr;

/// Opus encoder opaque type
#[repr(C)]
pub struct OpusEncoder {
    _private: [u8; 0],
}

/// Opus decoder opaque type
#[repr(C)]
pub struct OpusDecoder {
    _private: [u8; 0],
}

// Status codes (opus_defines.h)
pub const OPUS_OK: c_int = 0;
pub const OPUS_BAD_ARG: c_int = -1;
pub const OPUS_BUFFER_TOO_SMALL: c_int = -2;
pub const OPUS_INTERNAL_ERROR: c_int = -3;
pub const OPUS_INVALID_PACKET: c_int = -4;
pub const OPUS_UNIMPLEMENTED: c_int = -5;
pub const OPUS_INVALID_STATE: c_int = -6;
pub const OPUS_ALLOC_FAIL: c_int = -7;

pub const OPUS_APPLICATION_AUDIO: c_int = 2049;

// CTL request codes
pub const OPUS_SET_BITRATE_REQUEST: c_int = 4002;

#[link(name = "opus")]
extern "C" {
    /// Size in bytes of an encoder state for `channels` (0 if unsupported)
    pub fn opus_encoder_get_size(channels: c_int) -> c_int;

    /// Initialize a previously allocated encoder state
    pub fn opus_encoder_init(
        st: *mut OpusEncoder,
        fs: i32,
        channels: c_int,
        application: c_int,
    ) -> c_int;

    /// Encode one frame of interleaved 16-bit PCM
    pub fn opus_encode(
        st: *mut OpusEncoder,
        pcm: *const i16,
        frame_size: c_int,
        data: *mut c_uchar,
        max_data_bytes: i32,
    ) -> i32;

    /// Encoder CTL interface
    pub fn opus_encoder_ctl(st: *mut OpusEncoder, request: c_int, ...) -> c_int;

    /// Size in bytes of a decoder state for `channels` (0 if unsupported)
    pub fn opus_decoder_get_size(channels: c_int) -> c_int;

    /// Initialize a previously allocated decoder state
    pub fn opus_decoder_init(st: *mut OpusDecoder, fs: i32, channels: c_int) -> c_int;

    /// Decode one packet into interleaved 16-bit PCM
    pub fn opus_decode(
        st: *mut OpusDecoder,
        data: *const c_uchar,
        len: i32,
        pcm: *mut i16,
        frame_size: c_int,
        decode_fec: c_int,
    ) -> c_int;

    /// Human readable description of a status code
    pub fn opus_strerror(error: c_int) -> *const c_char;
}

/// Gets the libopus description for a status code.
pub fn strerror(error: c_int) -> String {
    unsafe {
        let c_str = opus_strerror(error);
        if c_str.is_null() {
            return format!("opus error {}", error);
        }
        CStr::from_ptr(c_str).to_string_lossy().into_owned()
    }
}
