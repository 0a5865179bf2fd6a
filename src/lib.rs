//! Opus JNI bridge
//!
//! Native half of a JVM Opus codec binding. The JVM keeps encoder and
//! decoder state in plain `byte[]` arrays; this library sizes and
//! initializes that state, encodes and decodes single frames against it,
//! and turns libopus status codes into Java exceptions.
//!
//! Diagnostics go through the `log` facade. On Android [`init_logging`]
//! routes them to logcat; elsewhere the library installs no backend, so a
//! desktop host that wants the records must register its own `log` logger
//! before loading the bridge.

// JNI export names
#![allow(non_snake_case)]

pub mod binding;
pub mod codec;
pub mod error;
pub mod host;
pub mod jni_bridge;
pub mod opus;
pub mod options;
pub mod state;

pub use binding::{AccessMode, BufferBinding, BufferHost, OwnedBinding};
pub use codec::{decode_frame, encode_frame, Window};
pub use error::{classify, BridgeError, BridgeResult, OpusStatus};
pub use host::{BindingStats, HeapArray, HeapHost};
pub use options::{CodecOptions, CodecOptionsBuilder, OpusCodec};
pub use state::{create_decoder, create_encoder, decoder_size, encoder_size, DecoderState, EncoderState};

use once_cell::sync::OnceCell;
use std::panic;

static INIT: OnceCell<()> = OnceCell::new();

/// Initialize logging (called from JNI_OnLoad)
///
/// Installs the logcat backend on Android only; the panic hook is installed
/// on every target.
pub fn init_logging() {
    INIT.get_or_init(|| {
        #[cfg(target_os = "android")]
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("opus-jni-rs"),
        );

        // Set up panic hook to log panics before they become Java exceptions
        let default_hook = panic::take_hook();
        panic::set_hook(Box::new(move |panic_info| {
            let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            let location = if let Some(loc) = panic_info.location() {
                format!("{}:{}:{}", loc.file(), loc.line(), loc.column())
            } else {
                "unknown location".to_string()
            };

            log::error!("RUST PANIC: {} at {}", msg, location);
            default_hook(panic_info);
        }));

        log::info!("opus-jni-rs initialized");
    });
}
