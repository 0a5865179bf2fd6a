//! Codec state creation
//!
//! Encoder and decoder state live in caller-owned byte buffers sized by
//! libopus for the channel count and initialized in place. The typed
//! wrappers keep an encoder buffer from being handed to the decoder and
//! vice versa.

use crate::binding::{create_buffer, BufferHost};
use crate::error::{classify_native, BridgeError, BridgeResult};
use crate::opus;
use std::{mem, ptr};

pub const SUPPORTED_SAMPLE_RATES: [i32; 5] = [8000, 12000, 16000, 24000, 48000];

pub(crate) const CHANNELS_MSG: &str = "Channels must be 1 or 2";
const SAMPLE_RATE_MSG: &str =
    "Invalid sample rate, can only be one of 48000, 24000, 16000, 12000 or 8000";

/// Opaque encoder state held in a caller-owned buffer
#[derive(Debug)]
pub struct EncoderState<B> {
    buffer: B,
}

/// Opaque decoder state held in a caller-owned buffer
#[derive(Debug)]
pub struct DecoderState<B> {
    buffer: B,
}

impl<B> EncoderState<B> {
    /// Treat `buffer` as encoder state.
    ///
    /// # Safety
    ///
    /// `buffer` must hold state produced by [`create_encoder`] (or a byte copy
    /// of it). libopus trusts the contents completely.
    pub unsafe fn from_buffer_unchecked(buffer: B) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn into_buffer(self) -> B {
        self.buffer
    }
}

impl<B> DecoderState<B> {
    /// Treat `buffer` as decoder state.
    ///
    /// # Safety
    ///
    /// `buffer` must hold state produced by [`create_decoder`] (or a byte copy
    /// of it). libopus trusts the contents completely.
    pub unsafe fn from_buffer_unchecked(buffer: B) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn into_buffer(self) -> B {
        self.buffer
    }
}

pub(crate) fn check_channels(channels: i32) -> BridgeResult<()> {
    if channels == 1 || channels == 2 {
        Ok(())
    } else {
        Err(BridgeError::InvalidArgument(CHANNELS_MSG.to_string()))
    }
}

fn checked_size(size: libc::c_int) -> BridgeResult<usize> {
    match usize::try_from(size) {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(BridgeError::InvalidArgument(CHANNELS_MSG.to_string())),
    }
}

/// Bytes of encoder state libopus needs for `channels`.
pub fn encoder_size(channels: i32) -> BridgeResult<usize> {
    check_channels(channels)?;
    checked_size(unsafe { opus::opus_encoder_get_size(channels) })
}

/// Bytes of decoder state libopus needs for `channels`.
pub fn decoder_size(channels: i32) -> BridgeResult<usize> {
    check_channels(channels)?;
    checked_size(unsafe { opus::opus_decoder_get_size(channels) })
}

fn init_error(status: i32) -> BridgeError {
    if status == opus::OPUS_BAD_ARG {
        BridgeError::InvalidArgument(SAMPLE_RATE_MSG.to_string())
    } else {
        classify_native(status)
    }
}

/// Run `f` on a pointer to `state` that is aligned for libopus structures.
///
/// Host views are normally aligned already. When one is not, `f` runs on an
/// aligned copy which is written back afterwards; Opus state holds no
/// self-references, so it survives the move.
pub(crate) fn with_state_ptr<R>(state: &mut [u8], f: impl FnOnce(*mut u8) -> R) -> R {
    const ALIGN: usize = mem::align_of::<u64>();
    if state.as_ptr() as usize % ALIGN == 0 {
        return f(state.as_mut_ptr());
    }

    let len = state.len();
    let mut scratch = vec![0u64; len.div_ceil(ALIGN)];
    let scratch_ptr = scratch.as_mut_ptr().cast::<u8>();
    let result = unsafe {
        ptr::copy_nonoverlapping(state.as_ptr(), scratch_ptr, len);
        let result = f(scratch_ptr);
        ptr::copy_nonoverlapping(scratch_ptr, state.as_mut_ptr(), len);
        result
    };
    log::trace!("codec state ran on an aligned copy ({} bytes)", len);
    result
}

/// Create and initialize encoder state.
///
/// Validation order: channel count, state allocation, initialization with
/// the sample rate, then the bit rate. Nothing is handed out unless every
/// step succeeds.
pub fn create_encoder<H: BufferHost>(
    host: &H,
    sample_rate: i32,
    channels: i32,
    bit_rate: i32,
) -> BridgeResult<EncoderState<H::Buffer>> {
    let size = encoder_size(channels)?;
    let mut memory = create_buffer(host, size)?;

    let (init, ctl) = with_state_ptr(memory.as_mut_slice(), |st| unsafe {
        let st = st.cast::<opus::OpusEncoder>();
        let init = opus::opus_encoder_init(st, sample_rate, channels, opus::OPUS_APPLICATION_AUDIO);
        if init != opus::OPUS_OK {
            return (init, opus::OPUS_OK);
        }
        (init, opus::opus_encoder_ctl(st, opus::OPUS_SET_BITRATE_REQUEST, bit_rate))
    });
    if init != opus::OPUS_OK {
        return Err(init_error(init));
    }
    if ctl != opus::OPUS_OK {
        return Err(classify_native(ctl));
    }

    log::debug!(
        "created encoder: {} Hz, {} channel(s), {} bit/s, {} bytes of state",
        sample_rate,
        channels,
        bit_rate,
        size
    );
    Ok(EncoderState {
        buffer: memory.finish(),
    })
}

/// Create and initialize decoder state.
pub fn create_decoder<H: BufferHost>(
    host: &H,
    sample_rate: i32,
    channels: i32,
) -> BridgeResult<DecoderState<H::Buffer>> {
    let size = decoder_size(channels)?;
    let mut memory = create_buffer(host, size)?;

    let init = with_state_ptr(memory.as_mut_slice(), |st| unsafe {
        opus::opus_decoder_init(st.cast::<opus::OpusDecoder>(), sample_rate, channels)
    });
    if init != opus::OPUS_OK {
        return Err(init_error(init));
    }

    log::debug!(
        "created decoder: {} Hz, {} channel(s), {} bytes of state",
        sample_rate,
        channels,
        size
    );
    Ok(DecoderState {
        buffer: memory.finish(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeapHost;

    #[test]
    fn test_encoder_for_every_supported_rate() {
        let host = HeapHost::new();
        for rate in SUPPORTED_SAMPLE_RATES {
            for channels in [1, 2] {
                let state = create_encoder(&host, rate, channels, 64000).unwrap();
                assert_eq!(state.buffer().len(), encoder_size(channels).unwrap());
            }
        }
        let stats = host.stats();
        assert_eq!(stats.created, 10);
        assert_eq!(stats.acquired, stats.released);
        assert_eq!(stats.discarded, 0);
    }

    #[test]
    fn test_decoder_for_every_supported_rate() {
        let host = HeapHost::copying();
        for rate in SUPPORTED_SAMPLE_RATES {
            for channels in [1, 2] {
                let state = create_decoder(&host, rate, channels).unwrap();
                assert_eq!(state.buffer().len(), decoder_size(channels).unwrap());
                assert!(state.buffer().to_vec().iter().any(|b| *b != 0));
            }
        }
    }

    #[test]
    fn test_bad_channels_never_allocate() {
        let host = HeapHost::new();
        for channels in [-1, 0, 3, 8] {
            let err = create_encoder(&host, 48000, channels, 64000).unwrap_err();
            assert_eq!(err, BridgeError::InvalidArgument(CHANNELS_MSG.to_string()));
            let err = create_decoder(&host, 48000, channels).unwrap_err();
            assert_eq!(err, BridgeError::InvalidArgument(CHANNELS_MSG.to_string()));
        }
        assert_eq!(host.stats().created, 0);
    }

    #[test]
    fn test_bad_sample_rate_discards_state() {
        let host = HeapHost::new();
        for rate in [0, 11025, 22050, 44100, 96000] {
            let err = create_encoder(&host, rate, 1, 64000).unwrap_err();
            assert_eq!(err, BridgeError::InvalidArgument(SAMPLE_RATE_MSG.to_string()));
            let err = create_decoder(&host, rate, 2).unwrap_err();
            assert_eq!(err, BridgeError::InvalidArgument(SAMPLE_RATE_MSG.to_string()));
        }
        let stats = host.stats();
        assert_eq!(stats.created, 10);
        assert_eq!(stats.discarded, 10);
        assert_eq!(host.open_bindings(), 0);
    }

    #[test]
    fn test_bad_bit_rate() {
        let host = HeapHost::new();
        let err = create_encoder(&host, 48000, 1, 0).unwrap_err();
        assert_eq!(err, BridgeError::InvalidArgument("invalid argument".to_string()));
        assert_eq!(host.stats().discarded, 1);
    }

    #[test]
    fn test_unaligned_state_is_written_back() {
        let mut backing = vec![0u8; encoder_size(1).unwrap() + 1];
        let state = &mut backing[1..];
        let status = with_state_ptr(state, |st| unsafe {
            opus::opus_encoder_init(st.cast(), 48000, 1, opus::OPUS_APPLICATION_AUDIO)
        });
        assert_eq!(status, opus::OPUS_OK);
        assert!(backing[1..].iter().any(|b| *b != 0));
    }
}
