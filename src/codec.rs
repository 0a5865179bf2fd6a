//! Single-frame encode and decode
//!
//! Both operations bind the payload read-only and the codec state
//! read-write, run one libopus call, release both bindings and only then
//! build the result buffer. Codec state is mutated in place and that
//! mutation sticks even if the call fails afterwards.

use crate::binding::{create_buffer, AccessMode, BufferBinding, BufferHost};
use crate::error::{classify, BridgeError, BridgeResult};
use crate::opus;
use crate::state::{check_channels, decoder_size, encoder_size, with_state_ptr, DecoderState, EncoderState};
use std::ops::Range;

/// Decode never asks for in-band forward error correction.
const DECODE_FEC: libc::c_int = 0;

/// Samples per channel in the longest Opus frame (120 ms at 48 kHz)
pub const MAX_FRAME_SIZE: i32 = 5760;

/// libopus never writes more than this into one packet
pub const MAX_PACKET_BYTES: i32 = 6 * 1276;

/// An `(offset, length)` byte range into a caller buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: i32,
    pub length: i32,
}

impl Window {
    pub fn new(offset: i32, length: i32) -> Self {
        Self { offset, length }
    }

    /// Check the window against a buffer of `buffer_len` bytes.
    pub fn resolve(self, buffer_len: usize) -> BridgeResult<Range<usize>> {
        let (Ok(offset), Ok(length)) = (usize::try_from(self.offset), usize::try_from(self.length))
        else {
            return Err(BridgeError::IndexOutOfBounds(format!(
                "negative offset {} or length {}",
                self.offset, self.length
            )));
        };
        let end = offset + length;
        if end > buffer_len {
            return Err(BridgeError::IndexOutOfBounds(format!(
                "range {}..{} exceeds buffer of {} bytes",
                offset, end, buffer_len
            )));
        }
        Ok(offset..end)
    }
}

/// Convert little-endian 16-bit PCM bytes into samples.
///
/// `samples` must hold at least `pcm.len() / 2` values; a trailing odd byte
/// is ignored.
pub fn pcm_to_samples(pcm: &[u8], samples: &mut [i16]) {
    for (sample, bytes) in samples.iter_mut().zip(pcm.chunks_exact(2)) {
        *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
    }
}

/// Convert samples into little-endian 16-bit PCM bytes.
pub fn samples_to_pcm(samples: &[i16], pcm: &mut [u8]) {
    for (bytes, sample) in pcm.chunks_exact_mut(2).zip(samples) {
        bytes.copy_from_slice(&sample.to_le_bytes());
    }
}

fn positive(value: i32, what: &str) -> BridgeResult<usize> {
    match usize::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(BridgeError::InvalidArgument(format!("{} must be positive, got {}", what, value))),
    }
}

/// libopus state is sized by channel count alone, so a state built for a
/// different count has a different length.
fn check_state_len(actual: usize, required: usize, channels: i32) -> BridgeResult<()> {
    if actual != required {
        return Err(BridgeError::InvalidArgument(format!(
            "codec state is {} bytes, {} channel(s) need {}",
            actual, channels, required
        )));
    }
    Ok(())
}

/// Encode one frame of PCM.
///
/// `window` selects little-endian 16-bit interleaved samples in `pcm`; a
/// window shorter than `frame_size * channels` samples is zero-padded.
/// Returns a buffer holding exactly the packet libopus produced, never more
/// than `max_packet_size` bytes.
pub fn encode_frame<H: BufferHost>(
    host: &H,
    state: &EncoderState<H::Buffer>,
    pcm: &H::Buffer,
    window: Window,
    max_packet_size: i32,
    channels: i32,
    frame_size: i32,
) -> BridgeResult<H::Buffer> {
    check_channels(channels)?;
    if frame_size > MAX_FRAME_SIZE {
        return Err(BridgeError::InvalidArgument(format!(
            "frame size {} exceeds {} samples per channel",
            frame_size, MAX_FRAME_SIZE
        )));
    }
    let frame_samples = positive(frame_size, "frame size")? * channels as usize;
    let max_packet_size = positive(max_packet_size, "max packet size")?.min(MAX_PACKET_BYTES as usize) as i32;
    let max_packet = max_packet_size as usize;
    let range = window.resolve(host.len(pcm)?)?;
    if range.len() % 2 != 0 {
        return Err(BridgeError::InvalidArgument(format!(
            "PCM length must be even, got {}",
            range.len()
        )));
    }
    if range.len() / 2 > frame_samples {
        return Err(BridgeError::InvalidArgument(format!(
            "PCM length {} exceeds {} samples per frame",
            range.len(),
            frame_samples
        )));
    }
    check_state_len(host.len(state.buffer())?, encoder_size(channels)?, channels)?;

    let opened_pcm = BufferBinding::acquire(host, pcm, AccessMode::ReadOnly)?;
    let mut opened_state = BufferBinding::acquire(host, state.buffer(), AccessMode::ReadWrite)?;

    let mut input = vec![0i16; frame_samples];
    pcm_to_samples(&opened_pcm.as_slice()[range], &mut input);
    let mut output = vec![0u8; max_packet];

    let num_bytes = with_state_ptr(opened_state.as_mut_slice(), |st| unsafe {
        opus::opus_encode(
            st.cast::<opus::OpusEncoder>(),
            input.as_ptr(),
            frame_size,
            output.as_mut_ptr(),
            max_packet_size,
        )
    });

    opened_pcm.release();
    opened_state.release();

    if num_bytes < 0 {
        return Err(classify(num_bytes, "Failed to encode frame"));
    }

    let num_bytes = num_bytes as usize;
    log::trace!("encoded {} samples into {} bytes", frame_samples, num_bytes);
    let mut packet = create_buffer(host, num_bytes)?;
    packet.as_mut_slice().copy_from_slice(&output[..num_bytes]);
    Ok(packet.finish())
}

/// Decode one packet into PCM.
///
/// Returns `channels * decoded_samples * 2` bytes of little-endian 16-bit
/// interleaved samples, where `decoded_samples` is at most `max_frame_size`.
pub fn decode_frame<H: BufferHost>(
    host: &H,
    state: &DecoderState<H::Buffer>,
    packet: &H::Buffer,
    window: Window,
    max_frame_size: i32,
    channels: i32,
) -> BridgeResult<H::Buffer> {
    check_channels(channels)?;
    // No packet decodes to more than MAX_FRAME_SIZE samples per channel
    let max_frame_size = positive(max_frame_size, "max frame size")?.min(MAX_FRAME_SIZE as usize) as i32;
    let max_samples = max_frame_size as usize * channels as usize;
    let range = window.resolve(host.len(packet)?)?;
    check_state_len(host.len(state.buffer())?, decoder_size(channels)?, channels)?;

    let opened_packet = BufferBinding::acquire(host, packet, AccessMode::ReadOnly)?;
    let mut opened_state = BufferBinding::acquire(host, state.buffer(), AccessMode::ReadWrite)?;

    let data = &opened_packet.as_slice()[range];
    let mut output = vec![0i16; max_samples];

    let frame_size = with_state_ptr(opened_state.as_mut_slice(), |st| unsafe {
        opus::opus_decode(
            st.cast::<opus::OpusDecoder>(),
            data.as_ptr(),
            data.len() as i32,
            output.as_mut_ptr(),
            max_frame_size,
            DECODE_FEC,
        )
    });

    opened_packet.release();
    opened_state.release();

    if frame_size < 0 {
        return Err(if frame_size == opus::OPUS_INVALID_PACKET {
            BridgeError::InvalidArgument("Input data is not a valid packet".to_string())
        } else {
            classify(frame_size, "Failed to decode data")
        });
    }

    let decoded = channels as usize * frame_size as usize;
    log::trace!("decoded {} samples per channel", frame_size);
    let mut pcm = create_buffer(host, decoded * 2)?;
    samples_to_pcm(&output[..decoded], pcm.as_mut_slice());
    Ok(pcm.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HeapArray, HeapHost};
    use crate::state::{create_decoder, create_encoder};

    #[test]
    fn test_pcm_little_endian() {
        let mut samples = [0i16; 3];
        pcm_to_samples(&[0x34, 0x12, 0xff, 0xff, 0x00, 0x80], &mut samples);
        assert_eq!(samples, [0x1234, -1, i16::MIN]);

        let mut bytes = [0u8; 6];
        samples_to_pcm(&samples, &mut bytes);
        assert_eq!(bytes, [0x34, 0x12, 0xff, 0xff, 0x00, 0x80]);
    }

    #[test]
    fn test_pcm_odd_trailing_byte_ignored() {
        let mut samples = [7i16; 2];
        pcm_to_samples(&[1, 0, 9], &mut samples);
        assert_eq!(samples, [1, 7]);
    }

    #[test]
    fn test_window_resolve() {
        assert_eq!(Window::new(2, 4).resolve(6).unwrap(), 2..6);
        assert_eq!(Window::new(6, 0).resolve(6).unwrap(), 6..6);
        assert!(matches!(Window::new(3, 4).resolve(6), Err(BridgeError::IndexOutOfBounds(_))));
        assert!(matches!(Window::new(-1, 2).resolve(6), Err(BridgeError::IndexOutOfBounds(_))));
        assert!(matches!(Window::new(0, -2).resolve(6), Err(BridgeError::IndexOutOfBounds(_))));
    }

    #[test]
    fn test_encode_respects_window_offset() {
        let host = HeapHost::new();
        let encoder = create_encoder(&host, 16000, 1, 24000).unwrap();
        // 4 bytes of junk in front of a 320 sample frame
        let mut bytes = vec![0xAAu8; 4];
        bytes.extend(std::iter::repeat(0u8).take(640));
        let pcm = HeapArray::from_slice(&bytes);
        let packet = encode_frame(&host, &encoder, &pcm, Window::new(4, 640), 4000, 1, 320).unwrap();
        assert!(!packet.is_empty());
        assert!(packet.len() <= 4000);
    }

    #[test]
    fn test_encode_rejects_bad_arguments_before_binding() {
        let host = HeapHost::new();
        let encoder = create_encoder(&host, 48000, 1, 64000).unwrap();
        let pcm = HeapArray::zeroed(1920);
        let before = host.stats();

        let odd = encode_frame(&host, &encoder, &pcm, Window::new(0, 1919), 4000, 1, 960);
        assert!(matches!(odd, Err(BridgeError::InvalidArgument(_))));
        let too_long = encode_frame(&host, &encoder, &pcm, Window::new(0, 1920), 4000, 1, 480);
        assert!(matches!(too_long, Err(BridgeError::InvalidArgument(_))));
        let channels = encode_frame(&host, &encoder, &pcm, Window::new(0, 1920), 4000, 3, 960);
        assert!(matches!(channels, Err(BridgeError::InvalidArgument(_))));
        let no_room = encode_frame(&host, &encoder, &pcm, Window::new(0, 1920), 0, 1, 960);
        assert!(matches!(no_room, Err(BridgeError::InvalidArgument(_))));
        let outside = encode_frame(&host, &encoder, &pcm, Window::new(2, 1920), 4000, 1, 960);
        assert!(matches!(outside, Err(BridgeError::IndexOutOfBounds(_))));

        assert_eq!(host.stats(), before);
    }

    #[test]
    fn test_state_too_small_for_channels() {
        let host = HeapHost::new();
        let mono = create_encoder(&host, 48000, 1, 64000).unwrap();
        let pcm = HeapArray::zeroed(960 * 2 * 2);
        let err = encode_frame(&host, &mono, &pcm, Window::new(0, 3840), 4000, 2, 960);
        assert!(matches!(err, Err(BridgeError::InvalidArgument(_))));
        let junk = unsafe { DecoderState::from_buffer_unchecked(HeapArray::zeroed(8)) };
        let packet = HeapArray::zeroed(3);
        let err = decode_frame(&host, &junk, &packet, Window::new(0, 3), 960, 1);
        assert!(matches!(err, Err(BridgeError::InvalidArgument(_))));
    }

    #[test]
    fn test_state_from_other_channel_count_rejected() {
        let host = HeapHost::new();
        let stereo_encoder = create_encoder(&host, 48000, 2, 64000).unwrap();
        let stereo_decoder = create_decoder(&host, 48000, 2).unwrap();
        let pcm = HeapArray::zeroed(1920);
        let packet = encode_frame(
            &host,
            &create_encoder(&host, 48000, 1, 64000).unwrap(),
            &pcm,
            Window::new(0, 1920),
            4000,
            1,
            960,
        )
        .unwrap();
        let before = host.stats();

        let err = encode_frame(&host, &stereo_encoder, &pcm, Window::new(0, 1920), 4000, 1, 960);
        assert!(matches!(err, Err(BridgeError::InvalidArgument(_))));
        let window = Window::new(0, packet.len() as i32);
        let err = decode_frame(&host, &stereo_decoder, &packet, window, 960, 1);
        assert!(matches!(err, Err(BridgeError::InvalidArgument(_))));

        assert_eq!(host.stats(), before);
    }

    #[test]
    fn test_oversized_lengths_do_not_allocate_blindly() {
        let host = HeapHost::new();
        let encoder = create_encoder(&host, 48000, 2, 64000).unwrap();
        let decoder = create_decoder(&host, 48000, 2).unwrap();
        let pcm = HeapArray::zeroed(3840);
        let window = Window::new(0, 3840);

        let err = encode_frame(&host, &encoder, &pcm, window, i32::MAX, 2, i32::MAX);
        assert!(matches!(err, Err(BridgeError::InvalidArgument(_))));
        let err = encode_frame(&host, &encoder, &pcm, window, 4000, 2, MAX_FRAME_SIZE + 1);
        assert!(matches!(err, Err(BridgeError::InvalidArgument(_))));

        // Capacities beyond what libopus can use are accepted
        let packet = encode_frame(&host, &encoder, &pcm, window, i32::MAX, 2, 960).unwrap();
        assert!(packet.len() <= MAX_PACKET_BYTES as usize);
        let window = Window::new(0, packet.len() as i32);
        let decoded = decode_frame(&host, &decoder, &packet, window, i32::MAX, 2).unwrap();
        assert_eq!(decoded.len(), 960 * 2 * 2);
        assert_eq!(host.open_bindings(), 0);
    }

    #[test]
    fn test_decode_into_small_frame_overflows() {
        let host = HeapHost::new();
        let encoder = create_encoder(&host, 48000, 1, 64000).unwrap();
        let decoder = create_decoder(&host, 48000, 1).unwrap();
        let pcm = HeapArray::zeroed(1920);
        let packet = encode_frame(&host, &encoder, &pcm, Window::new(0, 1920), 4000, 1, 960).unwrap();

        let err = decode_frame(&host, &decoder, &packet, Window::new(0, packet.len() as i32), 120, 1);
        assert_eq!(err.unwrap_err(), BridgeError::BufferOverflow);
        assert_eq!(host.open_bindings(), 0);
    }

    #[test]
    fn test_decode_empty_packet_conceals_loss() {
        let host = HeapHost::new();
        let decoder = create_decoder(&host, 48000, 2).unwrap();
        let empty = HeapArray::zeroed(0);
        let pcm = decode_frame(&host, &decoder, &empty, Window::new(0, 0), 960, 2).unwrap();
        assert_eq!(pcm.len(), 960 * 2 * 2);
    }
}
