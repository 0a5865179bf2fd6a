//! Paired encoder/decoder for Rust callers
//!
//! [`OpusCodec`] is what the JVM-side wrapper class does on top of the raw
//! entry points, expressed over [`HeapHost`]: it holds one encoder and one
//! decoder state and checks frame windows before they reach the bridge.

use crate::binding::buffer_from_slice;
use crate::codec::{decode_frame, encode_frame, Window};
use crate::error::{BridgeError, BridgeResult};
use crate::host::{HeapArray, HeapHost};
use crate::state::{create_decoder, create_encoder, DecoderState, EncoderState};

/// 20 ms at 48 kHz
pub const DEFAULT_FRAME_SIZE: i32 = 960;
pub const DEFAULT_SAMPLE_RATE: i32 = 48000;
pub const DEFAULT_CHANNELS: i32 = 1;
pub const DEFAULT_BIT_RATE: i32 = 64000;
/// 120 ms at 48 kHz, the longest packet Opus can carry
pub const DEFAULT_MAX_FRAME_SIZE: i32 = 6 * 960;
/// Three maximum-size Opus frames
pub const DEFAULT_MAX_PACKET_SIZE: i32 = 3 * 1276;

/// Settings for an [`OpusCodec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// Samples per channel in one encoded frame
    pub frame_size: i32,
    pub sample_rate: i32,
    pub channels: i32,
    /// Target bit rate in bits per second
    pub bit_rate: i32,
    /// Decode capacity in samples per channel
    pub max_frame_size: i32,
    /// Encode capacity in bytes
    pub max_packet_size: i32,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bit_rate: DEFAULT_BIT_RATE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl CodecOptions {
    pub fn builder() -> CodecOptionsBuilder {
        CodecOptionsBuilder::default()
    }

    /// Bytes of PCM in one frame.
    pub fn frame_bytes(&self) -> usize {
        self.channels.max(0) as usize * self.frame_size.max(0) as usize * 2
    }
}

#[derive(Debug, Clone, Default)]
pub struct CodecOptionsBuilder {
    options: CodecOptions,
}

impl CodecOptionsBuilder {
    pub fn frame_size(mut self, frame_size: i32) -> Self {
        self.options.frame_size = frame_size;
        self
    }

    /// 8, 12, 16, 24 and 48 kHz are supported.
    pub fn sample_rate(mut self, sample_rate: i32) -> Self {
        self.options.sample_rate = sample_rate;
        self
    }

    pub fn channels(mut self, channels: i32) -> Self {
        self.options.channels = channels;
        self
    }

    pub fn bit_rate(mut self, bit_rate: i32) -> Self {
        self.options.bit_rate = bit_rate;
        self
    }

    pub fn max_frame_size(mut self, max_frame_size: i32) -> Self {
        self.options.max_frame_size = max_frame_size;
        self
    }

    pub fn max_packet_size(mut self, max_packet_size: i32) -> Self {
        self.options.max_packet_size = max_packet_size;
        self
    }

    pub fn options(&self) -> CodecOptions {
        self.options
    }

    pub fn build(self) -> BridgeResult<OpusCodec> {
        OpusCodec::new(self.options)
    }
}

/// One encoder and one decoder sharing a set of [`CodecOptions`].
///
/// Encode and decode take `&mut self`: a codec state must never see two
/// calls at once.
pub struct OpusCodec {
    options: CodecOptions,
    host: HeapHost,
    encoder: EncoderState<HeapArray>,
    decoder: DecoderState<HeapArray>,
}

fn window_of(offset: usize, length: usize, data_len: usize) -> BridgeResult<Window> {
    if offset.checked_add(length).map_or(true, |end| end > data_len) {
        return Err(BridgeError::IndexOutOfBounds(
            "data.length is less than length + offset".to_string(),
        ));
    }
    match (i32::try_from(offset), i32::try_from(length)) {
        (Ok(offset), Ok(length)) => Ok(Window::new(offset, length)),
        _ => Err(BridgeError::IndexOutOfBounds(format!(
            "window {}+{} does not fit a 32-bit index",
            offset, length
        ))),
    }
}

impl OpusCodec {
    pub fn new(options: CodecOptions) -> BridgeResult<Self> {
        let host = HeapHost::new();
        let encoder = create_encoder(&host, options.sample_rate, options.channels, options.bit_rate)?;
        let decoder = create_decoder(&host, options.sample_rate, options.channels)?;
        Ok(Self {
            options,
            host,
            encoder,
            decoder,
        })
    }

    pub fn builder() -> CodecOptionsBuilder {
        CodecOptions::builder()
    }

    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// Encode one frame of exactly `channels * frame_size * 2` PCM bytes.
    pub fn encode_frame(&mut self, frame: &[u8]) -> BridgeResult<Vec<u8>> {
        self.encode_frame_at(frame, 0, frame.len())
    }

    /// Encode the frame found at `data[offset..offset + length]`.
    pub fn encode_frame_at(&mut self, data: &[u8], offset: usize, length: usize) -> BridgeResult<Vec<u8>> {
        let expected = self.options.frame_bytes();
        if length != expected {
            return Err(BridgeError::InvalidArgument(format!(
                "Expected length to be {}, but got {}",
                expected, length
            )));
        }
        let window = window_of(offset, length, data.len())?;
        let pcm = buffer_from_slice(&self.host, data)?;
        let packet = encode_frame(
            &self.host,
            &self.encoder,
            &pcm,
            window,
            self.options.max_packet_size,
            self.options.channels,
            self.options.frame_size,
        )?;
        Ok(packet.to_vec())
    }

    /// Decode one packet into PCM bytes.
    pub fn decode_frame(&mut self, packet: &[u8]) -> BridgeResult<Vec<u8>> {
        self.decode_frame_at(packet, 0, packet.len())
    }

    /// Decode the packet found at `data[offset..offset + length]`.
    pub fn decode_frame_at(&mut self, data: &[u8], offset: usize, length: usize) -> BridgeResult<Vec<u8>> {
        let window = window_of(offset, length, data.len())?;
        let packet = buffer_from_slice(&self.host, data)?;
        let pcm = decode_frame(
            &self.host,
            &self.decoder,
            &packet,
            window,
            self.options.max_frame_size,
            self.options.channels,
        )?;
        Ok(pcm.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = CodecOptions::default();
        assert_eq!(options.frame_size, 960);
        assert_eq!(options.sample_rate, 48000);
        assert_eq!(options.channels, 1);
        assert_eq!(options.bit_rate, 64000);
        assert_eq!(options.max_frame_size, 5760);
        assert_eq!(options.max_packet_size, 3828);
        assert_eq!(options.frame_bytes(), 1920);
    }

    #[test]
    fn test_builder_overrides() {
        let options = CodecOptions::builder()
            .sample_rate(16000)
            .channels(2)
            .frame_size(320)
            .bit_rate(24000)
            .max_frame_size(1920)
            .max_packet_size(1500)
            .options();
        assert_eq!(options.sample_rate, 16000);
        assert_eq!(options.channels, 2);
        assert_eq!(options.frame_bytes(), 1280);
        assert_eq!(options.max_packet_size, 1500);
    }

    #[test]
    fn test_build_rejects_bad_options() {
        assert!(matches!(
            OpusCodec::builder().channels(5).build(),
            Err(BridgeError::InvalidArgument(_))
        ));
        assert!(matches!(
            OpusCodec::builder().sample_rate(44100).build(),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_encode_checks_frame_length() {
        let mut codec = OpusCodec::builder().build().unwrap();
        let err = codec.encode_frame(&[0u8; 100]).unwrap_err();
        assert_eq!(
            err,
            BridgeError::InvalidArgument("Expected length to be 1920, but got 100".to_string())
        );
        let err = codec.encode_frame_at(&[0u8; 1920], 10, 1920).unwrap_err();
        assert!(matches!(err, BridgeError::IndexOutOfBounds(_)));
    }

    #[test]
    fn test_round_trip_stereo() {
        let mut codec = OpusCodec::builder().channels(2).build().unwrap();
        let frame = vec![0u8; codec.options().frame_bytes()];
        let packet = codec.encode_frame(&frame).unwrap();
        assert!(!packet.is_empty());
        let pcm = codec.decode_frame(&packet).unwrap();
        assert_eq!(pcm.len(), 960 * 2 * 2);
    }

    #[test]
    fn test_decode_window_inside_larger_buffer() {
        let mut codec = OpusCodec::builder().build().unwrap();
        let packet = codec.encode_frame(&[0u8; 1920]).unwrap();
        let mut data = vec![0xEEu8; 3];
        data.extend_from_slice(&packet);
        data.push(0xEE);
        let pcm = codec.decode_frame_at(&data, 3, packet.len()).unwrap();
        assert_eq!(pcm.len(), 1920);
    }
}
