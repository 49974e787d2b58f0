// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Sample model: complex baseband IQ pairs and the on-disk encodings.

use num_complex::Complex;

/// A complex baseband sample; I in `re`, Q in `im`, both in [-1.0, +1.0].
pub type IqSample = Complex<f32>;

/// Bytes occupied by one interleaved IQ sample in the native f32 stream.
pub const IQ_FRAME_BYTES: usize = 8;

/// On-disk / on-wire sample encoding of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// 32-bit IEEE float (WAVE format tag 3).
    F32,
    /// 16-bit signed PCM (WAVE format tag 1).
    S16,
}

impl SampleEncoding {
    /// Bytes per single-channel sample.
    pub fn sample_bytes(self) -> u16 {
        match self {
            SampleEncoding::F32 => 4,
            SampleEncoding::S16 => 2,
        }
    }

    /// Bytes per interleaved stereo IQ frame.
    pub fn block_align(self) -> u16 {
        2 * self.sample_bytes()
    }

    /// WAVE `fmt ` chunk format tag.
    pub fn format_tag(self) -> u16 {
        match self {
            SampleEncoding::F32 => 3,
            SampleEncoding::S16 => 1,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        8 * self.sample_bytes()
    }

    /// Full-scale value recorded in the `auxi` chunk.
    pub fn max_val(self) -> i32 {
        match self {
            SampleEncoding::F32 => 1,
            SampleEncoding::S16 => 32767,
        }
    }
}

/// Output container selected for a recording session or stream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// RIFF/WAVE with 32-bit size fields.
    Wav,
    /// RF64 with a `ds64` chunk; 64-bit sizes, declared at session open.
    Rf64,
    /// Headerless interleaved complex f32.
    Cf32Raw,
}

impl ContainerKind {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerKind::Wav | ContainerKind::Rf64 => "wav",
            ContainerKind::Cf32Raw => "cf32",
        }
    }

    pub fn has_header(self) -> bool {
        !matches!(self, ContainerKind::Cf32Raw)
    }
}

/// Quantise one float sample to 16-bit PCM: `clamp(round(x * 32768))`.
#[inline]
pub fn f32_to_s16(x: f32) -> i16 {
    (x * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Widen a 16-bit integer sample back to float full scale.
#[inline]
pub fn s16_to_f32(x: i16) -> f32 {
    x as f32 / 32768.0
}

/// Quantise an f32 slice into a freshly collected i16 vector.
pub fn quantize_s16(src: &[f32]) -> Vec<i16> {
    src.iter().map(|&x| f32_to_s16(x)).collect()
}
