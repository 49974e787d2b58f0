// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! RIFF/WAVE and RF64 container headers with the SDR `auxi` metadata chunk.
//!
//! All multi-byte fields are little-endian. The `auxi` layout follows the
//! SpectraVue/HDSDR convention: two SYSTEMTIME records, then centre
//! frequency, ADC frequency, IF frequency, bandwidth, IQ offset, dB offset,
//! full-scale value and two reserved words (68 data bytes).

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::sample::SampleEncoding;

/// Stereo IQ: I on channel 0, Q on channel 1.
pub const CHANNELS: u16 = 2;

const AUXI_DATA_LEN: u32 = 68;
const DS64_DATA_LEN: u32 = 24;

/// Everything needed to emit a container header for one session or stream.
#[derive(Debug, Clone, Copy)]
pub struct ContainerParams {
    pub encoding: SampleEncoding,
    /// RF64 is declared up front; WAV headers never grow a `ds64` later.
    pub rf64: bool,
    pub sample_rate: u32,
    pub center_freq: u32,
}

/// Total header length in bytes (everything before the sample payload).
pub fn header_len(rf64: bool) -> usize {
    // RIFF(12) + fmt(24) + auxi(8 + 68) [+ ds64(8 + 24)] + data hdr(8)
    if rf64 {
        152
    } else {
        120
    }
}

/// Pack a wall-clock instant as a Windows SYSTEMTIME (eight u16 fields:
/// year, month, day-of-week with Sunday = 0, day, hour, minute, second,
/// millisecond).
pub fn systemtime_fields(ts: DateTime<Utc>) -> [u8; 16] {
    let fields: [u16; 8] = [
        ts.year().clamp(0, u16::MAX as i32) as u16,
        ts.month() as u16,
        ts.weekday().num_days_from_sunday() as u16,
        ts.day() as u16,
        ts.hour() as u16,
        ts.minute() as u16,
        ts.second() as u16,
        (ts.timestamp_subsec_millis() % 1000) as u16,
    ];
    let mut out = [0u8; 16];
    for (chunk, field) in out.chunks_exact_mut(2).zip(fields) {
        chunk.copy_from_slice(&field.to_le_bytes());
    }
    out
}

/// Build a complete container header.
///
/// `data_size == None` means "still streaming": 32-bit size fields saturate
/// at `0xFFFFFFFF` and the `ds64` sizes are written as unknown-maximum, the
/// same convention the periodic in-place rewrite later replaces with real
/// values. `stop` stays all-zero until the close rewrite supplies it.
pub fn header(
    p: &ContainerParams,
    data_size: Option<u64>,
    start: DateTime<Utc>,
    stop: Option<DateTime<Utc>>,
) -> Vec<u8> {
    let block_align = CHANNELS * p.encoding.sample_bytes();
    let data = data_size.unwrap_or(u64::MAX);
    let mut buf = Vec::with_capacity(header_len(p.rf64));

    // RIFF / RF64 preamble; size patched at the end.
    buf.extend_from_slice(if p.rf64 { b"RF64" } else { b"RIFF" });
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&p.encoding.format_tag().to_le_bytes());
    buf.extend_from_slice(&CHANNELS.to_le_bytes());
    buf.extend_from_slice(&p.sample_rate.to_le_bytes());
    buf.extend_from_slice(&(p.sample_rate.wrapping_mul(block_align as u32)).to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&p.encoding.bits_per_sample().to_le_bytes());

    // auxi
    buf.extend_from_slice(b"auxi");
    buf.extend_from_slice(&AUXI_DATA_LEN.to_le_bytes());
    buf.extend_from_slice(&systemtime_fields(start));
    match stop {
        Some(ts) => buf.extend_from_slice(&systemtime_fields(ts)),
        None => buf.extend_from_slice(&[0u8; 16]),
    }
    buf.extend_from_slice(&p.center_freq.to_le_bytes());
    buf.extend_from_slice(&p.sample_rate.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes()); // IF frequency
    buf.extend_from_slice(&p.sample_rate.to_le_bytes()); // bandwidth
    buf.extend_from_slice(&0i32.to_le_bytes()); // IQ offset
    buf.extend_from_slice(&0i32.to_le_bytes()); // dB offset
    buf.extend_from_slice(&p.encoding.max_val().to_le_bytes());
    buf.extend_from_slice(&[0u8; 8]); // reserved

    if p.rf64 {
        let riff_size = (header_len(true) as u64 - 8).saturating_add(data);
        buf.extend_from_slice(b"ds64");
        buf.extend_from_slice(&DS64_DATA_LEN.to_le_bytes());
        buf.extend_from_slice(&riff_size.to_le_bytes());
        buf.extend_from_slice(&data.to_le_bytes());
        buf.extend_from_slice(&(data / block_align as u64).to_le_bytes());
    }

    // data header
    buf.extend_from_slice(b"data");
    if p.rf64 {
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        buf[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    } else {
        let data32 = u32::try_from(data).unwrap_or(u32::MAX);
        buf.extend_from_slice(&data32.to_le_bytes());
        let riff_size = (header_len(false) as u64 - 8).saturating_add(data);
        let riff32 = u32::try_from(riff_size).unwrap_or(u32::MAX);
        buf[4..8].copy_from_slice(&riff32.to_le_bytes());
    }

    debug_assert_eq!(buf.len(), header_len(p.rf64));
    buf
}
