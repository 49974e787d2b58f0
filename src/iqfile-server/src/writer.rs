// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! File writer sink: owns the recording session, converts samples to the
//! session encoding, keeps the on-disk header sizes fresh so a crashed file
//! stays playable, and finalises container trailers on close.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use iqfile_core::ring::RingReader;
use iqfile_core::sample::{quantize_s16, ContainerKind, SampleEncoding, IQ_FRAME_BYTES};
use iqfile_core::wav::{self, ContainerParams};
use tokio::sync::watch;
use tracing::{info, warn};

/// Recording options fixed at startup; per-session rate and frequency are
/// captured at unpause time.
#[derive(Debug, Clone)]
pub struct SessionTemplate {
    pub output: String,
    pub notimestamp: bool,
    pub container: ContainerKind,
    pub encoding: SampleEncoding,
}

#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub template: SessionTemplate,
    pub sample_rate: u32,
    pub center_freq: u32,
}

/// Engine-to-writer control state.
#[derive(Debug, Clone)]
pub enum RecorderControl {
    Paused,
    Record(SessionSpec),
}

/// How often the in-place size fields are refreshed while recording.
const HEADER_REFRESH: Duration = Duration::from_secs(1);
/// Ring poll interval; also bounds the pause-reaction latency.
const POLL: Duration = Duration::from_millis(100);
/// A Wav32 session whose payload crosses this is promoted to RF64 on close.
const RF64_PROMOTE_THRESHOLD: u64 = u32::MAX as u64 - (1 << 20);

/// Scratch sized for one write burst (floats, so 64 KiB of stream bytes).
const SCRATCH_FLOATS: usize = 16 * 1024;

enum SessionEnd {
    Paused,
    Failed,
    Eof,
}

/// Compose the session file path:
/// `<output>[_<freq>_<rate>_<YYYYMMDDhhmmss>].<ext>`. An extension already
/// present on `output` wins over the container default.
pub fn session_path(spec: &SessionSpec, now: DateTime<Utc>) -> PathBuf {
    let output = Path::new(&spec.template.output);
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| spec.template.container.extension().to_string());
    let mut base = output.with_extension("").to_string_lossy().into_owned();
    if !spec.template.notimestamp {
        base.push_str(&format!(
            "_{}_{}_{}",
            spec.center_freq,
            spec.sample_rate,
            now.format("%Y%m%d%H%M%S")
        ));
    }
    PathBuf::from(format!("{base}.{ext}"))
}

/// Run the writer sink until the ring reports EOF.
pub fn run(mut reader: RingReader, mut ctrl: watch::Receiver<RecorderControl>) {
    let mut scratch = vec![0f32; SCRATCH_FLOATS];
    // After an I/O failure the writer arms only on the next control change,
    // so a broken session is not reopened in a tight loop.
    let mut wait_for_change = false;

    loop {
        let spec = loop {
            if wait_for_change {
                if ctrl.has_changed().unwrap_or(true) {
                    wait_for_change = false;
                }
            } else if let RecorderControl::Record(spec) = &*ctrl.borrow_and_update() {
                break spec.clone();
            }
            // Keep draining while idle so the cursor stays near the head.
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut scratch);
            if reader.read(bytes, POLL).eof {
                return;
            }
        };

        match record_session(&mut reader, &mut ctrl, &spec, &mut scratch) {
            SessionEnd::Eof => return,
            SessionEnd::Paused => {}
            SessionEnd::Failed => wait_for_change = true,
        }
    }
}

fn record_session(
    reader: &mut RingReader,
    ctrl: &mut watch::Receiver<RecorderControl>,
    spec: &SessionSpec,
    scratch: &mut [f32],
) -> SessionEnd {
    let start = Utc::now();
    let path = session_path(spec, start);
    let params = ContainerParams {
        encoding: spec.template.encoding,
        rf64: spec.template.container == ContainerKind::Rf64,
        sample_rate: spec.sample_rate,
        center_freq: spec.center_freq,
    };
    let has_header = spec.template.container.has_header();

    let mut file = match File::create(&path) {
        Ok(f) => f,
        Err(e) => {
            warn!("cannot create {}: {e}", path.display());
            return SessionEnd::Failed;
        }
    };
    info!("writing IQ stream to {}", path.display());

    if has_header {
        if let Err(e) = file.write_all(&wav::header(&params, Some(0), start, None)) {
            warn!("cannot write header to {}: {e}", path.display());
            return SessionEnd::Failed;
        }
    }

    let mut data_size: u64 = 0;
    let mut last_refresh = Instant::now();

    let end = loop {
        if ctrl.has_changed().unwrap_or(false) {
            if matches!(&*ctrl.borrow_and_update(), RecorderControl::Paused) {
                break SessionEnd::Paused;
            }
        }

        let status = {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut *scratch);
            reader.read(bytes, POLL)
        };

        if status.slipped > 0 {
            warn!(
                "file writer slipped {} bytes at offset {} ({})",
                status.slipped,
                data_size,
                path.display()
            );
            log_slip(&path, data_size, status.slipped);
        }

        if status.n > 0 {
            debug_assert_eq!(status.n % IQ_FRAME_BYTES, 0);
            let write = match spec.template.encoding {
                SampleEncoding::F32 => {
                    let bytes: &[u8] = bytemuck::cast_slice(&*scratch);
                    file.write_all(&bytes[..status.n]).map(|_| status.n as u64)
                }
                SampleEncoding::S16 => {
                    let quantized = quantize_s16(&scratch[..status.n / 4]);
                    let bytes: &[u8] = bytemuck::cast_slice(&quantized);
                    file.write_all(bytes).map(|_| bytes.len() as u64)
                }
            };
            match write {
                Ok(written) => data_size += written,
                Err(e) => {
                    warn!("write failed on {}: {e}; closing session", path.display());
                    return SessionEnd::Failed;
                }
            }
        }

        if has_header && last_refresh.elapsed() >= HEADER_REFRESH {
            if let Err(e) = rewrite_header(&mut file, &params, data_size, start, None) {
                warn!("header refresh failed on {}: {e}", path.display());
                return SessionEnd::Failed;
            }
            last_refresh = Instant::now();
        }

        if status.eof {
            break SessionEnd::Eof;
        }
    };

    let stop = Utc::now();
    if has_header {
        if let Err(e) = rewrite_header(&mut file, &params, data_size, start, Some(stop)) {
            warn!("finalise failed on {}: {e}", path.display());
            return end;
        }
    }
    if let Err(e) = file.sync_all() {
        warn!("sync failed on {}: {e}", path.display());
    }
    drop(file);
    info!("IQ file closed ({data_size} bytes)");

    if spec.template.container == ContainerKind::Wav && data_size > RF64_PROMOTE_THRESHOLD {
        if let Err(e) = promote_to_rf64(&path, &params, data_size, start, stop) {
            warn!("RF64 promotion failed on {}: {e}", path.display());
        }
    }
    end
}

fn rewrite_header(
    file: &mut File,
    params: &ContainerParams,
    data_size: u64,
    start: DateTime<Utc>,
    stop: Option<DateTime<Utc>>,
) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&wav::header(params, Some(data_size), start, stop))?;
    file.seek(SeekFrom::End(0))?;
    Ok(())
}

/// Offline post-close promotion: rebuild the file with an RF64 header and
/// the payload copied through, then swap it into place.
fn promote_to_rf64(
    path: &Path,
    params: &ContainerParams,
    data_size: u64,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
) -> io::Result<()> {
    let rf64_params = ContainerParams {
        rf64: true,
        ..*params
    };
    let tmp_path = path.with_extension("rf64.tmp");
    let mut src = File::open(path)?;
    src.seek(SeekFrom::Start(wav::header_len(false) as u64))?;
    let mut dst = File::create(&tmp_path)?;
    dst.write_all(&wav::header(&rf64_params, Some(data_size), start, Some(stop)))?;
    io::copy(&mut src, &mut dst)?;
    dst.sync_all()?;
    drop(dst);
    std::fs::rename(&tmp_path, path)?;
    info!("promoted {} to RF64", path.display());
    Ok(())
}

/// Sidecar slip log: recording slips are data loss and must stay visible.
fn log_slip(path: &Path, byte_offset: u64, slipped: u64) {
    let sidecar = PathBuf::from(format!("{}.slips", path.display()));
    let entry = format!("{byte_offset},{slipped},{}\n", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"));
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&sidecar)
        .and_then(|mut f| f.write_all(entry.as_bytes()));
    if let Err(e) = result {
        warn!("cannot update slip log {}: {e}", sidecar.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use iqfile_core::ring::IqRing;

    fn spec(container: ContainerKind, encoding: SampleEncoding, notimestamp: bool) -> SessionSpec {
        SessionSpec {
            template: SessionTemplate {
                output: "out".to_string(),
                notimestamp,
                container,
                encoding,
            },
            sample_rate: 1_000_000,
            center_freq: 100_100_000,
        }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn path_carries_freq_rate_and_timestamp() {
        let path = session_path(&spec(ContainerKind::Wav, SampleEncoding::S16, false), ts());
        assert_eq!(
            path,
            PathBuf::from("out_100100000_1000000_20250601120000.wav")
        );
    }

    #[test]
    fn path_without_timestamp_is_bare() {
        let path = session_path(&spec(ContainerKind::Wav, SampleEncoding::F32, true), ts());
        assert_eq!(path, PathBuf::from("out.wav"));
    }

    #[test]
    fn path_honours_explicit_extension_and_cf32_default() {
        let mut s = spec(ContainerKind::Cf32Raw, SampleEncoding::F32, true);
        assert_eq!(session_path(&s, ts()), PathBuf::from("out.cf32"));
        s.template.output = "capture.iq".to_string();
        assert_eq!(session_path(&s, ts()), PathBuf::from("capture.iq"));
    }

    /// Full session: unpause, stream samples, pause; the file must be a
    /// valid WAV with finalised sizes and quantised payload.
    #[test]
    fn records_a_valid_s16_wav_session() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("rec").to_string_lossy().into_owned();
        let mut s = spec(ContainerKind::Wav, SampleEncoding::S16, true);
        s.template.output = output;

        let (mut producer, ring) = IqRing::with_capacity(1 << 16, 256);
        let reader = ring.subscribe();
        let (ctrl_tx, ctrl_rx) = watch::channel(RecorderControl::Record(s.clone()));

        let handle = std::thread::spawn(move || run(reader, ctrl_rx));

        // 256 interleaved floats ramping over full scale.
        let samples: Vec<f32> = (0..256).map(|i| (i as f32 / 255.0) * 2.0 - 1.0).collect();
        let bytes: &[u8] = bytemuck::cast_slice(&samples);
        producer.write(bytes);
        std::thread::sleep(Duration::from_millis(300));
        ctrl_tx.send(RecorderControl::Paused).unwrap();
        std::thread::sleep(Duration::from_millis(300));
        producer.close();
        handle.join().unwrap();

        let path = dir.path().join("rec.wav");
        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[0..4], b"RIFF");
        let expected_payload = 256 * 2; // s16
        assert_eq!(data.len(), wav::header_len(false) + expected_payload);
        let riff = u32::from_le_bytes(data[4..8].try_into().unwrap());
        assert_eq!(riff as usize, data.len() - 8);
        let data_size_off = wav::header_len(false) - 4;
        let data_size = u32::from_le_bytes(data[data_size_off..data_size_off + 4].try_into().unwrap());
        assert_eq!(data_size as usize, expected_payload);
        // Quantisation rule: stored == round(x * 32768), clamped.
        let first = i16::from_le_bytes(data[wav::header_len(false)..wav::header_len(false) + 2].try_into().unwrap());
        assert_eq!(first, iqfile_core::sample::f32_to_s16(samples[0]));
        // stop_time was filled in on close (auxi data starts at offset 44).
        assert!(data[60..76].iter().any(|&b| b != 0));
    }

    /// f32 sessions are bit-exact round trips.
    #[test]
    fn records_f32_payload_bitwise() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("raw").to_string_lossy().into_owned();
        let mut s = spec(ContainerKind::Cf32Raw, SampleEncoding::F32, true);
        s.template.output = output;

        let (mut producer, ring) = IqRing::with_capacity(1 << 16, 256);
        let reader = ring.subscribe();
        let (ctrl_tx, ctrl_rx) = watch::channel(RecorderControl::Record(s.clone()));
        let handle = std::thread::spawn(move || run(reader, ctrl_rx));

        let samples: Vec<f32> = (0..128).map(|i| (i as f32).sin()).collect();
        producer.write(bytemuck::cast_slice(&samples));
        std::thread::sleep(Duration::from_millis(300));
        drop(ctrl_tx);
        producer.close();
        handle.join().unwrap();

        let data = std::fs::read(dir.path().join("raw.cf32")).unwrap();
        assert_eq!(data, bytemuck::cast_slice::<f32, u8>(&samples));
    }
}
