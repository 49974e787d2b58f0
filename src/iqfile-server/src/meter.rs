// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Telemetry sinks: the peak level meter and the rtl_power-format
//! periodogram. Both are independent ring consumers; their output lines fan
//! out over broadcast channels to `/peak` and `/power` subscribers and,
//! for the peak meter, optionally to stdout.

use std::f32::consts::PI;
use std::time::Duration;

use chrono::Utc;
use iqfile_core::ring::RingReader;
use num_complex::Complex;
use rustfft::num_complex::Complex as FftComplex;
use rustfft::FftPlanner;
use tokio::sync::{broadcast, watch};

use crate::engine::RadioSnapshot;

/// Smallest level the peak meter resolves (f32 resolution, as dB reference).
const PEAK_EPS: f32 = 1e-6;
/// Power floor for the periodogram dB conversion (f16 resolution).
const POWER_EPS: f32 = 1e-3;

const POLL: Duration = Duration::from_millis(250);

/// Derived periodogram geometry, fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct PowerPlan {
    /// FFT size; power of two, derived from `--rbw` or `--bins`.
    pub fft_n: usize,
    /// FFTs averaged per emitted line.
    pub average: usize,
    /// Configured integration time in seconds.
    pub integration: f64,
    /// Actual resolution bandwidth: `rate / fft_n`.
    pub rbw: f64,
}

impl PowerPlan {
    pub fn derive(
        rate: f64,
        bins: usize,
        rbw: Option<f64>,
        integration: f64,
        average: Option<usize>,
    ) -> Self {
        let requested = match rbw {
            Some(rbw) if rbw > 0.0 => rate / rbw,
            _ => bins as f64,
        };
        let fft_n = (requested.max(1.0).ceil() as usize).next_power_of_two();
        let fft_time = fft_n as f64 / rate;
        let average = average
            .unwrap_or_else(|| (integration / fft_time).ceil() as usize)
            .max(1);
        Self {
            fft_n,
            average,
            integration,
            rbw: rate / fft_n as f64,
        }
    }

    /// Samples integrated into one emitted line.
    pub fn samples_per_line(&self) -> usize {
        self.average * self.fft_n
    }
}

/// Peak meter: rolling maximum of |I| and |Q|, one dBFS line per refresh
/// interval, plus an auxiliary line whenever the overflow total advanced.
pub fn run_peak(
    mut reader: RingReader,
    snapshot_rx: watch::Receiver<RadioSnapshot>,
    tx: broadcast::Sender<String>,
    refresh: f64,
    to_stdout: bool,
) {
    let mut scratch = vec![0f32; 8192];
    let mut peak = 0f32;
    let mut count: u64 = 0;
    let mut last_overflow: u64 = 0;

    loop {
        let status = {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut scratch);
            reader.read(bytes, POLL)
        };
        let floats = status.n / 4;
        for &v in &scratch[..floats] {
            peak = peak.max(v.abs());
        }
        count += floats as u64;

        let snapshot = snapshot_rx.borrow().clone();
        // The window is counted in scalars: two per complex sample.
        if count as f64 > 2.0 * refresh * snapshot.sample_rate {
            let dbfs = 20.0 * (peak + PEAK_EPS).log10();
            let line = format!("{:.1}", dbfs);
            if to_stdout {
                println!("{line}");
            }
            let _ = tx.send(line);
            if snapshot.overflow_total > last_overflow {
                let aux = format!("overflow {}", snapshot.overflow_total);
                if to_stdout {
                    println!("{aux}");
                }
                let _ = tx.send(aux);
                last_overflow = snapshot.overflow_total;
            }
            peak = 0.0;
            count = 0;
        }

        if status.eof {
            return;
        }
    }
}

/// Power meter: Hann-windowed FFTs over `fft_n`-sample windows, fftshifted
/// magnitude-squared averages, one rtl_power line per integration interval:
/// `date, time, f_lo, f_hi, bin_hz, n_samples, db_0, ..., db_{N-1}`.
pub fn run_power(
    mut reader: RingReader,
    snapshot_rx: watch::Receiver<RadioSnapshot>,
    tx: broadcast::Sender<String>,
    plan: PowerPlan,
) {
    let fft_n = plan.fft_n;
    let window: Vec<f32> = (0..fft_n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (fft_n - 1).max(1) as f32).cos()))
        .collect();
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(fft_n);

    let mut scratch = vec![0f32; (2 * fft_n).max(8192)];
    let mut pending: Vec<Complex<f32>> = Vec::with_capacity(fft_n);
    let mut fft_buf: Vec<FftComplex<f32>> = vec![FftComplex::new(0.0, 0.0); fft_n];
    let mut acc = vec![0f32; fft_n];
    let mut rows = 0usize;

    loop {
        let status = {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut scratch);
            reader.read(bytes, POLL)
        };
        let floats = status.n / 4;

        for pair in scratch[..floats].chunks_exact(2) {
            pending.push(Complex::new(pair[0], pair[1]));
            if pending.len() < fft_n {
                continue;
            }

            for (dst, (sample, &w)) in fft_buf.iter_mut().zip(pending.iter().zip(&window)) {
                *dst = FftComplex::new(sample.re * w, sample.im * w);
            }
            pending.clear();
            fft.process(&mut fft_buf);

            // FFT-shift while accumulating so bin 0 is the lowest frequency.
            let half = fft_n / 2;
            for (i, value) in fft_buf[half..].iter().chain(fft_buf[..half].iter()).enumerate() {
                let mag2 = (value.re * value.re + value.im * value.im)
                    / (fft_n as f32 * fft_n as f32);
                acc[i] += mag2;
            }
            rows += 1;

            if rows == plan.average {
                let snapshot = snapshot_rx.borrow().clone();
                let line = power_line(&acc, rows, &plan, &snapshot);
                let _ = tx.send(line);
                acc.fill(0.0);
                rows = 0;
            }
        }

        if status.eof {
            return;
        }
    }
}

fn power_line(acc: &[f32], rows: usize, plan: &PowerPlan, snapshot: &RadioSnapshot) -> String {
    let now = Utc::now();
    let rate = snapshot.sample_rate;
    let f_lo = snapshot.frequency - rate / 2.0;
    let f_hi = snapshot.frequency + rate / 2.0;
    let mut line = format!(
        "{},{},{:.0},{:.0},{:.0},{}",
        now.format("%Y-%m-%d"),
        now.format("%H:%M:%S"),
        f_lo,
        f_hi,
        plan.rbw,
        plan.samples_per_line(),
    );
    for &p in acc {
        let avg = p / rows as f32;
        line.push_str(&format!(",{:.1}", 10.0 * ((avg + POWER_EPS) / POWER_EPS).log10()));
    }
    line
}
