// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! SoapySDR device façade.
//!
//! Wraps a `soapysdr::Device` plus its RX stream behind a small surface the
//! capture engine drives: scalar setters/getters, named settings, stream
//! bracketing and a blocking `read` that normalises driver overflow
//! indications into a monotonic counter.
//!
//! The native stream format is CF32; devices that reject a CF32 stream fall
//! back to CS16, converted to float on read (`x / 32768.0`).

use num_complex::Complex;
use soapysdr::{Device, Direction, RxStream};
use thiserror::Error;

pub const DEVICE_CHANNEL: usize = 0;

/// Driver-native read timeout, long enough to amortise syscalls and short
/// enough for the engine to poll its mailbox between frames.
pub const READ_TIMEOUT_US: i64 = 100_000;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no SoapySDR devices available")]
    NoDevices,
    #[error("failed to open SoapySDR device: {0}")]
    Open(soapysdr::Error),
    #[error("stream is not active")]
    StreamInactive,
    #[error("stream is already active")]
    StreamActive,
    #[error(transparent)]
    Driver(#[from] soapysdr::Error),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// One row of `--list` output.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Args string that reopens this exact device, e.g.
    /// `driver=rtlsdr,serial=00000001`.
    pub device_string: String,
    pub label: String,
}

/// Enumerate devices the way the CLI lists them: an args string built from
/// the identifying keys plus the human label.
pub fn list_devices() -> DeviceResult<Vec<DeviceInfo>> {
    let found = soapysdr::enumerate("")?;
    let mut devices = Vec::with_capacity(found.len());
    for args in &found {
        let mut device_string = match args.get("driver") {
            Some(driver) => format!("driver={driver}"),
            None => continue,
        };
        for key in ["device_id", "serial", "hardware"] {
            if let Some(val) = args.get(key) {
                device_string.push_str(&format!(",{key}={val}"));
            }
        }
        devices.push(DeviceInfo {
            device_string,
            label: args.get("label").unwrap_or("").to_string(),
        });
    }
    Ok(devices)
}

enum RxChannel {
    Cf32(RxStream<Complex<f32>>),
    Cs16(RxStream<Complex<i16>>),
}

/// Outcome of one stream read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOutcome {
    /// Complex samples written into the caller's buffer.
    pub samples: usize,
    /// The driver signalled an overflow for this read.
    pub overflow: bool,
}

/// An opened RX device. All calls are made from the owning engine thread;
/// frequency, gain, AGC and named settings are streamable, rate changes
/// require `stop_stream`/`start_stream` bracketing.
pub struct SdrDevice {
    device: Device,
    rx: Option<RxChannel>,
    scratch16: Vec<Complex<i16>>,
    overflow_total: u64,
}

impl SdrDevice {
    /// Open by args string; an empty or absent spec opens the first
    /// enumerated device.
    pub fn open(spec: Option<&str>) -> DeviceResult<Self> {
        let device = match spec {
            Some(args) if !args.is_empty() => {
                Device::new(args).map_err(DeviceError::Open)?
            }
            _ => {
                let found = soapysdr::enumerate("")?;
                let first = found.into_iter().next().ok_or(DeviceError::NoDevices)?;
                Device::new(first).map_err(DeviceError::Open)?
            }
        };
        Ok(Self {
            device,
            rx: None,
            scratch16: Vec::new(),
            overflow_total: 0,
        })
    }

    pub fn set_sample_rate(&self, rate: f64) -> DeviceResult<()> {
        self.device
            .set_sample_rate(Direction::Rx, DEVICE_CHANNEL, rate)?;
        Ok(())
    }

    pub fn sample_rate(&self) -> DeviceResult<f64> {
        Ok(self.device.sample_rate(Direction::Rx, DEVICE_CHANNEL)?)
    }

    pub fn set_frequency(&self, hz: f64) -> DeviceResult<()> {
        self.device
            .set_frequency(Direction::Rx, DEVICE_CHANNEL, hz, ())?;
        Ok(())
    }

    pub fn frequency(&self) -> DeviceResult<f64> {
        Ok(self.device.frequency(Direction::Rx, DEVICE_CHANNEL)?)
    }

    /// Manual gain; switches AGC off first so the value sticks.
    pub fn set_gain(&self, db: f64) -> DeviceResult<()> {
        let _ = self.device.set_gain_mode(Direction::Rx, DEVICE_CHANNEL, false);
        self.device.set_gain(Direction::Rx, DEVICE_CHANNEL, db)?;
        Ok(())
    }

    /// Maximum front-end gain the driver reports; used as the default when
    /// no gain was requested.
    pub fn max_gain(&self) -> DeviceResult<f64> {
        let range = self.device.gain_range(Direction::Rx, DEVICE_CHANNEL)?;
        Ok(range.maximum)
    }

    pub fn gain(&self) -> DeviceResult<f64> {
        Ok(self.device.gain(Direction::Rx, DEVICE_CHANNEL)?)
    }

    /// Hardware AGC; enabling it first opens the gain to maximum so the AGC
    /// has range to work with.
    pub fn set_agc(&self, enable: bool) -> DeviceResult<()> {
        if enable {
            if let Ok(max) = self.max_gain() {
                let _ = self.device.set_gain(Direction::Rx, DEVICE_CHANNEL, max);
            }
        }
        self.device
            .set_gain_mode(Direction::Rx, DEVICE_CHANNEL, enable)?;
        Ok(())
    }

    pub fn agc(&self) -> DeviceResult<bool> {
        Ok(self.device.gain_mode(Direction::Rx, DEVICE_CHANNEL)?)
    }

    pub fn write_setting(&self, key: &str, value: &str) -> DeviceResult<()> {
        self.device.write_setting(key, value)?;
        Ok(())
    }

    pub fn read_setting(&self, key: &str) -> DeviceResult<String> {
        Ok(self.device.read_setting(key)?)
    }

    /// Live `name: value` pairs for every setting the driver advertises.
    pub fn settings(&self) -> DeviceResult<Vec<(String, String)>> {
        let info = self.device.setting_info()?;
        let mut out = Vec::with_capacity(info.len());
        for arg in info {
            let value = self
                .device
                .read_setting(&arg.key)
                .unwrap_or_else(|_| String::from("unknown"));
            out.push((arg.key, value));
        }
        Ok(out)
    }

    /// Activate the RX stream; CF32 natively, CS16 as fallback. Returns the
    /// driver MTU in samples.
    pub fn start_stream(&mut self) -> DeviceResult<usize> {
        if self.rx.is_some() {
            return Err(DeviceError::StreamActive);
        }
        let mut rx = match self.device.rx_stream::<Complex<f32>>(&[DEVICE_CHANNEL]) {
            Ok(stream) => RxChannel::Cf32(stream),
            Err(e) => {
                tracing::warn!("CF32 stream unavailable ({e}); falling back to CS16");
                RxChannel::Cs16(self.device.rx_stream::<Complex<i16>>(&[DEVICE_CHANNEL])?)
            }
        };
        let mtu = match &mut rx {
            RxChannel::Cf32(s) => {
                s.activate(None)?;
                s.mtu()?
            }
            RxChannel::Cs16(s) => {
                s.activate(None)?;
                s.mtu()?
            }
        };
        self.rx = Some(rx);
        Ok(mtu)
    }

    pub fn stop_stream(&mut self) -> DeviceResult<()> {
        match self.rx.take() {
            Some(RxChannel::Cf32(mut s)) => s.deactivate(None)?,
            Some(RxChannel::Cs16(mut s)) => s.deactivate(None)?,
            None => {}
        }
        Ok(())
    }

    /// Blocking read of up to `buf.len()` samples. Timeouts return zero
    /// samples; overflows increment the running total and set the flag.
    pub fn read(&mut self, buf: &mut [Complex<f32>]) -> DeviceResult<ReadOutcome> {
        let rx = self.rx.as_mut().ok_or(DeviceError::StreamInactive)?;
        let read = match rx {
            RxChannel::Cf32(stream) => stream.read(&mut [buf], READ_TIMEOUT_US),
            RxChannel::Cs16(stream) => {
                self.scratch16.resize(buf.len(), Complex::new(0, 0));
                match stream.read(&mut [&mut self.scratch16[..]], READ_TIMEOUT_US) {
                    Ok(n) => {
                        for (dst, src) in buf.iter_mut().zip(&self.scratch16[..n]) {
                            *dst = Complex::new(
                                src.re as f32 / 32768.0,
                                src.im as f32 / 32768.0,
                            );
                        }
                        Ok(n)
                    }
                    Err(e) => Err(e),
                }
            }
        };
        match read {
            Ok(n) => Ok(ReadOutcome {
                samples: n,
                overflow: false,
            }),
            Err(e) if e.code == soapysdr::ErrorCode::Timeout => Ok(ReadOutcome::default()),
            Err(e) if e.code == soapysdr::ErrorCode::Overflow => {
                self.overflow_total += 1;
                Ok(ReadOutcome {
                    samples: 0,
                    overflow: true,
                })
            }
            Err(e) => Err(DeviceError::Driver(e)),
        }
    }

    /// Monotonic count of driver overflow indications since open.
    pub fn overflow_total(&self) -> u64 {
        self.overflow_total
    }
}
