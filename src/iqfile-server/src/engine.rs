// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Capture engine: a dedicated thread that owns the SDR device and the ring
//! producer, publishes every received frame, and applies control-plane
//! commands between frames so samples committed before a command are always
//! observed before the command's effects.

use iqfile_core::ring::RingProducer;
use iqfile_sdr::SdrDevice;
use num_complex::Complex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use crate::writer::{RecorderControl, SessionSpec, SessionTemplate};

/// Consecutive hard device-read failures tolerated before the engine gives
/// up and shuts the process down.
const MAX_READ_ERROR_STREAK: u32 = 10;

/// Immutable parameter state published after every change; GET endpoints
/// read it lock-free through the watch channel.
#[derive(Debug, Clone)]
pub struct RadioSnapshot {
    pub sample_rate: f64,
    pub frequency: f64,
    pub gain: f64,
    pub agc: bool,
    pub paused: bool,
    pub overflow_total: u64,
}

impl RadioSnapshot {
    /// Placeholder published before the device reports real values; stream
    /// endpoints answer 503 while the rate is still zero.
    pub fn idle() -> Self {
        Self {
            sample_rate: 0.0,
            frequency: 0.0,
            gain: 0.0,
            agc: false,
            paused: true,
            overflow_total: 0,
        }
    }
}

#[derive(Debug)]
pub enum EngineCommand {
    SetFrequency(f64),
    SetGain(f64),
    SetAgc(bool),
    /// Rejected while a recording session is open.
    SetRate(f64),
    SetSetting(String, String),
    /// `None` enumerates every advertised setting; `Some(key)` reads one
    /// live driver value.
    GetSetting(Option<String>),
    SetPause(bool),
    Quit,
}

#[derive(Debug)]
pub enum EngineReply {
    Done,
    Value(String),
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("recording must be paused to change the sampling rate")]
    RecordingOpen,
    #[error("unknown setting: {0}")]
    UnknownSetting(String),
    #[error("{0}")]
    Device(String),
}

pub type EngineResult = Result<EngineReply, EngineError>;

/// One mailbox entry: a command plus the reply slot its HTTP handler waits on.
#[derive(Debug)]
pub struct EngineRequest {
    pub cmd: EngineCommand,
    pub respond_to: oneshot::Sender<EngineResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Running,
    Stopped { fatal: bool },
}

pub struct CaptureEngine {
    device: SdrDevice,
    producer: RingProducer,
    cmd_rx: mpsc::UnboundedReceiver<EngineRequest>,
    snapshot_tx: watch::Sender<RadioSnapshot>,
    recorder_tx: watch::Sender<RecorderControl>,
    status_tx: watch::Sender<EngineStatus>,
    template: SessionTemplate,
    packet_size: usize,
    paused: bool,
}

impl CaptureEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        device: SdrDevice,
        producer: RingProducer,
        cmd_rx: mpsc::UnboundedReceiver<EngineRequest>,
        snapshot_tx: watch::Sender<RadioSnapshot>,
        recorder_tx: watch::Sender<RecorderControl>,
        status_tx: watch::Sender<EngineStatus>,
        template: SessionTemplate,
        packet_size: usize,
        paused: bool,
    ) -> std::thread::JoinHandle<()> {
        let engine = Self {
            device,
            producer,
            cmd_rx,
            snapshot_tx,
            recorder_tx,
            status_tx,
            template,
            packet_size,
            paused,
        };
        std::thread::Builder::new()
            .name("iq-capture".to_string())
            .spawn(move || engine.run())
            .expect("failed to spawn iq-capture thread")
    }

    fn run(mut self) {
        let mut scratch = vec![Complex::new(0.0_f32, 0.0); self.packet_size.max(1)];
        let mut error_streak: u32 = 0;
        self.publish_snapshot();

        let fatal = loop {
            let mut quit = false;
            while let Ok(req) = self.cmd_rx.try_recv() {
                if self.handle(req) {
                    quit = true;
                }
            }
            if quit {
                break false;
            }

            match self.device.read(&mut scratch) {
                Ok(out) => {
                    error_streak = 0;
                    if out.samples > 0 {
                        let bytes: &[u8] = bytemuck::cast_slice(&scratch[..out.samples]);
                        self.producer.write(bytes);
                    }
                    if out.overflow {
                        self.publish_snapshot();
                    }
                }
                Err(e) => {
                    error_streak = error_streak.saturating_add(1);
                    warn!("device read error: {e} (streak={error_streak})");
                    if error_streak >= MAX_READ_ERROR_STREAK {
                        error!("sustained device failure, stopping capture");
                        break true;
                    }
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        };

        if let Err(e) = self.device.stop_stream() {
            warn!("failed to stop RX stream: {e}");
        }
        self.paused = true;
        let _ = self.recorder_tx.send(RecorderControl::Paused);
        self.producer.close();
        self.publish_snapshot();
        let _ = self.status_tx.send(EngineStatus::Stopped { fatal });
        info!("capture engine stopped");
    }

    /// Apply one command; returns true when the engine should quit.
    fn handle(&mut self, req: EngineRequest) -> bool {
        let EngineRequest { cmd, respond_to } = req;
        let mut quit = false;
        let result = match cmd {
            EngineCommand::SetFrequency(hz) => self
                .device
                .set_frequency(hz)
                .map(|_| EngineReply::Done)
                .map_err(|e| EngineError::Device(e.to_string())),
            EngineCommand::SetGain(db) => self
                .device
                .set_gain(db)
                .map(|_| EngineReply::Done)
                .map_err(|e| EngineError::Device(e.to_string())),
            EngineCommand::SetAgc(enable) => self
                .device
                .set_agc(enable)
                .map(|_| EngineReply::Done)
                .map_err(|e| EngineError::Device(e.to_string())),
            EngineCommand::SetRate(rate) => self.set_rate(rate),
            EngineCommand::SetSetting(key, value) => self
                .device
                .write_setting(&key, &value)
                .map(|_| EngineReply::Done)
                .map_err(|e| EngineError::Device(e.to_string())),
            EngineCommand::GetSetting(key) => self.get_setting(key),
            EngineCommand::SetPause(pause) => {
                self.set_pause(pause);
                Ok(EngineReply::Done)
            }
            EngineCommand::Quit => {
                quit = true;
                Ok(EngineReply::Done)
            }
        };
        self.publish_snapshot();
        let _ = respond_to.send(result);
        quit
    }

    /// Rate changes require a closed session and stream rebracketing.
    fn set_rate(&mut self, rate: f64) -> EngineResult {
        if !self.paused {
            return Err(EngineError::RecordingOpen);
        }
        self.device
            .stop_stream()
            .map_err(|e| EngineError::Device(e.to_string()))?;
        let set = self.device.set_sample_rate(rate);
        let restart = self.device.start_stream();
        match (set, restart) {
            (Ok(()), Ok(_mtu)) => Ok(EngineReply::Done),
            (Err(e), _) | (_, Err(e)) => Err(EngineError::Device(e.to_string())),
        }
    }

    fn get_setting(&self, key: Option<String>) -> EngineResult {
        match key {
            Some(key) => match self.device.read_setting(&key) {
                Ok(value) => Ok(EngineReply::Value(value)),
                Err(_) => Err(EngineError::UnknownSetting(key)),
            },
            None => {
                let settings = self
                    .device
                    .settings()
                    .map_err(|e| EngineError::Device(e.to_string()))?;
                let mut text = String::new();
                for (key, value) in settings {
                    text.push_str(&format!("{key}: {value}\n"));
                }
                Ok(EngineReply::Value(text))
            }
        }
    }

    fn set_pause(&mut self, pause: bool) {
        self.paused = pause;
        let control = if pause {
            RecorderControl::Paused
        } else {
            RecorderControl::Record(SessionSpec {
                template: self.template.clone(),
                sample_rate: self.device.sample_rate().unwrap_or(0.0) as u32,
                center_freq: self.device.frequency().unwrap_or(0.0) as u32,
            })
        };
        let _ = self.recorder_tx.send(control);
    }

    fn publish_snapshot(&self) {
        let prev = self.snapshot_tx.borrow().clone();
        let snap = RadioSnapshot {
            sample_rate: self.device.sample_rate().unwrap_or(prev.sample_rate),
            frequency: self.device.frequency().unwrap_or(prev.frequency),
            gain: self.device.gain().unwrap_or(prev.gain),
            agc: self.device.agc().unwrap_or(prev.agc),
            paused: self.paused,
            overflow_total: self.device.overflow_total(),
        };
        let _ = self.snapshot_tx.send(snap);
    }
}
