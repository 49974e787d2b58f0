// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod engine;
mod http;
mod meter;
mod writer;

use std::time::{Duration, Instant};

use actix_web::web;
use clap::Parser;
use iqfile_core::ring::IqRing;
use iqfile_core::sample::{ContainerKind, SampleEncoding, IQ_FRAME_BYTES};
use iqfile_core::DynResult;
use iqfile_sdr::SdrDevice;
use tokio::signal;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use engine::{CaptureEngine, EngineCommand, EngineRequest, EngineStatus, RadioSnapshot};
use meter::PowerPlan;
use writer::{RecorderControl, SessionSpec, SessionTemplate};

const PKG_DESCRIPTION: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " - SoapySDR IQ recorder and streaming server"
);

/// Bound on draining sinks at shutdown before survivors are abandoned.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Parser)]
#[command(version = env!("CARGO_PKG_VERSION"), about = PKG_DESCRIPTION)]
struct Cli {
    /// List available device strings and exit
    #[arg(short = 'l', long = "list")]
    list: bool,
    /// Device string, eg driver=rtlsdr
    #[arg(short = 'd', long = "device")]
    device: Option<String>,
    /// Center frequency (Hz)
    #[arg(short = 'f', long = "frequency")]
    frequency: Option<f64>,
    /// Sampling rate (Hz)
    #[arg(short = 'r', long = "rate")]
    rate: Option<f64>,
    /// Front end gain (dB); defaults to the driver maximum
    #[arg(short = 'g', long = "gain")]
    gain: Option<f64>,
    /// Enable AGC
    #[arg(short = 'a', long = "agc")]
    agc: bool,
    /// Swap IQ signals
    #[arg(long = "iq-swap")]
    iq_swap: bool,
    /// Enable bias tee
    #[arg(long = "biastee")]
    biastee: bool,
    /// Enable digital AGC
    #[arg(long = "digital-agc")]
    digital_agc: bool,
    /// Enable offset tune
    #[arg(long = "offset-tune")]
    offset_tune: bool,
    /// Select I or Q channel for direct sampling: 1 or 2
    #[arg(long = "direct-samp")]
    direct_samp: Option<u32>,

    /// Output file name
    #[arg(long = "output", default_value = "output")]
    output: String,
    /// Start with recording paused
    #[arg(long = "pause")]
    pause: bool,
    /// Write 16-bit PCM samples for WAV
    #[arg(long = "pcm16")]
    pcm16: bool,
    /// Write a raw .cf32 file rather than WAV
    #[arg(long = "cf32")]
    cf32: bool,
    /// Write an RF64 file for WAV
    #[arg(long = "rf64")]
    rf64: bool,
    /// Do not append a timestamp to the output file name
    #[arg(long = "notimestamp")]
    notimestamp: bool,

    /// Samples per device read
    #[arg(long = "packet-size", default_value_t = 1024)]
    packet_size: usize,
    /// Stream buffer size in MB
    #[arg(long = "buffer-size", default_value_t = 256)]
    buffer_size: usize,

    /// Size of the fft to use; overridden by --rbw
    #[arg(long = "bins", default_value_t = 64)]
    bins: usize,
    /// Power resolution bandwidth (Hz)
    #[arg(long = "rbw")]
    rbw: Option<f64>,
    /// Power integration time (sec)
    #[arg(long = "integration", default_value_t = 1.0)]
    integration: f64,
    /// Specific number of ffts to average
    #[arg(long = "average")]
    average: Option<usize>,

    /// REST server hostname
    #[arg(long = "hostname", default_value = "0.0.0.0")]
    hostname: String,
    /// REST server port number
    #[arg(long = "port", default_value_t = 8080)]
    port: u16,

    /// Show streaming peak values
    #[arg(long = "meter")]
    meter: bool,
    /// Peak meter refresh (sec)
    #[arg(long = "refresh", default_value_t = 1.0)]
    refresh: f64,
}

fn init_logging() {
    let level = std::env::var("IQFILE_LOG")
        .ok()
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_target(false)
        .with_max_level(level)
        .init();
}

/// Apply the device flag group; errors here are fatal at startup.
fn configure_device(device: &SdrDevice, cli: &Cli) -> DynResult<()> {
    if let Some(rate) = cli.rate {
        device.set_sample_rate(rate)?;
    }
    if let Some(frequency) = cli.frequency {
        device.set_frequency(frequency)?;
    }
    if cli.agc {
        device.set_agc(true)?;
    } else {
        match cli.gain {
            Some(gain) => device.set_gain(gain)?,
            None => {
                let max = device.max_gain()?;
                device.set_gain(max)?;
            }
        }
    }

    if cli.iq_swap {
        device.write_setting("iq_swap", "true")?;
    }
    if cli.biastee {
        device.write_setting("biastee", "true")?;
    }
    if cli.digital_agc {
        device.write_setting("digital_agc", "true")?;
    }
    if cli.offset_tune {
        device.write_setting("offset_tune", "true")?;
    }
    if let Some(channel) = cli.direct_samp {
        device.write_setting("direct_samp", &channel.to_string())?;
    }
    Ok(())
}

fn session_template(cli: &Cli) -> SessionTemplate {
    let container = if cli.cf32 {
        ContainerKind::Cf32Raw
    } else if cli.rf64 {
        ContainerKind::Rf64
    } else {
        ContainerKind::Wav
    };
    let encoding = if cli.pcm16 {
        SampleEncoding::S16
    } else {
        SampleEncoding::F32
    };
    SessionTemplate {
        output: cli.output.clone(),
        notimestamp: cli.notimestamp,
        container,
        encoding,
    }
}

async fn wait_for_stop(mut status_rx: watch::Receiver<EngineStatus>) -> bool {
    loop {
        if let EngineStatus::Stopped { fatal } = *status_rx.borrow() {
            return fatal;
        }
        if status_rx.changed().await.is_err() {
            return false;
        }
    }
}

/// Join sink threads, bounded by the shutdown watchdog.
fn join_with_grace(handles: Vec<(&'static str, std::thread::JoinHandle<()>)>) {
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    for (name, handle) in handles {
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!("{name} sink did not drain in time, abandoning it");
        }
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();
    init_logging();

    if cli.list {
        let devices = iqfile_sdr::list_devices()?;
        if devices.is_empty() {
            println!("No radio devices available.");
            return Ok(());
        }
        println!("{:35} Label", "Device String");
        for dev in devices {
            println!("{:35} {}", dev.device_string, dev.label);
        }
        return Ok(());
    }

    // Open and configure the radio; any failure here exits non-zero.
    let mut device = SdrDevice::open(cli.device.as_deref())?;
    configure_device(&device, &cli)?;

    let rate = device.sample_rate()?;
    let frequency = device.frequency()?;
    if rate <= 0.0 {
        return Err("device reports no sample rate; pass --rate".into());
    }
    info!("Sampling rate: {:11.6} MHz", rate / 1e6);
    info!("Frequency:     {:11.6} MHz", frequency / 1e6);
    info!("AGC:           {}", device.agc().map(iqfile_core::yes_no).unwrap_or("unknown"));
    info!("Gain:          {:.4} dB", device.gain().unwrap_or(0.0));
    match device.settings() {
        Ok(settings) => {
            for (key, value) in settings {
                info!("{key:14}: {value:>11}");
            }
        }
        Err(e) => warn!("cannot enumerate driver settings: {e}"),
    }

    device.start_stream()?;

    // Ring sized from --buffer-size MiB; the slip margin is one max frame.
    let margin = cli.packet_size.max(1) * IQ_FRAME_BYTES;
    let (producer, ring) = IqRing::with_capacity(cli.buffer_size.max(1) << 20, margin);

    let template = session_template(&cli);
    let initial_snapshot = RadioSnapshot {
        sample_rate: rate,
        frequency,
        gain: device.gain().unwrap_or(0.0),
        agc: device.agc().unwrap_or(false),
        paused: cli.pause,
        overflow_total: 0,
    };
    let initial_control = if cli.pause {
        RecorderControl::Paused
    } else {
        RecorderControl::Record(SessionSpec {
            template: template.clone(),
            sample_rate: rate as u32,
            center_freq: frequency as u32,
        })
    };

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<EngineRequest>();
    let (snapshot_tx, snapshot_rx) = watch::channel(initial_snapshot);
    let (recorder_tx, recorder_rx) = watch::channel(initial_control);
    let (status_tx, status_rx) = watch::channel(EngineStatus::Running);
    let (peak_tx, _) = broadcast::channel::<String>(64);
    let (power_tx, _) = broadcast::channel::<String>(64);

    let plan = PowerPlan::derive(rate, cli.bins, cli.rbw, cli.integration, cli.average);
    info!("fft size = {}", plan.fft_n);
    info!("average = {}", plan.average);
    info!("rbw = {:.2} Hz", plan.rbw);

    // Sinks subscribe before capture starts so they see the first frame.
    let writer_reader = ring.subscribe();
    let peak_reader = ring.subscribe();
    let power_reader = ring.subscribe();

    let writer_handle = std::thread::Builder::new()
        .name("iq-writer".to_string())
        .spawn(move || writer::run(writer_reader, recorder_rx))
        .expect("failed to spawn iq-writer thread");
    let peak_handle = {
        let snapshot_rx = snapshot_rx.clone();
        let peak_tx = peak_tx.clone();
        let refresh = cli.refresh;
        let to_stdout = cli.meter;
        std::thread::Builder::new()
            .name("peak-meter".to_string())
            .spawn(move || meter::run_peak(peak_reader, snapshot_rx, peak_tx, refresh, to_stdout))
            .expect("failed to spawn peak-meter thread")
    };
    let power_handle = {
        let snapshot_rx = snapshot_rx.clone();
        let power_tx = power_tx.clone();
        std::thread::Builder::new()
            .name("power-meter".to_string())
            .spawn(move || meter::run_power(power_reader, snapshot_rx, power_tx, plan))
            .expect("failed to spawn power-meter thread")
    };

    let engine_handle = CaptureEngine::spawn(
        device,
        producer,
        cmd_rx,
        snapshot_tx,
        recorder_tx,
        status_tx,
        template,
        cli.packet_size,
        cli.pause,
    );

    let state = web::Data::new(http::AppState {
        cmd_tx: cmd_tx.clone(),
        snapshot_rx,
        ring,
        peak_tx,
        power_tx,
        plan,
    });
    let server = http::build_server((cli.hostname.clone(), cli.port), state)?;
    let server_handle = server.handle();
    info!("REST server listening on {}:{}", cli.hostname, cli.port);
    let server_task = tokio::spawn(server);

    // Run until the engine stops, by /quit, SIGINT or sustained device
    // failure.
    let status_for_interrupt = status_rx.clone();
    let fatal = tokio::select! {
        fatal = wait_for_stop(status_rx) => fatal,
        _ = signal::ctrl_c() => {
            info!("interrupt received, stopping capture");
            let (respond_to, _reply) = oneshot::channel();
            let _ = cmd_tx.send(EngineRequest { cmd: EngineCommand::Quit, respond_to });
            wait_for_stop(status_for_interrupt).await
        }
    };

    let _ = engine_handle.join();
    join_with_grace(vec![
        ("writer", writer_handle),
        ("peak", peak_handle),
        ("power", power_handle),
    ]);

    server_handle.stop(false).await;
    let _ = server_task.await;

    if fatal {
        return Err("capture stopped after sustained device failure".into());
    }
    info!("shutdown complete");
    Ok(())
}
