// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! REST control plane and chunked stream endpoints.
//!
//! Parameter mutations are posted to the capture engine's mailbox and the
//! handler waits on the reply slot; GETs for scalar parameters read the
//! lock-free snapshot. Stream endpoints subscribe a ring consumer serviced
//! by a bridge thread, so a stalled client can only ever slip its own
//! cursor, never the producer.

use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::http::{header, Method};
use actix_web::{web, App, Error, HttpRequest, HttpResponse, HttpServer};
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::{once, StreamExt};
use iqfile_core::ring::{IqRing, RingReader};
use iqfile_core::sample::{quantize_s16, SampleEncoding};
use iqfile_core::wav::{self, ContainerParams};
use iqfile_core::{parse_bool, parse_float, yes_no};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tracing::{debug, info};

use crate::engine::{EngineCommand, EngineError, EngineReply, EngineRequest, RadioSnapshot};
use crate::meter::PowerPlan;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
/// Buffered chunks per stream connection before the bridge starts waiting
/// on the client (and, eventually, slips).
const STREAM_CHANNEL_DEPTH: usize = 8;

/// Shared state handed to every handler.
pub struct AppState {
    pub cmd_tx: mpsc::UnboundedSender<EngineRequest>,
    pub snapshot_rx: watch::Receiver<RadioSnapshot>,
    pub ring: Arc<IqRing>,
    pub peak_tx: broadcast::Sender<String>,
    pub power_tx: broadcast::Sender<String>,
    pub plan: PowerPlan,
}

impl AppState {
    fn snapshot(&self) -> RadioSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}

fn text(code: actix_web::http::StatusCode, body: impl Into<String>) -> HttpResponse {
    let mut body = body.into();
    body.push('\n');
    HttpResponse::build(code)
        .insert_header(header::ContentType::plaintext())
        .body(body)
}

fn ok() -> HttpResponse {
    text(actix_web::http::StatusCode::OK, "OK")
}

fn value(data: impl ToString) -> HttpResponse {
    text(actix_web::http::StatusCode::OK, data.to_string().trim_end())
}

fn bad_request(msg: &str) -> HttpResponse {
    text(actix_web::http::StatusCode::BAD_REQUEST, msg)
}

fn not_found() -> HttpResponse {
    text(actix_web::http::StatusCode::NOT_FOUND, "Not Found")
}

fn unavailable() -> HttpResponse {
    text(
        actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
        "stream not running",
    )
}

/// Round-trip a command through the engine mailbox.
async fn send_command(state: &AppState, cmd: EngineCommand) -> Result<EngineReply, EngineError> {
    let (respond_to, reply) = oneshot::channel();
    state
        .cmd_tx
        .send(EngineRequest { cmd, respond_to })
        .map_err(|_| EngineError::Device("capture engine is gone".to_string()))?;
    match tokio::time::timeout(COMMAND_TIMEOUT, reply).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) | Err(_) => Err(EngineError::Device("engine did not respond".to_string())),
    }
}

fn reply_of(result: Result<EngineReply, EngineError>) -> HttpResponse {
    match result {
        Ok(EngineReply::Done) => ok(),
        Ok(EngineReply::Value(v)) => value(v),
        Err(EngineError::UnknownSetting(_)) => not_found(),
        Err(e) => bad_request(&e.to_string()),
    }
}

// --- parameter mutation ----------------------------------------------------

async fn put_quit(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let Some(quit) = parse_bool(&String::from_utf8_lossy(&body)) else {
        return bad_request("Bad Request");
    };
    if quit {
        info!("shutdown requested over REST");
        let (respond_to, _reply) = oneshot::channel();
        let _ = state.cmd_tx.send(EngineRequest {
            cmd: EngineCommand::Quit,
            respond_to,
        });
    }
    ok()
}

async fn put_rate(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    match parse_float(&String::from_utf8_lossy(&body)) {
        Some(rate) => reply_of(send_command(&state, EngineCommand::SetRate(rate)).await),
        None => bad_request("Bad Request"),
    }
}

async fn put_frequency(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    match parse_float(&String::from_utf8_lossy(&body)) {
        Some(hz) => reply_of(send_command(&state, EngineCommand::SetFrequency(hz)).await),
        None => bad_request("Bad Request"),
    }
}

async fn put_gain(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    match parse_float(&String::from_utf8_lossy(&body)) {
        Some(db) => reply_of(send_command(&state, EngineCommand::SetGain(db)).await),
        None => bad_request("Bad Request"),
    }
}

async fn put_agc(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    match parse_bool(&String::from_utf8_lossy(&body)) {
        Some(enable) => reply_of(send_command(&state, EngineCommand::SetAgc(enable)).await),
        None => bad_request("Bad Request"),
    }
}

async fn put_pause(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    match parse_bool(&String::from_utf8_lossy(&body)) {
        Some(pause) => reply_of(send_command(&state, EngineCommand::SetPause(pause)).await),
        None => bad_request("Bad Request"),
    }
}

async fn put_setting(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let value = String::from_utf8_lossy(&body).trim().to_string();
    let cmd = EngineCommand::SetSetting(path.into_inner(), value);
    reply_of(send_command(&state, cmd).await)
}

// --- parameter reads -------------------------------------------------------

async fn get_rate(state: web::Data<AppState>) -> HttpResponse {
    value(state.snapshot().sample_rate as i64)
}

async fn get_frequency(state: web::Data<AppState>) -> HttpResponse {
    value(state.snapshot().frequency as i64)
}

async fn get_gain(state: web::Data<AppState>) -> HttpResponse {
    value(state.snapshot().gain)
}

async fn get_agc(state: web::Data<AppState>) -> HttpResponse {
    value(yes_no(state.snapshot().agc))
}

async fn get_pause(state: web::Data<AppState>) -> HttpResponse {
    value(yes_no(state.snapshot().paused))
}

async fn get_settings(state: web::Data<AppState>) -> HttpResponse {
    reply_of(send_command(&state, EngineCommand::GetSetting(None)).await)
}

async fn get_setting(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    reply_of(send_command(&state, EngineCommand::GetSetting(Some(path.into_inner()))).await)
}

async fn get_bins(state: web::Data<AppState>) -> HttpResponse {
    value(state.plan.fft_n)
}

async fn get_rbw(state: web::Data<AppState>) -> HttpResponse {
    value(state.plan.rbw)
}

async fn get_integration(state: web::Data<AppState>) -> HttpResponse {
    value(state.plan.integration)
}

async fn get_average(state: web::Data<AppState>) -> HttpResponse {
    value(state.plan.average)
}

// --- telemetry streams -----------------------------------------------------

fn line_stream(rx: broadcast::Receiver<String>) -> HttpResponse {
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(line) => Some(Ok::<Bytes, Error>(Bytes::from(format!("{line}\n")))),
            // A lagged telemetry reader just skips; the feed is periodic.
            Err(_) => None,
        }
    });
    HttpResponse::Ok()
        .insert_header(header::ContentType::plaintext())
        .streaming(stream)
}

async fn get_peak(state: web::Data<AppState>) -> HttpResponse {
    if state.snapshot().sample_rate <= 0.0 {
        return unavailable();
    }
    line_stream(state.peak_tx.subscribe())
}

async fn get_power(state: web::Data<AppState>) -> HttpResponse {
    if state.snapshot().sample_rate <= 0.0 {
        return unavailable();
    }
    line_stream(state.power_tx.subscribe())
}

// --- sample streams --------------------------------------------------------

/// Feed one HTTP stream connection from its ring cursor. Ends on slip, EOF
/// or a vanished client; a stalled client eventually slips its own cursor
/// and is disconnected without touching the producer.
fn stream_bridge(mut reader: RingReader, tx: mpsc::Sender<Bytes>, encoding: Option<SampleEncoding>) {
    let mut scratch = vec![0f32; 16 * 1024];
    'conn: loop {
        let status = {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut scratch);
            reader.read(bytes, Duration::from_millis(250))
        };
        if status.slipped > 0 {
            debug!("HTTP stream slipped {} bytes, closing", status.slipped);
            break;
        }
        if status.n > 0 {
            let chunk = match encoding {
                Some(SampleEncoding::S16) => {
                    let quantized = quantize_s16(&scratch[..status.n / 4]);
                    Bytes::from(bytemuck::cast_slice::<i16, u8>(&quantized).to_vec())
                }
                _ => {
                    let bytes: &[u8] = bytemuck::cast_slice(&scratch);
                    Bytes::copy_from_slice(&bytes[..status.n])
                }
            };
            let mut pending = chunk;
            let before = reader.slip_count();
            loop {
                match tx.try_send(pending) {
                    Ok(()) => break,
                    Err(mpsc::error::TrySendError::Closed(_)) => break 'conn,
                    Err(mpsc::error::TrySendError::Full(chunk)) => {
                        // Client is not draining; once the producer slips our
                        // cursor the connection is torn down.
                        if reader.slip_count() > before {
                            break 'conn;
                        }
                        pending = chunk;
                        std::thread::sleep(Duration::from_millis(50));
                    }
                }
            }
        }
        if status.eof {
            break;
        }
    }
}

/// `encoding == None` streams raw CF32; otherwise a streaming WAV header
/// precedes payload in the given encoding.
fn sample_stream(state: &AppState, encoding: Option<SampleEncoding>) -> HttpResponse {
    let snapshot = state.snapshot();
    if snapshot.sample_rate <= 0.0 {
        return unavailable();
    }

    let reader = state.ring.subscribe();
    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_DEPTH);
    std::thread::Builder::new()
        .name("http-stream".to_string())
        .spawn(move || stream_bridge(reader, tx, encoding))
        .expect("failed to spawn http-stream thread");

    let ext = if encoding.is_some() { "wav" } else { "cf32" };
    let content_type = if encoding.is_some() {
        "audio/wav"
    } else {
        "audio/cf32"
    };
    let filename = format!(
        "{:.0}_{:.0}_{}.{ext}",
        snapshot.frequency,
        snapshot.sample_rate,
        Utc::now().format("%Y%m%d%H%M%S")
    );

    let header_chunk = encoding.map(|encoding| {
        let params = ContainerParams {
            encoding,
            rf64: false,
            sample_rate: snapshot.sample_rate as u32,
            center_freq: snapshot.frequency as u32,
        };
        Bytes::from(wav::header(&params, None, Utc::now(), None))
    });

    let body = ReceiverStream::new(rx).map(Ok::<Bytes, Error>);
    let mut response = HttpResponse::Ok();
    response
        .insert_header((header::CONTENT_TYPE, content_type))
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{filename}\""),
        ));
    match header_chunk {
        Some(chunk) => response.streaming(once(async move { Ok::<Bytes, Error>(chunk) }).chain(body)),
        None => response.streaming(body),
    }
}

async fn get_float(state: web::Data<AppState>) -> HttpResponse {
    sample_stream(&state, Some(SampleEncoding::F32))
}

async fn get_pcm(state: web::Data<AppState>) -> HttpResponse {
    sample_stream(&state, Some(SampleEncoding::S16))
}

async fn get_cf32(state: web::Data<AppState>) -> HttpResponse {
    sample_stream(&state, None)
}

// --- wiring ----------------------------------------------------------------

/// HEAD is a liveness probe: 200 OK on any path, known or not.
async fn head_ok() -> HttpResponse {
    ok()
}

async fn default_handler(req: HttpRequest) -> HttpResponse {
    if req.method() == Method::HEAD {
        return ok();
    }
    not_found()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/quit")
            .route(web::head().to(head_ok))
            .route(web::put().to(put_quit))
            .route(web::post().to(put_quit)),
    )
    .service(
        web::resource("/rate")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_rate))
            .route(web::put().to(put_rate))
            .route(web::post().to(put_rate)),
    )
    .service(
        web::resource("/frequency")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_frequency))
            .route(web::put().to(put_frequency))
            .route(web::post().to(put_frequency)),
    )
    .service(
        web::resource("/gain")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_gain))
            .route(web::put().to(put_gain))
            .route(web::post().to(put_gain)),
    )
    .service(
        web::resource("/agc")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_agc))
            .route(web::put().to(put_agc))
            .route(web::post().to(put_agc)),
    )
    .service(
        web::resource("/pause")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_pause))
            .route(web::put().to(put_pause))
            .route(web::post().to(put_pause)),
    )
    .service(
        web::resource("/setting")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_settings)),
    )
    .service(
        web::resource("/setting/{name}")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_setting))
            .route(web::put().to(put_setting))
            .route(web::post().to(put_setting)),
    )
    .service(
        web::resource("/bins")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_bins)),
    )
    .service(
        web::resource("/rbw")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_rbw)),
    )
    .service(
        web::resource("/integration")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_integration)),
    )
    .service(
        web::resource("/average")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_average)),
    )
    .service(
        web::resource("/peak")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_peak)),
    )
    .service(
        web::resource("/power")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_power)),
    )
    .service(
        web::resource("/float")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_float)),
    )
    .service(
        web::resource("/f32")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_float)),
    )
    .service(
        web::resource("/pcm")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_pcm)),
    )
    .service(
        web::resource("/s16")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_pcm)),
    )
    .service(
        web::resource("/cf32")
            .route(web::head().to(head_ok))
            .route(web::get().to(get_cf32)),
    )
    .default_service(web::route().to(default_handler));
}

/// Build the control-plane server; signals are handled by main, not actix.
pub fn build_server(addr: (String, u16), state: web::Data<AppState>) -> std::io::Result<Server> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(configure)
    })
    .shutdown_timeout(1)
    .disable_signals()
    .bind(addr)?
    .run();
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;

    /// A fake engine: applies commands to a shadow snapshot the way the real
    /// capture thread would.
    fn spawn_fake_engine(
        mut cmd_rx: mpsc::UnboundedReceiver<EngineRequest>,
        snapshot_tx: watch::Sender<RadioSnapshot>,
    ) {
        std::thread::spawn(move || {
            while let Some(req) = cmd_rx.blocking_recv() {
                let mut snap = snapshot_tx.borrow().clone();
                let result = match req.cmd {
                    EngineCommand::SetFrequency(hz) => {
                        snap.frequency = hz;
                        Ok(EngineReply::Done)
                    }
                    EngineCommand::SetRate(rate) => {
                        if snap.paused {
                            snap.sample_rate = rate;
                            Ok(EngineReply::Done)
                        } else {
                            Err(EngineError::RecordingOpen)
                        }
                    }
                    EngineCommand::SetPause(p) => {
                        snap.paused = p;
                        Ok(EngineReply::Done)
                    }
                    EngineCommand::SetAgc(a) => {
                        snap.agc = a;
                        Ok(EngineReply::Done)
                    }
                    EngineCommand::SetGain(g) => {
                        snap.gain = g;
                        Ok(EngineReply::Done)
                    }
                    EngineCommand::GetSetting(Some(ref key)) if key == "iq_swap" => {
                        Ok(EngineReply::Value("false".to_string()))
                    }
                    EngineCommand::GetSetting(Some(key)) => {
                        Err(EngineError::UnknownSetting(key))
                    }
                    EngineCommand::GetSetting(None) => {
                        Ok(EngineReply::Value("iq_swap: false\n".to_string()))
                    }
                    EngineCommand::SetSetting(..) => Ok(EngineReply::Done),
                    EngineCommand::Quit => Ok(EngineReply::Done),
                };
                let _ = snapshot_tx.send(snap);
                let _ = req.respond_to.send(result);
            }
        });
    }

    fn test_state(paused: bool) -> web::Data<AppState> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(RadioSnapshot {
            sample_rate: 1_000_000.0,
            frequency: 100_100_000.0,
            gain: 42.0,
            agc: false,
            paused,
            overflow_total: 0,
        });
        spawn_fake_engine(cmd_rx, snapshot_tx);
        let (_producer, ring) = IqRing::with_capacity(1 << 16, 256);
        let (peak_tx, _) = broadcast::channel(8);
        let (power_tx, _) = broadcast::channel(8);
        web::Data::new(AppState {
            cmd_tx,
            snapshot_rx,
            ring,
            peak_tx,
            power_tx,
            plan: PowerPlan::derive(1e6, 64, None, 1.0, None),
        })
    }

    async fn body_text(resp: actix_web::dev::ServiceResponse) -> String {
        String::from_utf8(test::read_body(resp).await.to_vec()).unwrap()
    }

    #[actix_web::test]
    async fn scalar_gets_report_snapshot() {
        let app =
            test::init_service(App::new().app_data(test_state(true)).configure(configure)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri("/rate").to_request()).await;
        assert!(resp.status().is_success());
        assert_eq!(body_text(resp).await, "1000000\n");
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/agc").to_request()).await;
        assert_eq!(body_text(resp).await, "no\n");
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/pause").to_request()).await;
        assert_eq!(body_text(resp).await, "yes\n");
    }

    #[actix_web::test]
    async fn rate_rejected_while_recording() {
        let app =
            test::init_service(App::new().app_data(test_state(false)).configure(configure)).await;
        let resp = test::call_service(
            &app,
            test::TestRequest::put().uri("/rate").set_payload("2e6").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 400);
        let body = body_text(resp).await;
        assert!(body.contains("paused"), "body: {body}");
    }

    #[actix_web::test]
    async fn rate_accepted_while_paused() {
        let app =
            test::init_service(App::new().app_data(test_state(true)).configure(configure)).await;
        let resp = test::call_service(
            &app,
            test::TestRequest::put().uri("/rate").set_payload("2e6").to_request(),
        )
        .await;
        assert!(resp.status().is_success());
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/rate").to_request()).await;
        assert_eq!(body_text(resp).await, "2000000\n");
    }

    #[actix_web::test]
    async fn malformed_bodies_are_400() {
        let app =
            test::init_service(App::new().app_data(test_state(true)).configure(configure)).await;
        for (uri, payload) in [("/agc", "maybe"), ("/pause", "2"), ("/frequency", "fast")] {
            let resp = test::call_service(
                &app,
                test::TestRequest::put().uri(uri).set_payload(payload).to_request(),
            )
            .await;
            assert_eq!(resp.status(), 400, "{uri} {payload}");
        }
    }

    #[actix_web::test]
    async fn unknown_path_is_404_and_wrong_method_405() {
        let app =
            test::init_service(App::new().app_data(test_state(true)).configure(configure)).await;
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/nope").to_request()).await;
        assert_eq!(resp.status(), 404);
        let resp = test::call_service(
            &app,
            test::TestRequest::delete().uri("/rate").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 405);
    }

    #[actix_web::test]
    async fn head_replies_ok_on_any_path() {
        let app =
            test::init_service(App::new().app_data(test_state(true)).configure(configure)).await;
        for uri in ["/rate", "/quit", "/peak", "/no-such-path"] {
            let resp = test::call_service(
                &app,
                test::TestRequest::with_uri(uri)
                    .method(Method::HEAD)
                    .to_request(),
            )
            .await;
            assert_eq!(resp.status(), 200, "HEAD {uri}");
        }
    }

    #[actix_web::test]
    async fn setting_roundtrip_and_unknown_key() {
        let app =
            test::init_service(App::new().app_data(test_state(true)).configure(configure)).await;
        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/setting/iq_swap").to_request(),
        )
        .await;
        assert_eq!(body_text(resp).await, "false\n");
        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/setting/bogus").to_request(),
        )
        .await;
        assert_eq!(resp.status(), 404);
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/setting").to_request()).await;
        assert_eq!(body_text(resp).await, "iq_swap: false\n");
    }

    #[actix_web::test]
    async fn power_plan_introspection() {
        let app =
            test::init_service(App::new().app_data(test_state(true)).configure(configure)).await;
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/bins").to_request()).await;
        assert_eq!(body_text(resp).await, "64\n");
    }

    /// The producer in `test_state` is dropped immediately, so the ring is
    /// already closed: the response body is exactly the streaming header.
    #[actix_web::test]
    async fn float_stream_starts_with_streaming_wav_header() {
        let app =
            test::init_service(App::new().app_data(test_state(false)).configure(configure)).await;
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/float").to_request()).await;
        assert!(resp.status().is_success());
        let disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("100100000_1000000_"));
        assert!(disposition.ends_with(".wav\""));
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "audio/wav"
        );

        let body = test::read_body(resp).await;
        assert_eq!(body.len(), wav::header_len(false));
        assert_eq!(&body[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(body[4..8].try_into().unwrap()), u32::MAX);
    }

    #[actix_web::test]
    async fn cf32_stream_has_no_header() {
        let app =
            test::init_service(App::new().app_data(test_state(false)).configure(configure)).await;
        let resp =
            test::call_service(&app, test::TestRequest::get().uri("/cf32").to_request()).await;
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "audio/cf32"
        );
        let body = test::read_body(resp).await;
        assert!(body.is_empty());
    }
}
