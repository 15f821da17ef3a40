//! HTTP surface for the dashboard.
//!
//! A small blocking HTTP/1.1 server: one accept thread, one thread per
//! connection. Every response is JSON except `/video_feed`, which streams
//! the latest annotated frame as `multipart/x-mixed-replace`.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::alarm::AlarmHandle;
use crate::capture::CaptureSource;
use crate::frame::FrameReader;
use crate::status::{LocationUpdate, StatusStore};
use crate::zone::ZoneSpec;

pub const DEFAULT_API_ADDR: &str = "0.0.0.0:5000";

const MAX_REQUEST_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 64 * 1024;
const STREAM_INTERVAL: Duration = Duration::from_millis(33);
const STREAM_POLL: Duration = Duration::from_millis(100);

const ROUTES: &[(&str, &[&str])] = &[
    ("/health", &["GET"]),
    ("/api/status", &["GET"]),
    ("/api/sensitivity", &["POST"]),
    ("/api/zones", &["GET", "POST"]),
    ("/api/location", &["GET", "POST"]),
    ("/api/camera", &["POST"]),
    ("/api/trigger_test", &["POST"]),
    ("/api/silence", &["POST"]),
    ("/video_feed", &["GET"]),
];

/// Everything a handler can reach.
#[derive(Clone)]
pub struct ApiContext {
    pub status: StatusStore,
    pub alarm: AlarmHandle,
    pub capture: Arc<CaptureSource>,
    pub frames: FrameReader,
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_API_ADDR.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stops accepting; open streams end at their next frame.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    ctx: ApiContext,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, ctx: ApiContext) -> Self {
        Self { cfg, ctx }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid api address '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("failed to bind api on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let ctx = self.ctx;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, ctx, shutdown_thread) {
                log::error!("api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, ctx: ApiContext, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx, &shutdown) {
                        log::debug!("api request from {} failed: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ApiContext, shutdown: &AtomicBool) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_error(&mut stream, 400, &err.to_string())?;
            return Err(err);
        }
    };
    log::debug!("{} {}", request.method, request.path);

    if request.method == "GET" && request.path == "/video_feed" {
        return stream_frames(stream, &ctx.frames, shutdown);
    }
    let (status, body) = route(ctx, &request.method, &request.path, &request.body);
    let payload = serde_json::to_vec(&body)?;
    write_response(&mut stream, status, "application/json", &payload)
}

/// Resolves one non-streaming request to a status code and JSON body.
pub fn route(ctx: &ApiContext, method: &str, path: &str, body: &[u8]) -> (u16, Value) {
    let allowed = match ROUTES.iter().find(|(p, _)| *p == path) {
        Some((_, methods)) => *methods,
        None => return error(404, "not found"),
    };
    if !allowed.contains(&method) {
        return error(405, "method not allowed");
    }

    match (method, path) {
        ("GET", "/health") => (200, json!({"status": "ok"})),
        ("GET", "/api/status") => (200, json!(ctx.status.snapshot())),
        ("POST", "/api/sensitivity") => set_sensitivity(ctx, body),
        ("GET", "/api/zones") => (200, json!(*ctx.status.zones())),
        ("POST", "/api/zones") => add_zone(ctx, body),
        ("GET", "/api/location") => (200, json!(ctx.status.location())),
        ("POST", "/api/location") => update_location(ctx, body),
        ("POST", "/api/camera") => set_camera(ctx, body),
        ("POST", "/api/trigger_test") => match ctx.alarm.test_pulse() {
            Ok(()) => (200, json!({"status": "triggered"})),
            Err(err) => error(500, &err.to_string()),
        },
        ("POST", "/api/silence") => match ctx.alarm.silence() {
            Ok(()) => (200, json!({"status": "silenced"})),
            Err(err) => error(500, &err.to_string()),
        },
        _ => error(405, "method not allowed"),
    }
}

fn set_sensitivity(ctx: &ApiContext, body: &[u8]) -> (u16, Value) {
    let data = match parse_json(body) {
        Ok(data) => data,
        Err(reply) => return reply,
    };
    let value = match data.get("value") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
        None => return error(400, "No value provided"),
    };
    match value.filter(|v| v.is_finite()) {
        Some(value) => {
            let stored = ctx.status.set_sensitivity(value);
            log::info!("sensitivity set to {}", stored);
            (200, json!({"status": "updated", "sensitivity": stored}))
        }
        None => error(400, "value must be a number"),
    }
}

fn add_zone(ctx: &ApiContext, body: &[u8]) -> (u16, Value) {
    let data = match parse_json(body) {
        Ok(data) => data,
        Err(reply) => return reply,
    };
    let spec: ZoneSpec = match serde_json::from_value(data) {
        Ok(spec) => spec,
        Err(err) => return error(400, &format!("invalid zone: {}", err)),
    };
    match ctx.status.add_zone(spec) {
        Ok(zones) => {
            log::info!("zone added ({} total)", zones.len());
            (200, json!({"status": "added", "zones": zones}))
        }
        Err(err) => error(400, &err.to_string()),
    }
}

fn update_location(ctx: &ApiContext, body: &[u8]) -> (u16, Value) {
    let data = match parse_json(body) {
        Ok(data) => data,
        Err(reply) => return reply,
    };
    let update: LocationUpdate = match serde_json::from_value(data) {
        Ok(update) => update,
        Err(err) => return error(400, &format!("invalid location: {}", err)),
    };
    let location = ctx.status.update_location(update);
    (200, json!({"status": "updated", "location": location}))
}

fn set_camera(ctx: &ApiContext, body: &[u8]) -> (u16, Value) {
    let data = match parse_json(body) {
        Ok(data) => data,
        Err(reply) => return reply,
    };
    let url = match data.get("url").and_then(Value::as_str).map(str::trim) {
        Some(url) if !url.is_empty() => url,
        _ => return error(400, "No URL provided"),
    };
    let url = if url.eq_ignore_ascii_case("local") {
        "0".to_string()
    } else {
        url.to_string()
    };

    ctx.status.set_camera_source(&url);
    // The swap thread reports the source it actually opened, so a slower
    // earlier request can't leave status pointing at the wrong camera.
    let status = ctx.status.clone();
    ctx.capture.update_source_in_background(&url, move |spec| {
        status.set_camera_source(&spec.to_string())
    });
    (200, json!({"status": "updated", "camera_url": url}))
}

fn parse_json(body: &[u8]) -> std::result::Result<Value, (u16, Value)> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(error(400, "empty request body"));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(error(400, "request body must be a JSON object")),
        Err(err) => Err(error(400, &format!("invalid JSON: {}", err))),
    }
}

fn error(status: u16, message: &str) -> (u16, Value) {
    (status, json!({"status": "error", "message": message}))
}

/// Streams frames until the client goes away or the server stops. Waits for
/// the first frame instead of failing.
fn stream_frames(mut stream: TcpStream, frames: &FrameReader, shutdown: &AtomicBool) -> Result<()> {
    let header = "HTTP/1.1 200 OK\r\n\
                  Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
                  Cache-Control: no-store\r\n\
                  Connection: close\r\n\r\n";
    stream.write_all(header.as_bytes())?;
    let mut last_sequence = 0;
    while !shutdown.load(Ordering::SeqCst) {
        let frame = match frames.latest() {
            Some(frame) => frame,
            None => {
                std::thread::sleep(STREAM_POLL);
                continue;
            }
        };
        if frame.sequence != last_sequence {
            stream.write_all(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n")?;
            stream.write_all(&frame.jpeg)?;
            stream.write_all(b"\r\n\r\n")?;
            stream.flush()?;
            last_sequence = frame.sequence;
        }
        std::thread::sleep(STREAM_INTERVAL);
    }
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES + MAX_BODY_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.len() > MAX_REQUEST_BYTES && !data.windows(4).any(|w| w == b"\r\n\r\n") {
            return Err(anyhow!("request headers too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data.split_off(header_end + 4);
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_error(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    let (_, body) = error(status, message);
    write_response(stream, status, "application/json", &serde_json::to_vec(&body)?)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SystemDevices;
    use crate::frame::frame_buffer;

    fn context() -> (ApiContext, crate::alarm::AlarmInbox) {
        let (alarm, inbox) = AlarmHandle::channel();
        let (_writer, frames) = frame_buffer();
        let ctx = ApiContext {
            status: StatusStore::default(),
            alarm,
            capture: Arc::new(CaptureSource::new(
                Box::new(SystemDevices::default()),
                "stub://api",
            )),
            frames,
        };
        (ctx, inbox)
    }

    #[test]
    fn unknown_paths_and_methods() {
        let (ctx, _inbox) = context();
        assert_eq!(route(&ctx, "GET", "/nope", b"").0, 404);
        assert_eq!(route(&ctx, "GET", "/api/silence", b"").0, 405);
        assert_eq!(route(&ctx, "DELETE", "/api/zones", b"").0, 405);
        assert_eq!(route(&ctx, "GET", "/health", b""), (200, json!({"status": "ok"})));
    }

    #[test]
    fn sensitivity_accepts_strings_and_clamps() {
        let (ctx, _inbox) = context();
        let (code, body) = route(&ctx, "POST", "/api/sensitivity", br#"{"value":"72"}"#);
        assert_eq!(code, 200);
        assert_eq!(body["sensitivity"], 72.0);
        let (_, body) = route(&ctx, "POST", "/api/sensitivity", br#"{"value":250}"#);
        assert_eq!(body["sensitivity"], 100.0);
        assert_eq!(route(&ctx, "POST", "/api/sensitivity", br#"{"value":"x"}"#).0, 400);
        assert_eq!(route(&ctx, "POST", "/api/sensitivity", br#"{}"#).0, 400);
        assert_eq!(route(&ctx, "POST", "/api/sensitivity", b"{oops").0, 400);
        assert_eq!(ctx.status.sensitivity(), 100.0);
    }

    #[test]
    fn camera_requires_url_and_maps_local() {
        let (ctx, _inbox) = context();
        let (code, body) = route(&ctx, "POST", "/api/camera", br#"{"url":""}"#);
        assert_eq!(code, 400);
        assert_eq!(body["message"], "No URL provided");
        let (code, body) = route(&ctx, "POST", "/api/camera", br#"{"url":"LOCAL"}"#);
        assert_eq!(code, 200);
        assert_eq!(body["camera_url"], "0");
        assert_eq!(ctx.status.camera_source(), "0");
    }

    #[test]
    fn back_to_back_camera_swaps_settle_on_the_last() {
        let (ctx, _inbox) = context();
        assert_eq!(route(&ctx, "POST", "/api/camera", br#"{"url":"stub://a"}"#).0, 200);
        assert_eq!(route(&ctx, "POST", "/api/camera", br#"{"url":"stub://b"}"#).0, 200);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while ctx.capture.source().to_string() != "stub://b" {
            assert!(std::time::Instant::now() < deadline, "swap never applied");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        // a superseded swap may still be finishing; it must not win
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(ctx.capture.source().to_string(), "stub://b");
        assert_eq!(ctx.status.camera_source(), "stub://b");
    }

    #[test]
    fn zones_reject_degenerate_polygons() {
        let (ctx, _inbox) = context();
        let bad = br#"{"type":"poly","points":[{"x":1,"y":1},{"x":2,"y":2}]}"#;
        assert_eq!(route(&ctx, "POST", "/api/zones", bad).0, 400);
        let good = br#"{"type":"rect","x":10,"y":10,"w":-5,"h":20}"#;
        let (code, body) = route(&ctx, "POST", "/api/zones", good);
        assert_eq!(code, 200);
        assert_eq!(body["status"], "added");
        assert_eq!(body["zones"][0]["kind"], "rect");
        assert_eq!(body["zones"][0]["x"], 5.0);
    }

    #[test]
    fn alarm_commands_are_queued() {
        let (ctx, inbox) = context();
        assert_eq!(
            route(&ctx, "POST", "/api/trigger_test", b""),
            (200, json!({"status": "triggered"}))
        );
        assert_eq!(
            route(&ctx, "POST", "/api/silence", b""),
            (200, json!({"status": "silenced"}))
        );
        drop(inbox);
        assert_eq!(route(&ctx, "POST", "/api/silence", b"").0, 500);
    }
}
