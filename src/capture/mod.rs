//! Hot-swappable capture source.
//!
//! [`CaptureSource`] owns at most one open device handle and always hands out
//! a JPEG: a real frame when the device reads, a synthesized "no signal"
//! placeholder otherwise. Reads and source swaps share one lock, so a swap
//! never races a read on a half-released device.
//!
//! Devices are opened through [`CaptureDevices`]. The built-in
//! [`SystemDevices`] understands:
//! - `stub://<name>`: synthetic moving test scene
//! - a device index `n`: `/dev/video<n>` (feature: ingest-v4l2)
//! - `http(s)://...`: MJPEG stream or JPEG snapshot (feature: ingest-http)

#[cfg(feature = "ingest-http")]
pub mod http;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod placeholder;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use std::fmt;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

pub use placeholder::{placeholder_frame, FALLBACK_JPEG};
pub use synthetic::SyntheticScene;

pub const JPEG_QUALITY: u8 = 80;

/// Normalized capture source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Local device index.
    Device(u32),
    /// URL or other locator, kept as given (trimmed).
    Location(String),
}

impl SourceSpec {
    /// Trims the input. Empty input and `LOCAL` (any case) select device 0,
    /// all-digit input selects that device index, anything else is kept.
    pub fn normalize(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("local") {
            return Self::Device(0);
        }
        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = trimmed.parse::<u32>() {
                return Self::Device(index);
            }
        }
        Self::Location(trimmed.to_string())
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(index) => write!(f, "{}", index),
            Self::Location(location) => write!(f, "{}", location),
        }
    }
}

/// An open capture device.
pub trait CaptureHandle: Send {
    /// Read the next frame.
    fn read(&mut self) -> Result<RgbImage>;
}

/// Opens capture devices.
pub trait CaptureDevices: Send + Sync {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn CaptureHandle>>;
}

/// Device opener backed by the host: synthetic scenes, V4L2 and HTTP cameras.
#[derive(Clone, Debug)]
pub struct SystemDevices {
    pub width: u32,
    pub height: u32,
}

impl Default for SystemDevices {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

impl CaptureDevices for SystemDevices {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn CaptureHandle>> {
        match spec {
            SourceSpec::Location(loc) if loc.starts_with("stub://") => {
                Ok(Box::new(SyntheticScene::new(loc, self.width, self.height)))
            }
            SourceSpec::Device(index) => self.open_device(*index),
            SourceSpec::Location(loc)
                if loc.starts_with("http://") || loc.starts_with("https://") =>
            {
                self.open_http(loc)
            }
            SourceSpec::Location(loc) => Err(anyhow!("unsupported capture source '{}'", loc)),
        }
    }
}

impl SystemDevices {
    #[cfg(feature = "ingest-v4l2")]
    fn open_device(&self, index: u32) -> Result<Box<dyn CaptureHandle>> {
        let camera = v4l2::V4l2Camera::open(index, self.width, self.height)?;
        Ok(Box::new(camera))
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    fn open_device(&self, index: u32) -> Result<Box<dyn CaptureHandle>> {
        Err(anyhow!(
            "device {} requires the ingest-v4l2 feature",
            index
        ))
    }

    #[cfg(feature = "ingest-http")]
    fn open_http(&self, url: &str) -> Result<Box<dyn CaptureHandle>> {
        Ok(Box::new(http::HttpCamera::connect(url)?))
    }

    #[cfg(not(feature = "ingest-http"))]
    fn open_http(&self, url: &str) -> Result<Box<dyn CaptureHandle>> {
        Err(anyhow!("{} requires the ingest-http feature", url))
    }
}

struct CaptureState {
    spec: SourceSpec,
    handle: Option<Box<dyn CaptureHandle>>,
    /// Ticket of the last swap applied.
    applied: u64,
}

/// The process-wide capture source.
pub struct CaptureSource {
    devices: Box<dyn CaptureDevices>,
    state: Mutex<CaptureState>,
    /// Last swap ticket handed out.
    requests: AtomicU64,
}

impl CaptureSource {
    /// Opens `initial`. A failed open is logged and leaves the source offline.
    pub fn new(devices: Box<dyn CaptureDevices>, initial: &str) -> Self {
        let spec = SourceSpec::normalize(initial);
        let handle = open_logged(devices.as_ref(), &spec);
        Self {
            devices,
            state: Mutex::new(CaptureState {
                spec,
                handle,
                applied: 0,
            }),
            requests: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current frame as JPEG. Never fails: an offline device, a failed read
    /// or a failed encode yields the placeholder frame.
    pub fn get_frame(&self) -> Vec<u8> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if let Some(handle) = state.handle.as_mut() {
            match handle.read().and_then(|frame| encode_jpeg(&frame, JPEG_QUALITY)) {
                Ok(jpeg) => return jpeg,
                Err(err) => log::debug!("capture read from {} failed: {:#}", state.spec, err),
            }
        }
        drop(guard);
        placeholder_jpeg()
    }

    /// Switches to a new source. The current handle is released before the
    /// new one is opened; a failed open leaves the source offline.
    pub fn update_source(&self, raw: &str) {
        let ticket = self.next_ticket();
        self.apply_swap(ticket, raw, |_| {});
    }

    /// Switches source on a background thread. Swaps take effect in the
    /// order they were requested: one overtaken by a later request is
    /// dropped. `on_applied` runs with the new source while the capture lock
    /// is still held.
    pub fn update_source_in_background<F>(
        self: &Arc<Self>,
        raw: &str,
        on_applied: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(&SourceSpec) + Send + 'static,
    {
        let ticket = self.next_ticket();
        let source = Arc::clone(self);
        let raw = raw.to_string();
        std::thread::spawn(move || source.apply_swap(ticket, &raw, on_applied))
    }

    fn next_ticket(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn apply_swap(&self, ticket: u64, raw: &str, on_applied: impl FnOnce(&SourceSpec)) {
        let spec = SourceSpec::normalize(raw);
        let mut state = self.lock();
        if ticket < state.applied {
            log::debug!("camera swap to {} superseded by a later request", spec);
            return;
        }
        log::info!("updating camera source to: {}", spec);
        state.handle = None;
        let handle = open_logged(self.devices.as_ref(), &spec);
        state.spec = spec;
        state.handle = handle;
        state.applied = ticket;
        on_applied(&state.spec);
    }

    pub fn source(&self) -> SourceSpec {
        self.lock().spec.clone()
    }

    pub fn is_online(&self) -> bool {
        self.lock().handle.is_some()
    }
}

fn open_logged(devices: &dyn CaptureDevices, spec: &SourceSpec) -> Option<Box<dyn CaptureHandle>> {
    match devices.open(spec) {
        Ok(handle) => {
            log::info!("opened video source {}", spec);
            Some(handle)
        }
        Err(err) => {
            log::warn!("could not open video source {}: {:#}", spec, err);
            None
        }
    }
}

fn placeholder_jpeg() -> Vec<u8> {
    let frame = placeholder_frame(crate::unix_now());
    encode_jpeg(&frame, JPEG_QUALITY).unwrap_or_else(|err| {
        log::error!("placeholder encode failed: {:#}", err);
        FALLBACK_JPEG.to_vec()
    })
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 * 1024);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(frame)
        .context("encode jpeg")?;
    Ok(out)
}

pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load(Cursor::new(bytes), ImageFormat::Jpeg).context("decode jpeg")?;
    Ok(image.into_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Solid;

    impl CaptureHandle for Solid {
        fn read(&mut self) -> Result<RgbImage> {
            Ok(RgbImage::from_pixel(8, 8, image::Rgb([200, 10, 10])))
        }
    }

    #[derive(Default)]
    struct Recording {
        opened: Mutex<Vec<SourceSpec>>,
        live: Arc<AtomicUsize>,
    }

    struct Tracked(Arc<AtomicUsize>);

    impl CaptureHandle for Tracked {
        fn read(&mut self) -> Result<RgbImage> {
            Solid.read()
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl CaptureDevices for Arc<Recording> {
        fn open(&self, spec: &SourceSpec) -> Result<Box<dyn CaptureHandle>> {
            self.opened.lock().unwrap().push(spec.clone());
            if let SourceSpec::Location(loc) = spec {
                return Err(anyhow!("no such device {}", loc));
            }
            // Two open handles at once would mean the old one leaked.
            assert_eq!(self.live.fetch_add(1, Ordering::SeqCst), 0);
            Ok(Box::new(Tracked(Arc::clone(&self.live))))
        }
    }

    #[test]
    fn normalize_inputs() {
        assert_eq!(SourceSpec::normalize("  "), SourceSpec::Device(0));
        assert_eq!(SourceSpec::normalize("7"), SourceSpec::Device(7));
        assert_eq!(SourceSpec::normalize(" local "), SourceSpec::Device(0));
        assert_eq!(
            SourceSpec::normalize(" rtsp://cam/1 "),
            SourceSpec::Location("rtsp://cam/1".to_string())
        );
        assert_eq!(SourceSpec::normalize("-1").to_string(), "-1");
    }

    #[test]
    fn swap_releases_before_open() {
        let devices = Arc::new(Recording::default());
        let source = CaptureSource::new(Box::new(Arc::clone(&devices)), "0");
        assert!(source.is_online());

        source.update_source("7");
        assert!(source.is_online());
        assert_eq!(source.source(), SourceSpec::Device(7));

        source.update_source("nowhere");
        assert!(!source.is_online());
        assert_eq!(devices.live.load(Ordering::SeqCst), 0);

        let opened = devices.opened.lock().unwrap().clone();
        assert_eq!(
            opened,
            vec![
                SourceSpec::Device(0),
                SourceSpec::Device(7),
                SourceSpec::Location("nowhere".to_string())
            ]
        );
    }

    #[test]
    fn background_swaps_apply_in_request_order() {
        let source = Arc::new(CaptureSource::new(
            Box::new(SystemDevices::default()),
            "stub://start",
        ));
        let reported = Arc::new(Mutex::new(Vec::new()));
        let swaps: Vec<_> = ["stub://a", "stub://b", "stub://c"]
            .iter()
            .map(|raw| {
                let reported = Arc::clone(&reported);
                source.update_source_in_background(raw, move |spec| {
                    reported.lock().unwrap().push(spec.to_string())
                })
            })
            .collect();
        for swap in swaps {
            swap.join().unwrap();
        }
        assert_eq!(source.source(), SourceSpec::Location("stub://c".to_string()));
        let reported = reported.lock().unwrap();
        assert_eq!(reported.last().map(String::as_str), Some("stub://c"));
        // whatever ran, it ran in ticket order
        let mut sorted = reported.clone();
        sorted.sort();
        assert_eq!(*reported, sorted);
    }

    #[test]
    fn reads_during_swaps_always_decode() {
        let source = Arc::new(CaptureSource::new(
            Box::new(SystemDevices::default()),
            "stub://a",
        ));
        let swapper = {
            let source = Arc::clone(&source);
            std::thread::spawn(move || {
                for i in 0..30 {
                    let target = match i % 3 {
                        0 => "stub://b",
                        1 => "bogus://offline",
                        _ => "stub://a",
                    };
                    source.update_source(target);
                }
            })
        };
        let mut reads = 0;
        while !swapper.is_finished() || reads < 10 {
            let jpeg = source.get_frame();
            assert!(decode_jpeg(&jpeg).is_ok(), "read {} did not decode", reads);
            reads += 1;
        }
        swapper.join().unwrap();
        assert_eq!(source.source(), SourceSpec::Location("stub://a".to_string()));
    }

    #[test]
    fn offline_source_serves_placeholder_jpeg() {
        let source = CaptureSource::new(Box::new(SystemDevices::default()), "bogus://x");
        assert!(!source.is_online());
        let jpeg = source.get_frame();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let frame = decode_jpeg(&jpeg).unwrap();
        assert_eq!(frame.dimensions(), (600, 300));
    }

    #[test]
    fn stub_source_serves_scene() {
        let source = CaptureSource::new(Box::new(SystemDevices::default()), "stub://yard");
        assert!(source.is_online());
        let frame = decode_jpeg(&source.get_frame()).unwrap();
        assert_eq!(frame.dimensions(), (640, 480));
    }

    #[test]
    fn fallback_jpeg_decodes() {
        let frame = decode_jpeg(FALLBACK_JPEG).unwrap();
        assert_eq!(frame.dimensions(), (1, 1));
    }
}
