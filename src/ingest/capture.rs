//! Single-frame capture.
//!
//! Capture opens a stream handle, pulls exactly one decoded frame, and drops the
//! handle before returning, on every path. Open failures and read failures are
//! reported as different kinds so callers can tell a dead URL from a stream that
//! produced nothing decodable.
//!
//! Backends are chosen from the URL:
//! - `stub://` synthetic frames (tests, demos)
//! - local still images (`.jpg`, `.jpeg`, `.png`, optionally `file://`)
//! - `http(s)` still snapshots
//! - anything else goes through FFmpeg (feature: capture-ffmpeg)

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[cfg(feature = "capture-ffmpeg")]
use super::ffmpeg::FfmpegOpener;
use crate::error::PipelineError;
use crate::frame::Frame;

const MAX_SNAPSHOT_BYTES: u64 = 20 * 1024 * 1024;
const STILL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const MAX_SYNTHETIC_SIDE: u32 = 8192;

/// An open stream. Dropping it releases the underlying handle.
pub trait FrameStream {
    /// Decode the next frame. `Ok(None)` means the stream ended first.
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

/// Opens stream handles for URLs.
pub trait StreamOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn FrameStream>>;
}

/// Pulls one frame per call from a resolved URL.
pub struct FrameCapture {
    opener: Box<dyn StreamOpener>,
}

impl FrameCapture {
    pub fn new(opener: Box<dyn StreamOpener>) -> Self {
        Self { opener }
    }

    pub fn capture(&self, url: &str) -> Result<Frame, PipelineError> {
        let mut stream = self.opener.open(url).map_err(|err| {
            PipelineError::stream_open(format!("unable to open stream {}: {:#}", url, err))
        })?;
        let read = stream.read_frame();
        drop(stream);

        match read {
            Ok(Some(frame)) => {
                log::debug!(
                    "captured {}x{} frame from {}",
                    frame.width(),
                    frame.height(),
                    url
                );
                Ok(frame)
            }
            Ok(None) => Err(PipelineError::frame_read(format!(
                "stream {} ended before a frame was decoded",
                url
            ))),
            Err(err) => Err(PipelineError::frame_read(format!(
                "failed to capture frame from {}: {:#}",
                url, err
            ))),
        }
    }
}

impl Default for FrameCapture {
    fn default() -> Self {
        Self::new(Box::new(UrlOpener::default()))
    }
}

/// Backend a URL is routed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureBackend {
    Synthetic,
    StillFile(PathBuf),
    HttpSnapshot,
    Ffmpeg,
}

pub fn classify(url: &str) -> CaptureBackend {
    if url.starts_with("stub://") {
        return CaptureBackend::Synthetic;
    }
    let lower = url.to_ascii_lowercase();
    let has_still_ext = {
        let path = lower.split(['?', '#']).next().unwrap_or(lower.as_str());
        STILL_EXTENSIONS
            .iter()
            .any(|ext| path.ends_with(&format!(".{}", ext)))
    };
    if let Some(path) = url.strip_prefix("file://") {
        if has_still_ext {
            return CaptureBackend::StillFile(PathBuf::from(path));
        }
        return CaptureBackend::Ffmpeg;
    }
    if lower.starts_with("http://") || lower.starts_with("https://") {
        if has_still_ext {
            return CaptureBackend::HttpSnapshot;
        }
        return CaptureBackend::Ffmpeg;
    }
    if !url.contains("://") && has_still_ext {
        return CaptureBackend::StillFile(PathBuf::from(url));
    }
    CaptureBackend::Ffmpeg
}

/// Default opener, routes each URL to its backend.
pub struct UrlOpener {
    agent: ureq::Agent,
}

impl UrlOpener {
    pub fn new(timeout: Option<Duration>) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            agent: builder.build(),
        }
    }
}

impl Default for UrlOpener {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StreamOpener for UrlOpener {
    fn open(&self, url: &str) -> Result<Box<dyn FrameStream>> {
        match classify(url) {
            CaptureBackend::Synthetic => Ok(Box::new(SyntheticStream::open(url)?)),
            CaptureBackend::StillFile(path) => Ok(Box::new(StillFileStream::open(&path)?)),
            CaptureBackend::HttpSnapshot => {
                Ok(Box::new(SnapshotStream::open(&self.agent, url)?))
            }
            CaptureBackend::Ffmpeg => open_ffmpeg(url),
        }
    }
}

#[cfg(feature = "capture-ffmpeg")]
fn open_ffmpeg(url: &str) -> Result<Box<dyn FrameStream>> {
    FfmpegOpener.open(url)
}

#[cfg(not(feature = "capture-ffmpeg"))]
fn open_ffmpeg(url: &str) -> Result<Box<dyn FrameStream>> {
    Err(anyhow!(
        "{} needs a video decoder; build with the capture-ffmpeg feature",
        url
    ))
}

// ----------------------------------------------------------------------------
// Still snapshots (local files and HTTP)
// ----------------------------------------------------------------------------

struct StillFileStream {
    file: Option<std::fs::File>,
}

impl StillFileStream {
    fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("open still image {}", path.display()))?;
        Ok(Self { file: Some(file) })
    }
}

impl FrameStream for StillFileStream {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(mut file) = self.file.take() else {
            return Ok(None);
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).context("read still image")?;
        Frame::decode(&bytes).map(Some)
    }
}

struct SnapshotStream {
    reader: Option<Box<dyn Read + Send + Sync>>,
}

impl SnapshotStream {
    fn open(agent: &ureq::Agent, url: &str) -> Result<Self> {
        let response = agent
            .get(url)
            .call()
            .with_context(|| format!("fetch snapshot from {}", url))?;
        Ok(Self {
            reader: Some(response.into_reader()),
        })
    }
}

impl FrameStream for SnapshotStream {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let Some(reader) = self.reader.take() else {
            return Ok(None);
        };
        let mut bytes = Vec::new();
        reader
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)
            .context("read snapshot body")?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Frame::decode(&bytes).map(Some)
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

/// Parameters of a `stub://` stream.
///
/// `stub://<name>?width=W&height=H&marker=yellow|red|none&x0=..&x1=..&y0=..&y1=..`
/// paints a marker rectangle `[x0, x1) × [y0, y1)` on a neutral grey frame.
/// `frames=0` opens a stream that ends before its first frame and `open=fail`
/// refuses to open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticSpec {
    pub width: u32,
    pub height: u32,
    pub marker: Option<Rgb<u8>>,
    pub marker_rect: (u32, u32, u32, u32),
    pub frames: u32,
    pub fail_open: bool,
}

impl SyntheticSpec {
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).context("parse stub url")?;
        let mut spec = SyntheticSpec {
            width: 640,
            height: 480,
            marker: None,
            marker_rect: (0, 0, 0, 0),
            frames: 1,
            fail_open: false,
        };
        for (key, value) in parsed.query_pairs() {
            let number = || -> Result<u32> {
                value
                    .parse()
                    .map_err(|_| anyhow!("stub parameter {} must be an integer", key))
            };
            match key.as_ref() {
                "width" => spec.width = number()?,
                "height" => spec.height = number()?,
                "x0" => spec.marker_rect.0 = number()?,
                "x1" => spec.marker_rect.1 = number()?,
                "y0" => spec.marker_rect.2 = number()?,
                "y1" => spec.marker_rect.3 = number()?,
                "frames" => spec.frames = number()?,
                "open" => spec.fail_open = value == "fail",
                "marker" => {
                    spec.marker = match value.as_ref() {
                        "yellow" => Some(Rgb([255, 255, 0])),
                        "red" => Some(Rgb([220, 20, 20])),
                        "none" => None,
                        other => return Err(anyhow!("unknown stub marker colour '{}'", other)),
                    }
                }
                other => log::debug!("ignoring stub parameter {}", other),
            }
        }
        if spec.width > MAX_SYNTHETIC_SIDE || spec.height > MAX_SYNTHETIC_SIDE {
            return Err(anyhow!(
                "stub frame {}x{} exceeds {} pixels per side",
                spec.width,
                spec.height,
                MAX_SYNTHETIC_SIDE
            ));
        }
        Ok(spec)
    }

    pub fn render(&self) -> Frame {
        let mut image = RgbImage::from_pixel(self.width, self.height, Rgb([128, 128, 128]));
        if let Some(color) = self.marker {
            let (x0, x1, y0, y1) = self.marker_rect;
            for y in y0..y1.min(self.height) {
                for x in x0..x1.min(self.width) {
                    image.put_pixel(x, y, color);
                }
            }
        }
        Frame::new(image)
    }
}

struct SyntheticStream {
    spec: SyntheticSpec,
    remaining: u32,
}

impl SyntheticStream {
    fn open(url: &str) -> Result<Self> {
        let spec = SyntheticSpec::parse(url)?;
        if spec.fail_open {
            return Err(anyhow!("synthetic stream {} refused to open", url));
        }
        log::info!("opened synthetic stream {}", url);
        Ok(Self {
            remaining: spec.frames,
            spec,
        })
    }
}

impl FrameStream for SyntheticStream {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(self.spec.render()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Copy)]
    enum Script {
        Frame,
        Empty,
        Broken,
    }

    struct CountingOpener {
        script: Script,
        opened: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    struct CountingStream {
        script: Script,
        reads: usize,
        released: Arc<AtomicUsize>,
    }

    impl Drop for CountingStream {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl FrameStream for CountingStream {
        fn read_frame(&mut self) -> Result<Option<Frame>> {
            self.reads += 1;
            assert_eq!(self.reads, 1, "capture must read exactly one frame");
            match self.script {
                Script::Frame => Ok(Some(Frame::new(RgbImage::new(4, 4)))),
                Script::Empty => Ok(None),
                Script::Broken => Err(anyhow!("corrupt packet")),
            }
        }
    }

    impl StreamOpener for CountingOpener {
        fn open(&self, _url: &str) -> Result<Box<dyn FrameStream>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingStream {
                script: self.script,
                reads: 0,
                released: self.released.clone(),
            }))
        }
    }

    fn run(script: Script) -> (Result<Frame, PipelineError>, usize, usize) {
        let opened = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let capture = FrameCapture::new(Box::new(CountingOpener {
            script,
            opened: opened.clone(),
            released: released.clone(),
        }));
        let result = capture.capture("test://stream");
        (
            result,
            opened.load(Ordering::SeqCst),
            released.load(Ordering::SeqCst),
        )
    }

    #[test]
    fn handle_is_released_on_every_path() {
        let (result, opened, released) = run(Script::Frame);
        assert!(result.is_ok());
        assert_eq!((opened, released), (1, 1));

        let (result, opened, released) = run(Script::Empty);
        assert_eq!(result.unwrap_err().kind, FailureKind::FrameReadError);
        assert_eq!((opened, released), (1, 1));

        let (result, opened, released) = run(Script::Broken);
        assert_eq!(result.unwrap_err().kind, FailureKind::FrameReadError);
        assert_eq!((opened, released), (1, 1));
    }

    #[test]
    fn urls_route_to_backends() {
        assert_eq!(classify("stub://cam"), CaptureBackend::Synthetic);
        assert_eq!(
            classify("/tmp/frame.JPG"),
            CaptureBackend::StillFile(PathBuf::from("/tmp/frame.JPG"))
        );
        assert_eq!(
            classify("file:///srv/still.png"),
            CaptureBackend::StillFile(PathBuf::from("/srv/still.png"))
        );
        assert_eq!(
            classify("http://cam.local/snapshot.jpg?ts=1"),
            CaptureBackend::HttpSnapshot
        );
        assert_eq!(
            classify("https://stream.example/live/chunklist_1000.m3u8"),
            CaptureBackend::Ffmpeg
        );
        assert_eq!(classify("rtsp://cam/stream"), CaptureBackend::Ffmpeg);
    }

    #[test]
    fn synthetic_stream_paints_marker() -> Result<()> {
        let frame = FrameCapture::default()
            .capture("stub://river?width=64&height=48&marker=yellow&x0=10&x1=20&y0=5&y1=15")
            .map_err(anyhow::Error::from)?;
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert_eq!(frame.image().get_pixel(10, 5), &Rgb([255, 255, 0]));
        assert_eq!(frame.image().get_pixel(20, 15), &Rgb([128, 128, 128]));
        Ok(())
    }

    #[test]
    fn synthetic_failures_map_to_kinds() {
        let capture = FrameCapture::default();
        let err = capture.capture("stub://river?open=fail").unwrap_err();
        assert_eq!(err.kind, FailureKind::StreamOpenError);
        let err = capture.capture("stub://river?frames=0").unwrap_err();
        assert_eq!(err.kind, FailureKind::FrameReadError);
        let err = capture.capture("stub://river?marker=purple").unwrap_err();
        assert_eq!(err.kind, FailureKind::StreamOpenError);
    }

    #[test]
    fn oversized_synthetic_frames_are_refused() {
        assert!(SyntheticSpec::parse("stub://x?width=100000&height=100000").is_err());
        assert!(SyntheticSpec::parse("stub://x?width=8192&height=10").is_ok());
        let err = FrameCapture::default()
            .capture("stub://x?width=640&height=9000")
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::StreamOpenError);
    }

    #[test]
    fn http_snapshot_is_decoded() -> Result<()> {
        use crate::ingest::http_fixture::serve;

        let mut png = Vec::new();
        RgbImage::from_pixel(6, 4, Rgb([255, 255, 0]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;
        let (addr, server) = serve(vec![(200, png)]);
        let frame = FrameCapture::new(Box::new(UrlOpener::new(Some(Duration::from_secs(5)))))
            .capture(&format!("http://{}/snapshot.png", addr))
            .map_err(anyhow::Error::from)?;
        assert_eq!((frame.width(), frame.height()), (6, 4));
        assert_eq!(frame.image().get_pixel(0, 0), &Rgb([255, 255, 0]));
        server.join().unwrap();
        Ok(())
    }

    #[test]
    fn http_snapshot_failures_map_to_kinds() {
        use crate::ingest::http_fixture::{closed_addr, serve};

        let capture = FrameCapture::new(Box::new(UrlOpener::new(Some(Duration::from_secs(5)))));
        let (addr, server) = serve(vec![(200, Vec::new()), (404, b"gone".to_vec())]);
        let url = format!("http://{}/snapshot.jpg", addr);

        let err = capture.capture(&url).unwrap_err();
        assert_eq!(err.kind, FailureKind::FrameReadError);
        let err = capture.capture(&url).unwrap_err();
        assert_eq!(err.kind, FailureKind::StreamOpenError);
        server.join().unwrap();

        let err = capture
            .capture(&format!("http://{}/snapshot.jpg", closed_addr()))
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::StreamOpenError);
    }

    #[test]
    fn missing_still_file_fails_to_open() {
        let err = FrameCapture::default()
            .capture("/nonexistent/dir/frame.jpg")
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::StreamOpenError);
    }

    #[test]
    fn still_file_is_decoded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("frame.png");
        RgbImage::from_pixel(12, 8, Rgb([10, 200, 30])).save(&path)?;
        let frame = FrameCapture::default()
            .capture(path.to_str().expect("utf-8 path"))
            .map_err(anyhow::Error::from)?;
        assert_eq!((frame.width(), frame.height()), (12, 8));
        Ok(())
    }
}
