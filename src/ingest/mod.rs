//! Stream resolution and frame ingestion.
//!
//! - `resolve`: turns a site's stream description into one playable URL
//! - `capture`: opens that URL and pulls exactly one decoded frame
//! - `ffmpeg`: video decoding for HLS, RTSP and files (feature: capture-ffmpeg)
//!
//! Both steps are blocking and hold no state between requests. Stream handles
//! are opened right before the frame read and dropped right after it.

pub mod capture;
#[cfg(any(test, feature = "capture-ffmpeg"))]
mod decode;
#[cfg(feature = "capture-ffmpeg")]
mod ffmpeg;
#[cfg(test)]
pub(crate) mod http_fixture;
pub mod resolve;

pub use capture::{
    classify, CaptureBackend, FrameCapture, FrameStream, StreamOpener, SyntheticSpec, UrlOpener,
};
pub use resolve::{candidate_url, HttpProbe, StreamProbe, StreamResolver, StreamSource};
