//! Failure taxonomy for a single measurement request.
//!
//! Every stage of the pipeline either hands its output to the next stage or
//! stops the request with a [`PipelineError`]. Nothing is retried inside one
//! request; the caller issues a new request instead.

use serde::Serialize;

/// Why a measurement request stopped.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Candidate search exhausted, or the extractor produced no URL.
    NoStreamFound,
    /// The resolved URL could not be opened for decoding.
    StreamOpenError,
    /// The stream opened but yielded no decodable frame.
    FrameReadError,
    /// Segmentation found no marker region inside the region of interest.
    UndetectedMarker,
    /// Encoding or persistence failed after a frame was processed.
    Internal,
}

impl FailureKind {
    pub fn code(self) -> &'static str {
        match self {
            FailureKind::NoStreamFound => "NO_STREAM_FOUND",
            FailureKind::StreamOpenError => "STREAM_OPEN_ERROR",
            FailureKind::FrameReadError => "FRAME_READ_ERROR",
            FailureKind::UndetectedMarker => "UNDETECTED_MARKER",
            FailureKind::Internal => "INTERNAL",
        }
    }

    /// Status code the HTTP layer answers with.
    pub fn http_status(self) -> u16 {
        match self {
            FailureKind::NoStreamFound => 404,
            _ => 500,
        }
    }
}

/// Pipeline stage a request was in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Stage {
    ResolvingStream,
    CapturingFrame,
    LocatingMarker,
    MappingLevel,
    Done,
}

#[derive(Clone, Debug)]
pub struct PipelineError {
    pub kind: FailureKind,
    pub stage: Option<Stage>,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage: None,
            message: message.into(),
        }
    }

    pub fn at(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn no_stream(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NoStreamFound, message)
    }

    pub fn stream_open(message: impl Into<String>) -> Self {
        Self::new(FailureKind::StreamOpenError, message)
    }

    pub fn frame_read(message: impl Into<String>) -> Self {
        Self::new(FailureKind::FrameReadError, message)
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self::new(FailureKind::Internal, format!("{:#}", err))
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for PipelineError {}
