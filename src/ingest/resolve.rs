//! Stream URL resolution.
//!
//! A site's stream is described by a [`StreamSource`]. Resolution turns it into
//! one URL that capture can open:
//! - `DirectLive` is returned as-is, liveness is discovered at capture time
//! - `ChunkedCandidates` probes numbered playlist URLs in ascending id order and
//!   stops at the first live one
//! - `PageExtract` asks an extractor tool for the media URL behind a video page

use anyhow::{anyhow, Context, Result};
use std::process::Command;
use std::time::Duration;

use crate::error::PipelineError;

/// Placeholder replaced by the candidate id in chunked templates.
pub const CANDIDATE_PLACEHOLDER: &str = "{}";

pub const DEFAULT_EXTRACTOR: &str = "yt-dlp";

/// Where a site's live stream comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamSource {
    DirectLive {
        url: String,
    },
    ChunkedCandidates {
        template: String,
        first_id: u32,
        last_id: u32,
    },
    PageExtract {
        page_url: String,
    },
}

impl StreamSource {
    pub fn direct(url: impl Into<String>) -> Self {
        StreamSource::DirectLive { url: url.into() }
    }

    pub fn chunked(template: impl Into<String>, first_id: u32, last_id: u32) -> Self {
        StreamSource::ChunkedCandidates {
            template: template.into(),
            first_id,
            last_id,
        }
    }

    pub fn page(page_url: impl Into<String>) -> Self {
        StreamSource::PageExtract {
            page_url: page_url.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            StreamSource::DirectLive { url } if url.trim().is_empty() => {
                Err(anyhow!("direct stream url must not be empty"))
            }
            StreamSource::ChunkedCandidates { template, .. }
                if !template.contains(CANDIDATE_PLACEHOLDER) =>
            {
                Err(anyhow!(
                    "chunk template '{}' is missing the {} placeholder",
                    template,
                    CANDIDATE_PLACEHOLDER
                ))
            }
            StreamSource::PageExtract { page_url } if page_url.trim().is_empty() => {
                Err(anyhow!("page url must not be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            StreamSource::DirectLive { url } => format!("direct {}", url),
            StreamSource::ChunkedCandidates {
                template,
                first_id,
                last_id,
            } => format!("chunked {} [{}..={}]", template, first_id, last_id),
            StreamSource::PageExtract { page_url } => format!("page {}", page_url),
        }
    }
}

/// Substitute a candidate id into a chunk template.
pub fn candidate_url(template: &str, id: u32) -> String {
    template.replace(CANDIDATE_PLACEHOLDER, &id.to_string())
}

/// Liveness check for one candidate URL.
pub trait StreamProbe: Send + Sync {
    fn is_live(&self, url: &str) -> bool;
}

/// HTTP GET probe: live when the server answers 200.
pub struct HttpProbe {
    agent: ureq::Agent,
}

impl HttpProbe {
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

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(None)
    }
}

impl StreamProbe for HttpProbe {
    fn is_live(&self, url: &str) -> bool {
        match self.agent.get(url).call() {
            Ok(response) => response.status() == 200,
            Err(ureq::Error::Status(code, _)) => {
                log::debug!("probe {} answered {}", url, code);
                false
            }
            Err(err) => {
                log::debug!("probe {} failed: {}", url, err);
                false
            }
        }
    }
}

/// Turns a [`StreamSource`] into a playable URL.
pub struct StreamResolver {
    probe: Box<dyn StreamProbe>,
    extractor: String,
}

impl StreamResolver {
    pub fn new(probe: Box<dyn StreamProbe>) -> Self {
        Self {
            probe,
            extractor: DEFAULT_EXTRACTOR.to_string(),
        }
    }

    pub fn with_extractor(mut self, program: impl Into<String>) -> Self {
        self.extractor = program.into();
        self
    }

    pub fn resolve(&self, source: &StreamSource) -> Result<String, PipelineError> {
        match source {
            StreamSource::DirectLive { url } => Ok(url.clone()),
            StreamSource::ChunkedCandidates {
                template,
                first_id,
                last_id,
            } => self.scan_candidates(template, *first_id, *last_id),
            StreamSource::PageExtract { page_url } => extract_stream_url(&self.extractor, page_url)
                .map_err(|err| PipelineError::no_stream(format!("{:#}", err))),
        }
    }

    fn scan_candidates(
        &self,
        template: &str,
        first_id: u32,
        last_id: u32,
    ) -> Result<String, PipelineError> {
        for id in first_id..=last_id {
            let url = candidate_url(template, id);
            if self.probe.is_live(&url) {
                log::info!("stream candidate {} is live: {}", id, url);
                return Ok(url);
            }
        }
        Err(PipelineError::no_stream(format!(
            "no live stream among candidates {}..={} of {}",
            first_id, last_id, template
        )))
    }
}

/// Ask the extractor for the best single-file media URL behind `page_url`.
fn extract_stream_url(program: &str, page_url: &str) -> Result<String> {
    let output = Command::new(program)
        .args(["-f", "best", "--no-playlist", "-g", page_url])
        .output()
        .with_context(|| format!("run stream extractor '{}'", program))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "stream extractor exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("stream extractor returned no url for {}", page_url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::sync::{Arc, Mutex};

    const TEMPLATE: &str = "https://cams.example/live/chunklist_{}.m3u8";

    /// Live only for the listed ids; records every probed URL.
    struct ScriptedProbe {
        live: Vec<u32>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl StreamProbe for ScriptedProbe {
        fn is_live(&self, url: &str) -> bool {
            self.calls.lock().unwrap().push(url.to_string());
            self.live.iter().any(|id| candidate_url(TEMPLATE, *id) == url)
        }
    }

    fn resolver(live: Vec<u32>) -> (StreamResolver, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let probe = ScriptedProbe {
            live,
            calls: calls.clone(),
        };
        (StreamResolver::new(Box::new(probe)), calls)
    }

    #[test]
    fn scan_stops_at_first_live_candidate() {
        let (resolver, calls) = resolver(vec![1050, 1070]);
        let url = resolver
            .resolve(&StreamSource::chunked(TEMPLATE, 1000, 1100))
            .unwrap();
        assert_eq!(url, "https://cams.example/live/chunklist_1050.m3u8");

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 51);
        let expected: Vec<String> = (1000..=1050).map(|id| candidate_url(TEMPLATE, id)).collect();
        assert_eq!(*calls, expected);
    }

    #[test]
    fn exhausted_scan_is_no_stream_found() {
        let (resolver, calls) = resolver(vec![]);
        let err = resolver
            .resolve(&StreamSource::chunked(TEMPLATE, 1000, 1100))
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::NoStreamFound);
        assert_eq!(calls.lock().unwrap().len(), 101);
    }

    #[test]
    fn empty_range_probes_nothing() {
        let (resolver, calls) = resolver(vec![5]);
        let err = resolver
            .resolve(&StreamSource::chunked(TEMPLATE, 10, 5))
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::NoStreamFound);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn direct_urls_are_not_probed() {
        let (resolver, calls) = resolver(vec![]);
        let url = resolver
            .resolve(&StreamSource::direct("rtsp://cam/stream"))
            .unwrap();
        assert_eq!(url, "rtsp://cam/stream");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_extractor_is_no_stream_found() {
        let (resolver, _) = resolver(vec![]);
        let resolver = resolver.with_extractor("/nonexistent/stream-extractor");
        let err = resolver
            .resolve(&StreamSource::page("https://video.example/watch?v=abc"))
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::NoStreamFound);
        assert!(err.message.contains("stream extractor"));
    }

    #[test]
    fn templates_need_a_placeholder() {
        assert!(StreamSource::chunked("https://cams.example/a.m3u8", 1, 2)
            .validate()
            .is_err());
        assert!(StreamSource::chunked(TEMPLATE, 1, 2).validate().is_ok());
        assert!(StreamSource::direct("  ").validate().is_err());
    }

    #[test]
    fn sources_describe_themselves_for_logs() {
        assert_eq!(
            StreamSource::chunked(TEMPLATE, 1000, 1100).describe(),
            "chunked https://cams.example/live/chunklist_{}.m3u8 [1000..=1100]"
        );
        assert_eq!(
            StreamSource::page("https://video.example/watch?v=abc").describe(),
            "page https://video.example/watch?v=abc"
        );
    }

    #[test]
    fn http_probe_counts_only_200_as_live() {
        use crate::ingest::http_fixture::{closed_addr, serve};

        let (addr, server) = serve(vec![
            (404, b"missing".to_vec()),
            (204, Vec::new()),
            (200, b"#EXTM3U".to_vec()),
        ]);
        let probe = HttpProbe::new(Some(Duration::from_secs(5)));
        let url = format!("http://{}/live/chunklist_1.m3u8", addr);
        assert!(!probe.is_live(&url));
        assert!(!probe.is_live(&url));
        assert!(probe.is_live(&url));
        server.join().unwrap();

        let refused = format!("http://{}/live/chunklist_1.m3u8", closed_addr());
        assert!(!probe.is_live(&refused));
    }

    #[test]
    fn chunked_scan_over_http_stops_at_first_200() {
        use crate::ingest::http_fixture::serve;

        let (addr, server) = serve(vec![(404, Vec::new()), (200, b"#EXTM3U".to_vec())]);
        let template = format!("http://{}/chunklist_{{}}.m3u8", addr);
        let resolver = StreamResolver::new(Box::new(HttpProbe::new(Some(Duration::from_secs(5)))));
        let url = resolver
            .resolve(&StreamSource::chunked(template, 7, 9))
            .unwrap();
        assert_eq!(url, format!("http://{}/chunklist_8.m3u8", addr));
        server.join().unwrap();
    }
}
