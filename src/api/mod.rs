use anyhow::{anyhow, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::FailureKind;
use crate::service::{ErrorResponse, GaugeService, SiteOutcome};
use crate::storage::validate_image_name;

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
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
    service: Arc<GaugeService>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: Arc<GaugeService>) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let service = self.service;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &service, shutdown_thread) {
                log::error!("gauge api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, service: &GaugeService, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, service) {
                    log::warn!("gauge api request rejected: {}", err);
                }
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

#[derive(Serialize)]
struct Combined {
    status: &'static str,
    data: Vec<SiteOutcome>,
}

#[derive(Serialize)]
struct Failure<'a> {
    status: &'static str,
    kind: &'a str,
    message: &'a str,
}

fn handle_connection(mut stream: TcpStream, service: &GaugeService) -> Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        return write_failure(&mut stream, 403, "FORBIDDEN", "loopback only");
    }

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        return write_failure(&mut stream, 405, "METHOD_NOT_ALLOWED", "only GET is served");
    }
    log::debug!("GET {}", request.path);

    let path = request.path.as_str();
    if path == "/health" {
        return write_json_response(&mut stream, 200, br#"{"status":"ok"}"#);
    }
    if path == "/" {
        let body = Combined {
            status: "success",
            data: service.measure_all(),
        };
        return write_json_response(&mut stream, 200, &serde_json::to_vec(&body)?);
    }
    if let Some(name) = path.strip_prefix("/sites/") {
        let Some(site) = service.find(name) else {
            let message = format!(
                "unknown site '{}'; known sites: {}",
                name,
                service.site_names().join(", ")
            );
            return write_failure(&mut stream, 404, "UNKNOWN_SITE", &message);
        };
        return match service.measure(site) {
            Ok(response) => write_json_response(&mut stream, 200, &serde_json::to_vec(&response)?),
            Err(err) => {
                let body = ErrorResponse::new(&site.config().display_name, &err);
                write_json_response(&mut stream, err.kind.http_status(), &serde_json::to_vec(&body)?)
            }
        };
    }
    if let Some(name) = path.strip_prefix("/images/") {
        if let Err(err) = validate_image_name(name) {
            return write_failure(&mut stream, 400, "BAD_IMAGE_NAME", &err.to_string());
        }
        return match service.store().get(name) {
            Ok(Some(bytes)) => write_response(&mut stream, 200, "image/jpeg", &bytes),
            Ok(None) => write_failure(&mut stream, 404, "NOT_FOUND", "no such image"),
            Err(err) => {
                log::warn!("image {} unreadable: {:#}", name, err);
                write_failure(
                    &mut stream,
                    500,
                    FailureKind::Internal.code(),
                    "image could not be read",
                )
            }
        };
    }
    write_failure(&mut stream, 404, "NOT_FOUND", "no such route")
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_failure(stream: &mut TcpStream, status: u16, kind: &str, message: &str) -> Result<()> {
    let body = Failure {
        status: "error",
        kind,
        message,
    };
    write_json_response(stream, status, &serde_json::to_vec(&body)?)
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &[u8]) -> Result<()> {
    write_response(stream, status, "application/json", body)
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
        403 => "HTTP/1.1 403 Forbidden",
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
}
