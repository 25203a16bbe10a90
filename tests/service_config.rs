use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use river_gauge::config::ServiceConfig;
use river_gauge::ingest::StreamSource;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RIVER_GAUGE_CONFIG",
        "RIVER_GAUGE_API_ADDR",
        "RIVER_GAUGE_BASE_URL",
        "RIVER_GAUGE_IMAGE_DIR",
        "RIVER_GAUGE_PROBE_TIMEOUT_SECS",
        "RIVER_GAUGE_EXTRACTOR",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.api_addr, "127.0.0.1:5000");
    assert_eq!(cfg.base_url, "http://127.0.0.1:5000/");
    assert_eq!(cfg.image_dir, std::path::PathBuf::from("./images"));
    assert_eq!(cfg.timeout(), Some(Duration::from_secs(10)));
    assert_eq!(cfg.extractor, "yt-dlp");
    assert!(cfg.site_sources.is_empty());

    let sites = cfg.sites().expect("builtin sites");
    assert_eq!(sites.len(), 2);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "api": {
                "addr": "0.0.0.0:8080",
                "base_url": "https://gauge.example.org/river"
            },
            "images": { "dir": "/var/lib/river-gauge/images" },
            "probe": { "timeout_secs": 3 },
            "extractor": "/usr/local/bin/yt-dlp",
            "sites": {
                "Pakkred": { "stream_url": "rtsp://camera-1/live" },
                "tanamnon": {
                    "chunk_template": "https://cdn.example.org/chunklist_{}.m3u8",
                    "first_id": 10,
                    "last_id": 20
                }
            }
        }"#,
    );

    std::env::set_var("RIVER_GAUGE_CONFIG", file.path());
    std::env::set_var("RIVER_GAUGE_IMAGE_DIR", "/tmp/gauge-images");
    std::env::set_var("RIVER_GAUGE_PROBE_TIMEOUT_SECS", "0");

    let cfg = ServiceConfig::load().expect("load config");

    assert_eq!(cfg.api_addr, "0.0.0.0:8080");
    assert_eq!(cfg.base_url, "https://gauge.example.org/river/");
    assert_eq!(cfg.image_dir, std::path::PathBuf::from("/tmp/gauge-images"));
    assert_eq!(cfg.timeout(), None);
    assert_eq!(cfg.extractor, "/usr/local/bin/yt-dlp");

    let sites = cfg.sites().expect("sites with overrides");
    assert_eq!(sites[0].source, StreamSource::direct("rtsp://camera-1/live"));
    assert_eq!(
        sites[1].source,
        StreamSource::chunked("https://cdn.example.org/chunklist_{}.m3u8", 10, 20)
    );

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RIVER_GAUGE_API_ADDR", "not-an-addr");
    assert!(ServiceConfig::load().is_err());
    clear_env();

    std::env::set_var("RIVER_GAUGE_PROBE_TIMEOUT_SECS", "ten");
    let err = ServiceConfig::load().unwrap_err();
    assert!(err.to_string().contains("RIVER_GAUGE_PROBE_TIMEOUT_SECS"));
    clear_env();

    let file = write_config(r#"{ "sites": { "tanamnon": { "chunk_template": "no-placeholder", "first_id": 1, "last_id": 2 } } }"#);
    std::env::set_var("RIVER_GAUGE_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());
    clear_env();

    let file = write_config(r#"{ "sites": { "tanamnon": { "chunk_template": "https://x/{}.m3u8" } } }"#);
    std::env::set_var("RIVER_GAUGE_CONFIG", file.path());
    let err = ServiceConfig::load().unwrap_err();
    assert!(err.to_string().contains("first_id"));
    clear_env();

    let file = write_config(r#"{ "sites": { "bangkok": { "stream_url": "rtsp://camera" } } }"#);
    std::env::set_var("RIVER_GAUGE_CONFIG", file.path());
    let cfg = ServiceConfig::load().expect("unknown site only fails when sites are built");
    assert!(cfg.sites().is_err());

    clear_env();
}
