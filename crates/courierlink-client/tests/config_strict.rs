#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use courierlink_client::config;
use courierlink_core::error::LinkError;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
link:
  url: "wss://api.example.com/ws"
reconnect:
  max_atempts: 3 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.class().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
link:
  url: "ws://127.0.0.1:9000/ws"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.buffer.capacity, 200);
    assert_eq!(cfg.buffer.storage_key, "outgoingBuffer");
    assert!(cfg.store.path.is_none());

    let link = cfg.link_settings().unwrap();
    assert_eq!(link.heartbeat_interval, Duration::from_secs(25));
    assert_eq!(link.pong_timeout, Duration::from_secs(10));
    assert_eq!(link.reconnect.base_delay, Duration::from_secs(1));
    assert_eq!(link.reconnect.max_delay, Duration::from_secs(60));
    assert_eq!(link.reconnect.max_attempts, 8);
}

#[test]
fn link_section_is_required() {
    let err = config::load_from_str("version: 1\n").expect_err("must fail");
    assert_eq!(err.class().as_str(), "CONFIG");
}

#[test]
fn unsupported_version() {
    let bad = r#"
version: 2
link:
  url: "ws://127.0.0.1:9000/ws"
"#;
    assert!(matches!(
        config::load_from_str(bad),
        Err(LinkError::UnsupportedVersion)
    ));
}

#[test]
fn non_websocket_scheme_is_rejected() {
    let bad = r#"
version: 1
link:
  url: "https://api.example.com/ws"
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(err.to_string().contains("ws or wss"), "got {err}");
}

#[test]
fn max_delay_below_base_is_rejected() {
    let bad = r#"
version: 1
link:
  url: "ws://127.0.0.1:9000/ws"
reconnect:
  base_delay_ms: 5000
  max_delay_ms: 1000
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.class().as_str(), "CONFIG");
}

#[test]
fn full_config_round_trips_into_settings() {
    let ok = r#"
version: 1
link:
  url: "wss://api.example.com/ws"
  heartbeat_interval_ms: 15000
  pong_timeout_ms: 5000
reconnect:
  base_delay_ms: 500
  max_delay_ms: 8000
  max_attempts: 4
buffer:
  capacity: 50
  storage_key: "chatOutbox"
  save_debounce_ms: 100
store:
  path: "/var/lib/courierlink"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    let buffer = cfg.buffer_settings();
    assert_eq!(buffer.capacity, 50);
    assert_eq!(buffer.storage_key, "chatOutbox");
    assert_eq!(buffer.save_debounce, Duration::from_millis(100));
    assert_eq!(cfg.store.path.as_deref(), Some(std::path::Path::new("/var/lib/courierlink")));

    let link = cfg.link_settings().unwrap();
    assert_eq!(link.url.scheme(), "wss");
    assert_eq!(link.reconnect.delay_for(4), Duration::from_secs(4));
}
