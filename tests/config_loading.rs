//! Loading configuration files from disk.

use std::io::Write;
use std::time::Duration;

use forward_proxy::config::{load_config, ConfigError};

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn partial_file_keeps_defaults_for_the_rest() {
    let file = write_config(
        r#"
[listener]
bind_address = "127.0.0.1:3128"
max_connections_per_ip = 50

[timeouts]
dial_secs = 3

[upstream]
dial_retries = 4
"#,
    );

    let config = load_config(Some(file.path())).unwrap();

    assert_eq!(config.listener.bind_address, "127.0.0.1:3128");
    assert_eq!(config.listener.max_connections_per_ip, 50);
    assert_eq!(config.listener.max_request_body_bytes, 4 * 1024 * 1024);
    assert_eq!(config.timeouts.dial(), Duration::from_secs(3));
    assert_eq!(config.timeouts.response(), Duration::from_secs(60));
    assert_eq!(config.upstream.dial_retries, 4);
    assert_eq!(config.upstream.dial_retry_delay(), Duration::from_millis(100));
    assert_eq!(config.observability.metrics_path, "/metrics");
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let file = write_config("[listener\nbind_address = ");
    assert!(matches!(
        load_config(Some(file.path())),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn invalid_values_are_reported_together() {
    let file = write_config(
        r#"
[listener]
bind_address = "not-an-address"

[timeouts]
dial_secs = 0

[observability]
log_format = "xml"
"#,
    );

    match load_config(Some(file.path())) {
        Err(ConfigError::Validation(errors)) => {
            let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
            assert!(fields.contains(&"listener.bind_address"));
            assert!(fields.contains(&"timeouts.dial_secs"));
            assert!(fields.contains(&"observability.log_format"));
        }
        other => panic!("expected validation errors, got {other:?}"),
    }
}
