use super::BrokerError;
use super::logging;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
    logging::init("nonsense");
}

#[test]
fn persistence_error_mentions_path() {
    let err = BrokerError::persistence(
        "/tmp/orders.wal",
        std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
    );
    assert!(err.is_persistence());
    let text = err.to_string();
    assert!(text.contains("/tmp/orders.wal"));
    assert!(text.contains("disk full"));
}

#[test]
fn queue_errors_render_names() {
    assert_eq!(
        BrokerError::QueueNotFound("orders".into()).to_string(),
        "queue orders not found"
    );
    let err = BrokerError::InvalidQueueType {
        queue: "orders".into(),
        operation: "pull".into(),
    };
    assert_eq!(err.to_string(), "queue orders does not support pull");
    assert!(!err.is_persistence());
}
