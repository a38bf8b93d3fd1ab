use reelfeed_rs::FeedError;

// Error display strings are what operators grep for; keep them stable
#[test]
fn test_error_messages() {
    let err = FeedError::ConnectionClosed;
    assert!(format!("{err}").contains("Connection explicitly closed"));

    let err = FeedError::FeedRejected(4003);
    assert!(format!("{err}").contains("4003"));

    let err = FeedError::RetriesExhausted(10);
    assert!(format!("{err}").contains("10 attempts"));

    let err = FeedError::InvalidResponse("bad frame".to_string());
    assert!(format!("{err}").contains("bad frame"));

    let err = FeedError::StorageFailed("disk full".to_string());
    assert!(format!("{err}").contains("disk full"));
}

// Only policy rejections and an exhausted budget are terminal
#[test]
fn test_terminal_classification() {
    assert!(FeedError::FeedRejected(4029).is_terminal());
    assert!(FeedError::RetriesExhausted(10).is_terminal());
    assert!(!FeedError::ConnectionClosed.is_terminal());
    assert!(!FeedError::InvalidResponse("x".into()).is_terminal());
    assert!(!FeedError::StorageFailed("x".into()).is_terminal());
}
