use std::env::temp_dir;

use super::*;

/// Create a temporary database for testing.
async fn create_test_store() -> SqliteTelemetry {
    let db_path = temp_dir().join(format!("ember_test_{}.db", Uuid::new_v4()));
    let url = format!("sqlite:{}", db_path.display());
    SqliteTelemetry::new(&url)
        .await
        .expect("failed to create test store")
}

#[test]
fn test_parse_endpoint() {
    assert!(matches!(
        SqliteTelemetry::parse_endpoint("local"),
        Ok(EndpointKind::Local)
    ));
    assert!(matches!(
        SqliteTelemetry::parse_endpoint("remote"),
        Ok(EndpointKind::Remote)
    ));
    assert!(SqliteTelemetry::parse_endpoint("cloud").is_err());
}

#[tokio::test]
async fn test_record_and_read_back() {
    let store = create_test_store().await;
    let mut record = InferenceRecord::new("qwen3-8b", Utc::now(), EndpointKind::Remote);
    record.input_tokens = 120;
    record.output_tokens = 48;
    record.tokens_per_second = Some(31.5);

    store.record(&record).await.expect("record failed");

    let recent = store.recent(10).await.expect("query failed");
    assert_eq!(recent.len(), 1);
    let stored = &recent[0];
    assert_eq!(stored.id, record.id);
    assert_eq!(stored.name, "qwen3-8b");
    assert_eq!(stored.endpoint, EndpointKind::Remote);
    assert_eq!(stored.input_tokens, 120);
    assert_eq!(stored.output_tokens, 48);
    assert_eq!(stored.tokens_per_second, Some(31.5));
}

#[tokio::test]
async fn test_recent_newest_first_and_limited() {
    let store = create_test_store().await;
    let base = Utc::now();
    for offset in 0..3 {
        let record = InferenceRecord::new(
            format!("m{offset}"),
            base + chrono::Duration::seconds(offset),
            EndpointKind::Local,
        );
        store.record(&record).await.expect("record failed");
    }

    let recent = store.recent(2).await.expect("query failed");
    let names: Vec<_> = recent.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["m2", "m1"]);
}

#[tokio::test]
async fn test_missing_speed_stored_as_null() {
    let store = create_test_store().await;
    let record = InferenceRecord::new("m", Utc::now(), EndpointKind::Local);
    store.record(&record).await.expect("record failed");

    let recent = store.recent(1).await.expect("query failed");
    assert_eq!(recent[0].tokens_per_second, None);
}
