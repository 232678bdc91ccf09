//! Integration tests for the submission pipeline
//!
//! Extraction is stubbed; everything downstream (resolver, store,
//! aggregation, events) runs against a real SQLite file.

mod helpers;

use accessmap_ai::db::{entrances, failures, observations, records};
use accessmap_ai::extractors::ExtractionError;
use accessmap_ai::services::{SubmissionError, SubmissionRequest};
use accessmap_ai::vocabulary::{Attribute, AttributeValue};
use accessmap_common::events::AccessMapEvent;
use accessmap_common::GeoPoint;
use helpers::{create_test_state, flag_set, png_bytes, test_pipeline_config, StubExtractor};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn origin() -> GeoPoint {
    GeoPoint::new(37.5665, 126.9780).unwrap()
}

fn request_at(point: GeoPoint, salt: u8) -> SubmissionRequest {
    SubmissionRequest {
        image: png_bytes(salt),
        latitude: point.latitude,
        longitude: point.longitude,
        venue_hint: None,
        user_ref: format!("user-{}", salt),
    }
}

#[tokio::test]
async fn test_conflicting_reports_keep_stronger_value() {
    let stub = Arc::new(StubExtractor::sequence(vec![
        Ok(flag_set(Attribute::HasStep, true, 0.9)),
        Ok(flag_set(Attribute::HasStep, false, 0.4)),
    ]));
    let (_dir, state) = create_test_state(stub, test_pipeline_config()).await.unwrap();

    let first = state
        .submissions
        .submit(request_at(origin(), 1), CancellationToken::new())
        .await
        .unwrap();
    let second = state
        .submissions
        .submit(request_at(origin(), 2), CancellationToken::new())
        .await
        .unwrap();

    assert!(first.created_entrance);
    assert!(!second.created_entrance);
    assert_eq!(first.entrance_id, second.entrance_id);

    let record = records::get(&state.db, second.entrance_id).await.unwrap().unwrap();
    assert_eq!(record, second.record);
    assert_eq!(record.observation_count, 2);

    let has_step = record.get(Attribute::HasStep).unwrap();
    assert_eq!(has_step.value, AttributeValue::Flag(true));
    assert_eq!(has_step.supporting_observation_count, 2);
    // share 0.9 / 1.3, noisy-OR strength 0.9 (decay over milliseconds is negligible)
    assert!((has_step.confidence - 0.9 / 1.3 * 0.9).abs() < 1e-3);
}

#[tokio::test]
async fn test_extraction_timeout_records_nothing() {
    let stub = Arc::new(
        StubExtractor::always(Ok(flag_set(Attribute::HasRamp, true, 0.8))).with_delay(Duration::from_secs(5)),
    );
    let (_dir, state) = create_test_state(stub.clone(), test_pipeline_config()).await.unwrap();
    let mut events = state.event_bus.subscribe();

    let err = state
        .submissions
        .submit(request_at(origin(), 1), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SubmissionError::Extraction(ExtractionError::Timeout { .. })));
    // One retry after the first timeout
    assert_eq!(stub.calls(), 2);
    assert_eq!(observations::count(&state.db).await.unwrap(), 0);
    assert_eq!(entrances::count(&state.db).await.unwrap(), 0);

    let logged = failures::list_recent(&state.db, 10).await.unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].error_kind, "timeout");
    assert_eq!(logged[0].user_ref, "user-1");

    match events.recv().await.unwrap() {
        AccessMapEvent::SubmissionFailed { error_kind, .. } => assert_eq!(error_kind, "timeout"),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_extraction_never_reaches_store() {
    let stub = Arc::new(
        StubExtractor::always(Ok(flag_set(Attribute::HasRamp, true, 0.8))).with_delay(Duration::from_millis(200)),
    );
    let (_dir, state) = create_test_state(stub, test_pipeline_config()).await.unwrap();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = state.submissions.submit(request_at(origin(), 1), cancel).await.unwrap_err();
    assert!(matches!(err, SubmissionError::Extraction(ExtractionError::Cancelled)));
    assert_eq!(observations::count(&state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unreadable_payload_is_rejected_before_extraction() {
    let stub = Arc::new(StubExtractor::always(Ok(flag_set(Attribute::HasStep, false, 0.7))));
    let (_dir, state) = create_test_state(stub.clone(), test_pipeline_config()).await.unwrap();

    let mut request = request_at(origin(), 1);
    request.image = b"definitely not an image".to_vec();

    let err = state.submissions.submit(request, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SubmissionError::Extraction(ExtractionError::Unreadable(_))));
    assert_eq!(err.kind(), "unreadable");
    assert_eq!(stub.calls(), 0);
    assert_eq!(entrances::count(&state.db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_location_creates_no_entrance() {
    let stub = Arc::new(StubExtractor::always(Ok(flag_set(Attribute::HasStep, false, 0.7))));
    let (_dir, state) = create_test_state(stub.clone(), test_pipeline_config()).await.unwrap();

    let mut request = request_at(origin(), 1);
    request.latitude = 123.0;

    let err = state.submissions.submit(request, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, SubmissionError::Resolution(_)));
    assert_eq!(stub.calls(), 0);
    assert_eq!(entrances::count(&state.db).await.unwrap(), 0);
    assert_eq!(failures::count(&state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_proximity_threshold() {
    let stub = Arc::new(StubExtractor::always(Ok(flag_set(Attribute::HasStep, false, 0.7))));
    let (_dir, state) = create_test_state(stub, test_pipeline_config()).await.unwrap();

    let base = state
        .submissions
        .submit(request_at(origin(), 1), CancellationToken::new())
        .await
        .unwrap();
    let same = state
        .submissions
        .submit(request_at(origin(), 2), CancellationToken::new())
        .await
        .unwrap();
    let near = state
        .submissions
        .submit(request_at(origin().offset(90.0, 12.0), 3), CancellationToken::new())
        .await
        .unwrap();
    let far = state
        .submissions
        .submit(request_at(origin().offset(270.0, 50.0), 4), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(same.entrance_id, base.entrance_id);
    assert_eq!(near.entrance_id, base.entrance_id);
    assert_ne!(far.entrance_id, base.entrance_id);
    assert!(far.created_entrance);
    assert_eq!(entrances::count(&state.db).await.unwrap(), 2);
}

#[tokio::test]
async fn test_venue_hint_is_stored_on_new_entrance() {
    let stub = Arc::new(StubExtractor::always(Ok(flag_set(Attribute::HasStep, false, 0.7))));
    let (_dir, state) = create_test_state(stub, test_pipeline_config()).await.unwrap();

    let mut request = request_at(origin(), 1);
    request.venue_hint = Some("  city-library ".to_string());
    let receipt = state.submissions.submit(request, CancellationToken::new()).await.unwrap();

    let entrance = entrances::get(&state.db, receipt.entrance_id).await.unwrap().unwrap();
    assert_eq!(entrance.venue_ref.as_deref(), Some("city-library"));
}

#[tokio::test]
async fn test_concurrent_submissions_at_one_spot_create_one_entrance() {
    let stub = Arc::new(
        StubExtractor::always(Ok(flag_set(Attribute::HasHandrail, true, 0.6))).with_delay(Duration::from_millis(5)),
    );
    let (_dir, state) = create_test_state(stub, test_pipeline_config()).await.unwrap();

    let mut tasks = Vec::new();
    for salt in 0..8u8 {
        let submissions = state.submissions.clone();
        tasks.push(tokio::spawn(async move {
            submissions.submit(request_at(origin(), salt), CancellationToken::new()).await
        }));
    }

    let mut created = 0;
    for task in tasks {
        let receipt = task.await.unwrap().unwrap();
        if receipt.created_entrance {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(entrances::count(&state.db).await.unwrap(), 1);
    assert_eq!(observations::count(&state.db).await.unwrap(), 8);

    let id = entrances::list_ids(&state.db).await.unwrap()[0];
    let record = records::get(&state.db, id).await.unwrap().unwrap();
    assert_eq!(record.observation_count, 8);
    assert_eq!(record.get(Attribute::HasHandrail).unwrap().supporting_observation_count, 8);
}

#[tokio::test]
async fn test_store_failure_leaves_no_partial_state() {
    let stub = Arc::new(StubExtractor::always(Ok(flag_set(Attribute::HasStep, true, 0.7))));
    let (dir, state) = create_test_state(stub, test_pipeline_config()).await.unwrap();

    // The record swap is the last statement of the commit transaction
    sqlx::query("DROP TABLE accessibility_records")
        .execute(&state.db)
        .await
        .unwrap();

    let err = state
        .submissions
        .submit(request_at(origin(), 1), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SubmissionError::Store(_)));
    assert_eq!(err.kind(), "store_failure");
    assert_eq!(entrances::count(&state.db).await.unwrap(), 0);
    assert_eq!(observations::count(&state.db).await.unwrap(), 0);

    // The image written before the failed commit is gone too
    let images = dir.path().join("images");
    let leftover = std::fs::read_dir(&images).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn test_failed_commit_keeps_image_shared_with_stored_observation() {
    let stub = Arc::new(StubExtractor::always(Ok(flag_set(Attribute::HasStep, true, 0.7))));
    let (dir, state) = create_test_state(stub, test_pipeline_config()).await.unwrap();

    let first = state
        .submissions
        .submit(request_at(origin(), 1), CancellationToken::new())
        .await
        .unwrap();

    sqlx::query("DROP TABLE accessibility_records")
        .execute(&state.db)
        .await
        .unwrap();

    // Same bytes again: the file already existed, so the failure must not delete it
    let err = state
        .submissions
        .submit(request_at(origin(), 1), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SubmissionError::Store(_)));

    let stored = observations::get(&state.db, first.observation_id).await.unwrap().unwrap();
    let hex = stored.raw_image_ref.trim_start_matches("sha256:");
    assert!(dir.path().join("images").join(hex).exists());
}

#[tokio::test]
async fn test_success_publishes_record_update() {
    let stub = Arc::new(StubExtractor::always(Ok(flag_set(Attribute::HasRamp, true, 0.8))));
    let (_dir, state) = create_test_state(stub, test_pipeline_config()).await.unwrap();
    let mut events = state.event_bus.subscribe();

    let receipt = state
        .submissions
        .submit(request_at(origin(), 1), CancellationToken::new())
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        AccessMapEvent::RecordUpdated {
            entrance_id,
            observation_count,
            attribute_count,
            ..
        } => {
            assert_eq!(entrance_id, receipt.entrance_id.0);
            assert_eq!(observation_count, 1);
            assert_eq!(attribute_count, 1);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let stored = observations::get(&state.db, receipt.observation_id).await.unwrap().unwrap();
    assert!(stored.raw_image_ref.starts_with("sha256:"));
    assert_eq!(stored.source_user_ref, "user-1");
}
