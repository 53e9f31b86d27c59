mod common;

use std::sync::Arc;

use issuer_hooks::{handler_fn, DrainPipeline, Error, ErrorKind};
use tokio_util::sync::CancellationToken;

use common::{ids, message, FakeState, FakeStore, RecordingHandler};

fn five_message_backlog() -> FakeState {
    FakeState {
        backlog_pages: vec![
            vec![message("1", "h1"), message("2", "h1")],
            vec![message("3", "h1"), message("4", "h1")],
            vec![message("5", "h1")],
        ],
        backlog_page_size: 2,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_drain_dismisses_handled_messages_and_reaches_tail() {
    let store = Arc::new(FakeStore::new(five_message_backlog()));
    let handler = Arc::new(RecordingHandler::failing_on(&["3"]));
    let pipeline = DrainPipeline::new(store.clone(), handler.clone());

    let report = pipeline.drain("h1", "5").await.unwrap();

    assert_eq!(report.dismissed, ids(&["1", "2", "4", "5"]));
    assert_eq!(report.skipped, 1);
    assert_eq!(report.pages, 3);
    assert_eq!(handler.handled(), ids(&["1", "2", "3", "4", "5"]));

    let state = store.state();
    assert_eq!(state.dismissed, vec![ids(&["1", "2", "4", "5"])]);
}

#[tokio::test]
async fn test_drain_reports_incomplete_when_tail_failed() {
    let store = Arc::new(FakeStore::new(five_message_backlog()));
    let handler = Arc::new(RecordingHandler::failing_on(&["3"]));
    let pipeline = DrainPipeline::new(store.clone(), handler);

    let err = pipeline.drain("h1", "3").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IncompleteDrain);
    match err {
        Error::IncompleteDrain { message_id } => assert_eq!(message_id, "3"),
        other => panic!("unexpected error: {other:?}"),
    }
    // Everything that was handled is still dismissed.
    assert_eq!(store.state().dismissed, vec![ids(&["1", "2", "4", "5"])]);
}

#[tokio::test]
async fn test_drain_uses_provider_page_size_after_first_page() {
    let store = Arc::new(FakeStore::new(five_message_backlog()));
    let pipeline = DrainPipeline::new(store.clone(), Arc::new(RecordingHandler::default()));

    pipeline.drain("h1", "5").await.unwrap();

    assert_eq!(store.state().backlog_requests, vec![(1, 20), (2, 2), (3, 2)]);
}

#[tokio::test]
async fn test_drain_fetch_error_still_dismisses_handled() {
    let mut state = five_message_backlog();
    state.fail_backlog_page = Some(2);
    let store = Arc::new(FakeStore::new(state));
    let pipeline = DrainPipeline::new(store.clone(), Arc::new(RecordingHandler::default()));

    let err = pipeline.drain("h1", "5").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.to_string().starts_with("getUndeliverable page 2: "), "{err}");
    assert_eq!(store.state().dismissed, vec![ids(&["1", "2"])]);
}

#[tokio::test]
async fn test_drain_dismissal_error_is_reported() {
    let mut state = five_message_backlog();
    state.fail_dismiss = true;
    let store = Arc::new(FakeStore::new(state));
    let pipeline = DrainPipeline::new(store.clone(), Arc::new(RecordingHandler::default()));

    let err = pipeline.drain("h1", "5").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.to_string().starts_with("dismissUndeliverable: "), "{err}");
}

#[tokio::test]
async fn test_drain_empty_backlog_skips_dismissal() {
    let store = Arc::new(FakeStore::new(FakeState::default()));
    let pipeline = DrainPipeline::new(store.clone(), Arc::new(RecordingHandler::default()));

    let report = pipeline.drain("h1", "").await.unwrap();

    assert!(report.dismissed.is_empty());
    let state = store.state();
    assert!(state.dismissed.is_empty());
    assert!(!state.ops.contains(&"dismissUndeliverable".to_string()));
}

#[tokio::test]
async fn test_drain_cancellation_dismisses_what_was_handled() {
    let mut state = five_message_backlog();
    state.stall_backlog_page = Some(2);
    let store = Arc::new(FakeStore::new(state));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let handler = handler_fn(move |message| {
        let trigger = trigger.clone();
        async move {
            if message.id == "2" {
                trigger.cancel();
            }
            Ok::<(), Error>(())
        }
    });
    let pipeline = DrainPipeline::new(store.clone(), handler);

    let err = pipeline
        .drain_with_cancel("h1", "5", cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(store.state().dismissed, vec![ids(&["1", "2"])]);
}

#[tokio::test]
async fn test_drain_handles_messages_in_delivery_order() {
    let store = Arc::new(FakeStore::new(five_message_backlog()));
    let handler = Arc::new(RecordingHandler::default());
    let pipeline = DrainPipeline::new(store, handler.clone()).with_initial_page_size(2);

    let report = pipeline.drain("h1", "5").await.unwrap();

    assert_eq!(report.skipped, 0);
    assert_eq!(handler.handled(), ids(&["1", "2", "3", "4", "5"]));
}

#[tokio::test]
async fn test_drain_handler_panic_still_dismisses_handled() {
    let store = Arc::new(FakeStore::new(FakeState {
        backlog_pages: vec![vec![
            message("1", "h1"),
            message("2", "h1"),
            message("3", "h1"),
        ]],
        ..Default::default()
    }));
    let handler = handler_fn(|message| async move {
        if message.id == "3" {
            panic!("handler blew up on {}", message.id);
        }
        Ok::<(), Error>(())
    });
    let pipeline = DrainPipeline::new(store.clone(), handler);

    let joined = tokio::spawn(async move { pipeline.drain("h1", "2").await }).await;

    assert!(joined.unwrap_err().is_panic());
    assert_eq!(store.state().dismissed, vec![ids(&["1", "2"])]);
}
