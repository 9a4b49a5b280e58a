//! Push-Frame Intake Tests
//!
//! Frames sent through the app's frame sender reach the handlers once the
//! background tasks are running.
//!
//! Run with: `cargo test --test push_frame_test`

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{event_body, CountingHandler, TestApp, MESSAGE_EVENT};
use hookline_server::config::Config;
use hookline_server::stream::PushFrame;

async fn wait_for_calls(handler: &CountingHandler, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while handler.calls() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Frames were not dispatched in time");
}

#[tokio::test]
async fn test_frames_dispatched_by_running_app() {
    let handler = Arc::new(CountingHandler::default());
    let mut app = TestApp::new(Config::default_for_test(), Arc::clone(&handler)).await;
    let background = app.app.spawn_background().unwrap();
    let frames = app.app.frame_sender();

    for (seq, id) in [(5, "evt-a"), (3, "evt-b"), (9, "evt-c"), (3, "evt-b")] {
        frames
            .send(PushFrame::new(seq, event_body(id, MESSAGE_EVENT)))
            .await
            .unwrap();
    }
    wait_for_calls(&handler, 3).await;
    assert_eq!(app.app.state.frames.max_processed_seq_id(), 9);

    app.app.dispose().await;
    for task in background {
        task.await.unwrap();
    }

    assert_eq!(handler.calls(), 3);
}

#[tokio::test]
async fn test_out_of_order_frames_keep_highest_sequence() {
    let handler = Arc::new(CountingHandler::default());
    let mut app = TestApp::new(Config::default_for_test(), Arc::clone(&handler)).await;
    let background = app.app.spawn_background().unwrap();
    let frames = app.app.frame_sender();

    frames
        .send(PushFrame::new(41, event_body("evt-41", MESSAGE_EVENT)))
        .await
        .unwrap();
    frames
        .send(PushFrame::new(40, event_body("evt-40", MESSAGE_EVENT)))
        .await
        .unwrap();
    wait_for_calls(&handler, 2).await;

    assert_eq!(app.app.state.frames.max_processed_seq_id(), 41);
    assert!(app.app.state.frames.sequences().is_processed(40));

    app.app.dispose().await;
    for task in background {
        task.await.unwrap();
    }
}
