mod common;

use chat_service::error::AppError;
use common::TestApp;
use uuid::Uuid;

#[tokio::test]
async fn test_send_then_history_contains_one_unread_message() {
    let app = TestApp::new();
    let (u1, u2) = (app.user("u1").await, app.user("u2").await);

    let sent = app.state.messages.send(u1.id, u2.id, "hi").await.unwrap();
    assert!(!sent.message.is_read);

    let history = app.state.messages.history(u1.id, u2.id).await.unwrap();
    let matching: Vec<_> = history
        .iter()
        .filter(|m| m.message.id == sent.message.id)
        .collect();

    assert_eq!(matching.len(), 1);
    assert!(!matching[0].message.is_read);
    assert_eq!(matching[0].message.content, "hi");
}

#[tokio::test]
async fn test_self_send_is_invalid_and_stores_nothing() {
    let app = TestApp::new();
    let u1 = app.user("u1").await;

    let err = app.state.messages.send(u1.id, u1.id, "hi").await.unwrap_err();

    assert!(matches!(err, AppError::InvalidArgument(_)));
    assert!(app.messages.is_empty().await);
}

#[tokio::test]
async fn test_missing_sender_is_not_found() {
    let app = TestApp::new();
    let u2 = app.user("u2").await;

    let err = app
        .state
        .messages
        .send(Uuid::new_v4(), u2.id, "hi")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_two_party_scenario() {
    let app = TestApp::new();
    let (u1, u2) = (app.user("u1").await, app.user("u2").await);

    let hi = app.state.messages.send(u1.id, u2.id, "hi").await.unwrap();
    let yo = app.state.messages.send(u2.id, u1.id, "yo").await.unwrap();

    let history = app.state.messages.history(u1.id, u2.id).await.unwrap();
    let contents: Vec<&str> = history.iter().map(|m| m.message.content.as_str()).collect();
    assert_eq!(contents, vec!["hi", "yo"]);

    // "yo" was addressed to the viewer, so this call marked it read.
    assert!(app.messages.get(yo.message.id).await.unwrap().is_read);
    assert!(!app.messages.get(hi.message.id).await.unwrap().is_read);
}

#[tokio::test]
async fn test_history_is_ordered_for_many_messages() {
    let app = TestApp::new();
    let (u1, u2) = (app.user("u1").await, app.user("u2").await);

    for i in 0..20 {
        let (from, to) = if i % 3 == 0 { (u2.id, u1.id) } else { (u1.id, u2.id) };
        app.state
            .messages
            .send(from, to, &format!("m{i}"))
            .await
            .unwrap();
    }

    let history = app.state.messages.history(u2.id, u1.id).await.unwrap();
    let contents: Vec<String> = history.into_iter().map(|m| m.message.content).collect();
    let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
    assert_eq!(contents, expected);
}

#[tokio::test]
async fn test_history_is_not_idempotent_for_read_state() {
    let app = TestApp::new();
    let (u1, u2) = (app.user("u1").await, app.user("u2").await);
    app.state.messages.send(u1.id, u2.id, "a").await.unwrap();
    app.state.messages.send(u1.id, u2.id, "b").await.unwrap();

    let first = app.state.messages.history(u2.id, u1.id).await.unwrap();
    let second = app.state.messages.history(u2.id, u1.id).await.unwrap();

    assert!(first.iter().all(|m| !m.message.is_read));
    assert!(second.iter().all(|m| m.message.is_read));
}
