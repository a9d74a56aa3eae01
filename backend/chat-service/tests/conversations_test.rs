mod common;

use common::TestApp;

#[tokio::test]
async fn test_history_clears_unread_count() {
    let app = TestApp::new();
    let (a, b) = (app.user("a").await, app.user("b").await);
    app.state.messages.send(a.id, b.id, "one").await.unwrap();
    app.state.messages.send(a.id, b.id, "two").await.unwrap();

    let before = app.state.conversations.list(b.id).await.unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].user_id, a.id);
    assert_eq!(before[0].unread_count, 2);

    app.state.messages.history(b.id, a.id).await.unwrap();

    let after = app.state.conversations.list(b.id).await.unwrap();
    assert_eq!(after[0].unread_count, 0);
}

#[tokio::test]
async fn test_conversations_ordered_by_latest_message() {
    let app = TestApp::new();
    let me = app.user("me").await;
    let (x, y, z) = (app.user("x").await, app.user("y").await, app.user("z").await);

    app.state.messages.send(x.id, me.id, "from x").await.unwrap();
    app.state.messages.send(me.id, y.id, "to y").await.unwrap();
    app.state.messages.send(z.id, me.id, "from z").await.unwrap();
    let latest = app.state.messages.send(me.id, x.id, "to x again").await.unwrap();

    let list = app.state.conversations.list(me.id).await.unwrap();
    let order: Vec<_> = list.iter().map(|c| c.user_id).collect();
    assert_eq!(order, vec![x.id, z.id, y.id]);

    for pair in list.windows(2) {
        assert!(pair[0].last_message.created_at >= pair[1].last_message.created_at);
    }

    let top = &list[0];
    assert_eq!(top.last_message.content, latest.message.content);
    assert_eq!(top.last_message.sender_id, me.id);
    assert_eq!(top.last_message.created_at, latest.message.created_at);
}

#[tokio::test]
async fn test_unread_counts_only_messages_to_viewer() {
    let app = TestApp::new();
    let (me, other) = (app.user("me").await, app.user("other").await);
    app.state.messages.send(me.id, other.id, "mine").await.unwrap();
    app.state.messages.send(other.id, me.id, "theirs").await.unwrap();

    let mine = app.state.conversations.list(me.id).await.unwrap();
    let theirs = app.state.conversations.list(other.id).await.unwrap();

    assert_eq!(mine[0].unread_count, 1);
    assert_eq!(theirs[0].unread_count, 1);
}

#[tokio::test]
async fn test_list_has_no_side_effects() {
    let app = TestApp::new();
    let (a, b) = (app.user("a").await, app.user("b").await);
    app.state.messages.send(a.id, b.id, "hello").await.unwrap();

    let first = app.state.conversations.list(b.id).await.unwrap();
    let second = app.state.conversations.list(b.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second[0].unread_count, 1);
}

#[tokio::test]
async fn test_display_metadata_and_missing_counterpart() {
    let app = TestApp::new();
    let me = app.user("me").await;
    let named = chat_service::models::UserProfile::new(uuid::Uuid::new_v4(), "nina")
        .with_name("Nina N")
        .with_avatar("https://cdn.example/nina.png");
    app.directory.insert(named.clone()).await;
    let gone = app.user("gone").await;

    app.state.messages.send(named.id, me.id, "hey").await.unwrap();
    app.state.messages.send(gone.id, me.id, "bye").await.unwrap();
    app.directory.remove(gone.id).await;

    let list = app.state.conversations.list(me.id).await.unwrap();

    assert_eq!(list.len(), 1);
    assert_eq!(list[0].username, "nina");
    assert_eq!(list[0].name.as_deref(), Some("Nina N"));
    assert_eq!(list[0].avatar.as_deref(), Some("https://cdn.example/nina.png"));
}

#[tokio::test]
async fn test_empty_for_user_without_messages() {
    let app = TestApp::new();
    let lonely = app.user("lonely").await;

    assert!(app.state.conversations.list(lonely.id).await.unwrap().is_empty());
}
