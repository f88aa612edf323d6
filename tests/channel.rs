//! Dispatcher integration tests
//!
//! Exercises the full inbound pipeline (stream envelope → echo filter →
//! framework event) end to end against the in-memory framework fake,
//! across every event kind the dispatcher recognises.

use std::sync::Arc;

use mattermost_bridge::framework::testing::InMemoryFramework;
use mattermost_bridge::{DoublePuppetRegistry, Dispatcher, PuppetRegistry, RemoteUserId};

mod common;

fn envelope(event: &str, data: serde_json::Value, channel_id: Option<&str>) -> mattermost_bridge::remote::Envelope {
    let map = match data {
        serde_json::Value::Object(map) => map,
        _ => panic!("envelope data must be a JSON object"),
    };
    mattermost_bridge::remote::Envelope {
        event: event.to_string(),
        data: map,
        broadcast: mattermost_bridge::remote::Broadcast {
            channel_id: channel_id.map(ToString::to_string),
        },
    }
}

fn post_json(id: &str, channel_id: &str, user_id: &str, message: &str, post_type: &str, create_at: i64) -> String {
    serde_json::json!({
        "id": id,
        "channel_id": channel_id,
        "user_id": user_id,
        "message": message,
        "type": post_type,
        "create_at": create_at,
    })
    .to_string()
}

fn make_dispatcher(framework: Arc<InMemoryFramework>, session_id: &str) -> Dispatcher {
    make_dispatcher_with_double_puppets(framework, Arc::new(DoublePuppetRegistry::new()), session_id)
}

fn make_dispatcher_with_double_puppets(
    framework: Arc<InMemoryFramework>,
    double_puppets: Arc<DoublePuppetRegistry>,
    session_id: &str,
) -> Dispatcher {
    Dispatcher::new(
        framework,
        Arc::new(PuppetRegistry::new()),
        double_puppets,
        RemoteUserId::encode(session_id),
        String::new(),
        0,
    )
}

#[tokio::test]
async fn full_conversation_round_trip_produces_the_expected_event_sequence() {
    let framework = Arc::new(InMemoryFramework::new());
    let dispatcher = make_dispatcher(framework.clone(), "bridge-self");

    // A plain message from a remote user with no Matrix double puppet:
    // should be attributed to a ghost.
    let posted = envelope(
        "posted",
        serde_json::json!({
            "post": post_json("p1", "ch1", "alice-id", "hello there", "", 1000),
            "sender_name": "@alice",
        }),
        Some("ch1"),
    );
    dispatcher.dispatch(posted).await.unwrap();

    // The same user edits their message.
    let edited = envelope(
        "post_edited",
        serde_json::json!({
            "post": post_json("p1", "ch1", "alice-id", "hello there!", "", 1001),
            "sender_name": "@alice",
        }),
        Some("ch1"),
    );
    dispatcher.dispatch(edited).await.unwrap();

    // Someone reacts to it.
    let reacted = envelope(
        "reaction_added",
        serde_json::json!({
            "reaction": {"user_id": "bob-id", "post_id": "p1", "emoji_name": "thumbsup"},
            "sender_name": "@bob",
        }),
        Some("ch1"),
    );
    dispatcher.dispatch(reacted).await.unwrap();

    // Then deletes the post.
    let deleted = envelope(
        "post_deleted",
        serde_json::json!({
            "post": post_json("p1", "ch1", "alice-id", "hello there!", "", 1001),
            "sender_name": "@alice",
        }),
        Some("ch1"),
    );
    dispatcher.dispatch(deleted).await.unwrap();

    let queued = framework.queued.lock().unwrap();
    assert_eq!(queued.len(), 4);
    assert!(matches!(queued[0].event, mattermost_bridge::framework::BridgeEvent::Message { .. }));
    assert!(matches!(queued[1].event, mattermost_bridge::framework::BridgeEvent::Edit { .. }));
    assert!(matches!(queued[2].event, mattermost_bridge::framework::BridgeEvent::ReactionAdd { .. }));
    assert!(matches!(queued[3].event, mattermost_bridge::framework::BridgeEvent::Delete { .. }));

    for q in queued.iter() {
        assert!(matches!(q.sender, mattermost_bridge::framework::Sender::Ghost(_)));
    }
}

#[tokio::test]
async fn double_puppeted_sender_is_attributed_to_the_real_user() {
    let framework = Arc::new(InMemoryFramework::new());
    let double_puppets = Arc::new(DoublePuppetRegistry::new());
    double_puppets
        .enrol(framework.as_ref(), &RemoteUserId::encode("alice-id"), "@alice:ex.com")
        .await
        .unwrap();
    let dispatcher = make_dispatcher_with_double_puppets(framework.clone(), double_puppets, "bridge-self");

    let posted = envelope(
        "posted",
        serde_json::json!({
            "post": post_json("p1", "ch1", "alice-id", "hi from my own account", "", 1000),
            "sender_name": "@alice",
        }),
        Some("ch1"),
    );
    dispatcher.dispatch(posted).await.unwrap();

    let queued = framework.queued.lock().unwrap();
    assert_eq!(queued.len(), 1);
    assert!(matches!(queued[0].sender, mattermost_bridge::framework::Sender::RealUser(_)));
}

#[tokio::test]
async fn typing_and_read_receipt_events_are_forwarded() {
    let framework = Arc::new(InMemoryFramework::new());
    let dispatcher = make_dispatcher(framework.clone(), "bridge-self");

    let typing = envelope("typing", serde_json::json!({"user_id": "alice-id"}), Some("ch1"));
    dispatcher.dispatch(typing).await.unwrap();

    let viewed = envelope("channel_viewed", serde_json::json!({"channel_id": "ch1"}), None);
    dispatcher.dispatch(viewed).await.unwrap();

    let queued = framework.queued.lock().unwrap();
    assert_eq!(queued.len(), 2);
    assert!(matches!(queued[0].event, mattermost_bridge::framework::BridgeEvent::Typing { .. }));
    assert!(matches!(queued[1].event, mattermost_bridge::framework::BridgeEvent::ReadReceipt));
}
