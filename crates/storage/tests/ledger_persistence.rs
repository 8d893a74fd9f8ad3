use shared::domain::{ChatId, Phone};
use storage::{ChannelMembership, SubscriptionLedger};

#[tokio::test]
async fn every_mutation_is_visible_to_a_fresh_instance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("subscriptions.json");
    let phone = Phone::parse("79990001122").expect("phone");

    let ledger = SubscriptionLedger::load(&path).await;
    ledger
        .record(
            &phone,
            ChannelMembership {
                link: "@alpha".into(),
                chat_id: ChatId(-1001),
                title: Some("Alpha".into()),
                username: Some("alpha".into()),
                joined_at: None,
                already_member: Some(true),
            },
        )
        .await;
    ledger
        .record(
            &phone,
            ChannelMembership {
                link: "+hash".into(),
                chat_id: ChatId(-1002),
                title: None,
                username: None,
                joined_at: None,
                already_member: None,
            },
        )
        .await;

    let reloaded = SubscriptionLedger::load(&path).await;
    let entries = reloaded.entries(&phone).await;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].username.as_deref(), Some("alpha"));
    assert_eq!(entries[1].display_title(), "Unknown");

    ledger.remove_link(&phone, "@alpha").await;
    let reloaded = SubscriptionLedger::load(&path).await;
    assert_eq!(reloaded.chat_for_link(&phone, "@alpha").await, None);
    assert_eq!(reloaded.chat_for_link(&phone, "+hash").await, Some(ChatId(-1002)));
}

#[tokio::test]
async fn ledger_written_by_the_legacy_bot_is_readable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("subscriptions.json");
    std::fs::write(
        &path,
        r#"{
  "79990001122": [
    {"link": "@news", "chat_id": -100123, "title": "News", "username": "news",
     "joined_at": "2024-05-01T10:20:30.123456"},
    {"link": "+abc", "chat_id": -100456, "title": null, "username": null, "already_member": true}
  ]
}"#,
    )
    .expect("write");

    let ledger = SubscriptionLedger::load(&path).await;
    let phone = Phone::parse("79990001122").expect("phone");
    let entries = ledger.entries(&phone).await;
    assert_eq!(entries.len(), 2);
    assert!(entries[0].joined_at.is_some());
    assert_eq!(entries[1].already_member, Some(true));
}
