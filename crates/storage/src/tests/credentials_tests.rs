use super::*;

fn account(phone: &str, credential: &str) -> StoredAccount {
    StoredAccount {
        phone: Phone::parse(phone).expect("phone"),
        session_credential: SessionCredential::new(credential),
    }
}

#[tokio::test]
async fn missing_file_loads_as_empty_pool() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CredentialStore::load(dir.path().join("accounts.json")).await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn corrupt_file_fails_soft() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("accounts.json");
    std::fs::write(&path, "{ not json").expect("write");

    let store = CredentialStore::load(&path).await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn saved_accounts_reload_in_insertion_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("accounts.json");

    let mut store = CredentialStore::empty(&path);
    store.insert(account("+79990000002", "cred-b"));
    store.insert(account("79990000001", "cred-a"));
    store.save().await.expect("save");

    let reloaded = CredentialStore::load(&path).await;
    let phones: Vec<_> = reloaded
        .accounts()
        .map(|account| account.phone.to_string())
        .collect();
    assert_eq!(phones, vec!["79990000002", "79990000001"]);
    assert_eq!(
        reloaded
            .get(&Phone::parse("79990000001").unwrap())
            .map(|a| a.session_credential.expose().to_string()),
        Some("cred-a".to_string())
    );
}

#[tokio::test]
async fn document_order_survives_a_load_save_cycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("accounts.json");
    std::fs::write(
        &path,
        r#"{
            "79990000002": {"phone": "79990000002", "session_credential": "b"},
            "10000000001": {"phone": "10000000001", "session_credential": "a"},
            "50000000005": {"phone": "50000000005", "session_credential": "c"}
        }"#,
    )
    .expect("write");

    let mut store = CredentialStore::load(&path).await;
    store.remove(&Phone::parse("10000000001").unwrap());
    store.insert(account("10000000001", "a2"));
    store.save().await.expect("save");

    let reloaded = CredentialStore::load(&path).await;
    let phones: Vec<_> = reloaded
        .accounts()
        .map(|account| account.phone.to_string())
        .collect();
    assert_eq!(phones, vec!["79990000002", "50000000005", "10000000001"]);
}

#[test]
fn replacing_a_credential_keeps_its_position() {
    let mut store = CredentialStore::empty("unused.json");
    store.insert(account("300", "first"));
    store.insert(account("100", "second"));

    let previous = store.insert(account("300", "rotated"));

    assert_eq!(
        previous.map(|a| a.session_credential.expose().to_string()),
        Some("first".to_string())
    );
    let order: Vec<_> = store
        .accounts()
        .map(|account| {
            (
                account.phone.to_string(),
                account.session_credential.expose().to_string(),
            )
        })
        .collect();
    assert_eq!(
        order,
        vec![
            ("300".to_string(), "rotated".to_string()),
            ("100".to_string(), "second".to_string())
        ]
    );
}

#[tokio::test]
async fn legacy_session_string_field_is_accepted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("accounts.json");
    std::fs::write(
        &path,
        r#"{"7999": {"phone": "7999", "session_string": "legacy"}}"#,
    )
    .expect("write");

    let store = CredentialStore::load(&path).await;
    let stored = store.get(&Phone::parse("7999").unwrap()).expect("account");
    assert_eq!(stored.session_credential.expose(), "legacy");
}

#[tokio::test]
async fn persist_reports_failure_without_panicking() {
    let dir = tempfile::tempdir().expect("tempdir");
    // A directory where the file should be makes the final rename fail.
    let path = dir.path().join("accounts.json");
    std::fs::create_dir_all(path.join("occupied")).expect("dir");

    let mut store = CredentialStore::empty(&path);
    store.insert(account("7999", "cred"));
    assert!(!store.persist().await);
    assert_eq!(store.len(), 1);
}
