use std::collections::VecDeque;

use super::*;
use crate::test_support::{phone, pool_with};
use storage::CredentialStore;
use tempfile::TempDir;

async fn stored_phones(dir: &TempDir) -> Vec<String> {
    CredentialStore::load(dir.path().join("accounts.json"))
        .await
        .accounts()
        .map(|account| account.phone.to_string())
        .collect()
}

#[tokio::test]
async fn code_sign_in_commits_the_account() {
    let dir = TempDir::new().unwrap();
    let (pool, factory) = pool_with(dir.path(), &[]);
    let mut flow = OnboardingFlow::new(Arc::clone(&pool));

    let sent = flow.submit("+1 555").await;
    assert!(matches!(sent, Err(OnboardingError::Validation(_))));
    assert_eq!(flow.step(), OnboardingStep::AwaitingPhone);

    let sent = flow.submit("+15550001").await.unwrap();
    assert_eq!(sent, OnboardingNotice::CodeSent(phone("15550001")));
    assert_eq!(flow.step(), OnboardingStep::AwaitingCode);

    let committed = flow.submit(" 12345 ").await.unwrap();
    assert_eq!(committed, OnboardingNotice::Committed(phone("15550001")));
    assert!(flow.is_finished());

    let remote = factory.remote("15550001");
    assert_eq!(
        remote.calls(),
        vec![
            "connect",
            "send_code:15550001",
            "sign_in:token-15550001:12345",
            "export",
        ]
    );
    assert!(remote.is_connected(), "connection is handed to the pool");
    assert!(pool.contains(&phone("15550001")).await);
    assert_eq!(stored_phones(&dir).await, vec!["15550001"]);
    assert!(matches!(
        flow.submit("again").await,
        Err(OnboardingError::Finished(OnboardingStep::Committed))
    ));
}

#[tokio::test]
async fn duplicate_phone_is_rejected_without_connecting() {
    let dir = TempDir::new().unwrap();
    let (pool, factory) = pool_with(dir.path(), &["15550001"]);
    let mut flow = OnboardingFlow::new(pool);

    let result = flow.submit("+15550001").await;

    assert_eq!(
        result,
        Err(OnboardingError::Validation(ValidationError::DuplicatePhone(
            "15550001".into()
        )))
    );
    assert_eq!(flow.step(), OnboardingStep::AwaitingPhone);
    assert!(factory.remote("15550001").calls().is_empty());
}

#[tokio::test]
async fn invalid_code_reprompts() {
    let dir = TempDir::new().unwrap();
    let (pool, factory) = pool_with(dir.path(), &[]);
    factory.remote("15550002").script(|script| {
        script.sign_in = VecDeque::from([Err(RemoteError::InvalidCode), Ok(())]);
    });
    let mut flow = OnboardingFlow::new(pool);

    flow.submit("15550002").await.unwrap();
    assert_eq!(flow.submit("000").await.unwrap(), OnboardingNotice::InvalidCode);
    assert_eq!(flow.step(), OnboardingStep::AwaitingCode);
    assert_eq!(
        flow.submit("111").await.unwrap(),
        OnboardingNotice::Committed(phone("15550002"))
    );
}

#[tokio::test]
async fn password_step_commits_on_success() {
    let dir = TempDir::new().unwrap();
    let (pool, factory) = pool_with(dir.path(), &[]);
    factory.remote("15550003").script(|script| {
        script.sign_in = VecDeque::from([Err(RemoteError::PasswordRequired)]);
    });
    let mut flow = OnboardingFlow::new(Arc::clone(&pool));

    flow.submit("15550003").await.unwrap();
    assert_eq!(
        flow.submit("12345").await.unwrap(),
        OnboardingNotice::PasswordRequired
    );
    assert_eq!(flow.step(), OnboardingStep::AwaitingPassword);
    assert_eq!(
        flow.submit("hunter2").await.unwrap(),
        OnboardingNotice::Committed(phone("15550003"))
    );
    assert!(pool.contains(&phone("15550003")).await);
}

#[tokio::test]
async fn wrong_password_aborts_and_releases_the_connection() {
    let dir = TempDir::new().unwrap();
    let (pool, factory) = pool_with(dir.path(), &[]);
    let remote = factory.remote("15550004");
    remote.script(|script| {
        script.sign_in = VecDeque::from([Err(RemoteError::PasswordRequired)]);
        script.password = Some(RemoteError::other("PASSWORD_HASH_INVALID"));
    });
    let mut flow = OnboardingFlow::new(Arc::clone(&pool));

    flow.submit("15550004").await.unwrap();
    flow.submit("12345").await.unwrap();
    let notice = flow.submit("wrong").await.unwrap();

    assert!(matches!(notice, OnboardingNotice::Aborted(_)));
    assert_eq!(flow.step(), OnboardingStep::Aborted);
    assert!(!remote.is_connected());
    assert_eq!(remote.calls().last().map(String::as_str), Some("disconnect"));
    assert!(pool.is_empty().await);
    assert!(stored_phones(&dir).await.is_empty());
}

#[tokio::test]
async fn failed_code_request_aborts_and_releases_the_connection() {
    let dir = TempDir::new().unwrap();
    let (pool, factory) = pool_with(dir.path(), &[]);
    let remote = factory.remote("15550005");
    remote.script(|script| script.send_code = Some(RemoteError::other("PHONE_NUMBER_BANNED")));
    let mut flow = OnboardingFlow::new(pool);

    let notice = flow.submit("15550005").await.unwrap();

    assert!(matches!(notice, OnboardingNotice::Aborted(_)));
    assert!(flow.is_finished());
    assert!(!remote.is_connected());
}

#[tokio::test]
async fn explicit_abort_releases_a_pending_sign_in() {
    let dir = TempDir::new().unwrap();
    let (pool, factory) = pool_with(dir.path(), &[]);
    let mut flow = OnboardingFlow::new(pool);
    flow.submit("15550006").await.unwrap();

    assert!(flow.abort().await);
    assert!(!flow.abort().await);

    assert_eq!(flow.step(), OnboardingStep::Aborted);
    assert!(!factory.remote("15550006").is_connected());
}
