use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use shared::{
    domain::{ChatId, Phone, SessionCredential},
    protocol::OperationEvent,
};
use storage::{CredentialStore, StoredAccount, SubscriptionLedger};
use tokio::sync::mpsc;

use crate::{
    pool::SessionPool,
    remote::{
        ChatInfo, ChatRef, RemoteClient, RemoteClientFactory, RemoteError, RemoteResult,
        VerificationToken,
    },
};

pub(crate) fn phone(raw: &str) -> Phone {
    Phone::parse(raw).expect("valid test phone")
}

pub(crate) fn chat(id: i64, title: &str) -> ChatInfo {
    ChatInfo {
        id: ChatId(id),
        title: Some(title.to_string()),
        username: None,
    }
}

/// Canned answers for one scripted account. Unset fields succeed.
pub(crate) struct Script {
    pub connect_failures: usize,
    pub send_code: Option<RemoteError>,
    pub sign_in: VecDeque<RemoteResult<()>>,
    pub password: Option<RemoteError>,
    pub join: Option<RemoteError>,
    pub chat: ChatInfo,
    pub get_chat: Option<RemoteError>,
    pub leave: Option<RemoteError>,
    pub send_failures: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect_failures: 0,
            send_code: None,
            sign_in: VecDeque::new(),
            password: None,
            join: None,
            chat: chat(1001, "Test Chat"),
            get_chat: None,
            leave: None,
            send_failures: 0,
        }
    }
}

type CallHook = Box<dyn Fn(&str) + Send + Sync>;

/// In-memory stand-in for one account's protocol client. Every call is
/// journaled as `op` or `op:arg`.
pub(crate) struct ScriptedRemote {
    phone: String,
    connected: AtomicBool,
    credential: Mutex<Option<String>>,
    script: Mutex<Script>,
    calls: Mutex<Vec<String>>,
    hook: Mutex<Option<CallHook>>,
}

impl ScriptedRemote {
    pub(crate) fn new(phone: &str) -> Self {
        Self {
            phone: phone.to_string(),
            connected: AtomicBool::new(false),
            credential: Mutex::new(None),
            script: Mutex::new(Script::default()),
            calls: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
        }
    }

    pub(crate) fn script(&self, edit: impl FnOnce(&mut Script)) {
        edit(&mut self.script.lock().unwrap());
    }

    /// Runs `hook` after every journaled call.
    pub(crate) fn on_call(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(':').next() == Some(op))
            .count()
    }

    pub(crate) fn credential(&self) -> Option<String> {
        self.credential.lock().unwrap().clone()
    }

    /// Pretends the connection died without the handle noticing.
    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call.clone());
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(&call);
        }
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn connect(&self) -> RemoteResult<()> {
        self.record("connect".into());
        let mut script = self.script.lock().unwrap();
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            return Err(RemoteError::other("connection refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> RemoteResult<()> {
        self.record("disconnect".into());
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_verification_code(&self, phone: &Phone) -> RemoteResult<VerificationToken> {
        self.record(format!("send_code:{phone}"));
        match self.script.lock().unwrap().send_code.clone() {
            Some(error) => Err(error),
            None => Ok(VerificationToken(format!("token-{phone}"))),
        }
    }

    async fn sign_in(
        &self,
        _phone: &Phone,
        token: &VerificationToken,
        code: &str,
    ) -> RemoteResult<()> {
        self.record(format!("sign_in:{}:{code}", token.0));
        self.script
            .lock()
            .unwrap()
            .sign_in
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn check_password(&self, password: &str) -> RemoteResult<()> {
        self.record(format!("check_password:{password}"));
        match self.script.lock().unwrap().password.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn export_credential(&self) -> RemoteResult<SessionCredential> {
        self.record("export".into());
        let value = format!("session-{}", self.phone);
        *self.credential.lock().unwrap() = Some(value.clone());
        Ok(SessionCredential::new(value))
    }

    async fn join_by_invite(&self, hash: &str) -> RemoteResult<ChatInfo> {
        self.record(format!("join_invite:{hash}"));
        let script = self.script.lock().unwrap();
        match script.join.clone() {
            Some(error) => Err(error),
            None => Ok(script.chat.clone()),
        }
    }

    async fn join_by_identifier(&self, name: &str) -> RemoteResult<ChatInfo> {
        self.record(format!("join:{name}"));
        let script = self.script.lock().unwrap();
        match script.join.clone() {
            Some(error) => Err(error),
            None => Ok(script.chat.clone()),
        }
    }

    async fn leave(&self, chat: &ChatRef) -> RemoteResult<()> {
        self.record(format!("leave:{chat}"));
        match self.script.lock().unwrap().leave.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn get_chat(&self, name: &str) -> RemoteResult<ChatInfo> {
        self.record(format!("get_chat:{name}"));
        let script = self.script.lock().unwrap();
        match script.get_chat.clone() {
            Some(error) => Err(error),
            None => Ok(script.chat.clone()),
        }
    }

    async fn send_message(&self, target: &str, text: &str) -> RemoteResult<()> {
        self.record(format!("send:{target}:{text}"));
        let mut script = self.script.lock().unwrap();
        if script.send_failures > 0 {
            script.send_failures -= 1;
            return Err(RemoteError::other("connection reset"));
        }
        Ok(())
    }
}

/// Hands out one shared [`ScriptedRemote`] per phone.
#[derive(Default)]
pub(crate) struct ScriptedFactory {
    remotes: Mutex<HashMap<String, Arc<ScriptedRemote>>>,
}

impl ScriptedFactory {
    pub(crate) fn remote(&self, phone: &str) -> Arc<ScriptedRemote> {
        let phone = self::phone(phone).to_string();
        Arc::clone(
            self.remotes
                .lock()
                .unwrap()
                .entry(phone.clone())
                .or_insert_with(|| Arc::new(ScriptedRemote::new(&phone))),
        )
    }
}

impl RemoteClientFactory for ScriptedFactory {
    fn client_for(
        &self,
        phone: &Phone,
        credential: Option<&SessionCredential>,
    ) -> Arc<dyn RemoteClient> {
        let remote = self.remote(phone.as_str());
        if let Some(credential) = credential {
            *remote.credential.lock().unwrap() = Some(credential.expose().to_string());
        }
        remote
    }
}

pub(crate) fn credentials_with(path: &Path, phones: &[&str]) -> CredentialStore {
    let mut store = CredentialStore::empty(path);
    for raw in phones {
        store.insert(StoredAccount {
            phone: phone(raw),
            session_credential: SessionCredential::new(format!("stored-{raw}")),
        });
    }
    store
}

pub(crate) fn pool_with(dir: &Path, phones: &[&str]) -> (Arc<SessionPool>, Arc<ScriptedFactory>) {
    let factory = Arc::new(ScriptedFactory::default());
    let credentials = credentials_with(&dir.join("accounts.json"), phones);
    let pool = SessionPool::new(credentials, Arc::clone(&factory) as Arc<dyn RemoteClientFactory>);
    (Arc::new(pool), factory)
}

pub(crate) async fn ledger_in(dir: &Path) -> Arc<SubscriptionLedger> {
    Arc::new(SubscriptionLedger::load(dir.join("subscriptions.json")).await)
}

pub(crate) fn event_channel() -> (
    mpsc::UnboundedSender<OperationEvent>,
    mpsc::UnboundedReceiver<OperationEvent>,
) {
    mpsc::unbounded_channel()
}

pub(crate) fn drain(receiver: &mut mpsc::UnboundedReceiver<OperationEvent>) -> Vec<OperationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
