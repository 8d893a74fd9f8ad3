//! HTTP adapter for a protocol gateway sidecar.
//!
//! The sidecar owns the real protocol sessions; every capability call is a
//! `POST {gateway}/sessions/{phone}/{op}` with a JSON body. Failures come back
//! as a non-2xx status with `{ "error": <code>, "message": <text> }`, and the
//! code selects the [`RemoteError`] variant.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::domain::{Phone, SessionCredential};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::remote::{
    ChatInfo, ChatRef, RemoteClient, RemoteClientFactory, RemoteError, RemoteResult,
    VerificationToken,
};

#[derive(Debug, Serialize)]
struct ConnectRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_credential: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct PhoneRequest<'a> {
    phone: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendCodeResponse {
    verification_token: VerificationToken,
}

#[derive(Debug, Serialize)]
struct SignInRequest<'a> {
    phone: &'a str,
    verification_token: &'a VerificationToken,
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct PasswordRequest<'a> {
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExportResponse {
    session_credential: SessionCredential,
}

#[derive(Debug, Serialize)]
struct InviteRequest<'a> {
    invite_hash: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    chat: &'a str,
}

#[derive(Debug, Serialize)]
struct LeaveRequest<'a> {
    chat: &'a ChatRef,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    target: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct Ack {}

#[derive(Debug, Deserialize)]
struct GatewayError {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct GatewayClientFactory {
    http: Client,
    base_url: Url,
}

impl GatewayClientFactory {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base_url =
            Url::parse(&base_url).with_context(|| format!("invalid gateway url '{base_url}'"))?;
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }
}

impl RemoteClientFactory for GatewayClientFactory {
    fn client_for(
        &self,
        phone: &Phone,
        credential: Option<&SessionCredential>,
    ) -> Arc<dyn RemoteClient> {
        Arc::new(GatewayClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            phone: phone.clone(),
            credential: Mutex::new(credential.cloned()),
            connected: AtomicBool::new(false),
        })
    }
}

pub struct GatewayClient {
    http: Client,
    base_url: Url,
    phone: Phone,
    credential: Mutex<Option<SessionCredential>>,
    connected: AtomicBool,
}

impl GatewayClient {
    async fn call<B, R>(&self, op: &str, body: &B) -> RemoteResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(&format!("sessions/{}/{op}", self.phone))
            .map_err(|err| RemoteError::other(format!("invalid gateway path: {err}")))?;
        debug!(phone = %self.phone, op, "gateway call");

        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| self.transport_error(op, err))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|err| RemoteError::other(format!("{op}: malformed gateway reply: {err}")));
        }

        let raw = response.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<GatewayError>(&raw) {
            Ok(error) => {
                let message = if error.message.is_empty() {
                    format!("{op}: {}", error.error)
                } else {
                    format!("{op}: {}", error.message)
                };
                RemoteError::from_code(&error.error, message)
            }
            Err(_) => RemoteError::other(format!("{op}: gateway returned {status}")),
        })
    }

    fn transport_error(&self, op: &str, err: reqwest::Error) -> RemoteError {
        if err.is_connect() {
            self.connected.store(false, Ordering::SeqCst);
        }
        RemoteError::other(format!("{op}: {err}"))
    }
}

#[async_trait]
impl RemoteClient for GatewayClient {
    async fn connect(&self) -> RemoteResult<()> {
        let credential = self.credential.lock().await.clone();
        let request = ConnectRequest {
            session_credential: credential.as_ref().map(SessionCredential::expose),
        };
        let _: Ack = self.call("connect", &request).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> RemoteResult<()> {
        let result: RemoteResult<Ack> = self.call("disconnect", &serde_json::json!({})).await;
        self.connected.store(false, Ordering::SeqCst);
        result.map(|_| ())
    }

    async fn send_verification_code(&self, phone: &Phone) -> RemoteResult<VerificationToken> {
        let response: SendCodeResponse = self
            .call(
                "send_code",
                &PhoneRequest {
                    phone: phone.as_str(),
                },
            )
            .await?;
        Ok(response.verification_token)
    }

    async fn sign_in(
        &self,
        phone: &Phone,
        token: &VerificationToken,
        code: &str,
    ) -> RemoteResult<()> {
        let _: Ack = self
            .call(
                "sign_in",
                &SignInRequest {
                    phone: phone.as_str(),
                    verification_token: token,
                    code,
                },
            )
            .await?;
        Ok(())
    }

    async fn check_password(&self, password: &str) -> RemoteResult<()> {
        let _: Ack = self
            .call("check_password", &PasswordRequest { password })
            .await?;
        Ok(())
    }

    async fn export_credential(&self) -> RemoteResult<SessionCredential> {
        let response: ExportResponse = self
            .call("export_credential", &serde_json::json!({}))
            .await?;
        *self.credential.lock().await = Some(response.session_credential.clone());
        Ok(response.session_credential)
    }

    async fn join_by_invite(&self, hash: &str) -> RemoteResult<ChatInfo> {
        self.call("join_by_invite", &InviteRequest { invite_hash: hash })
            .await
    }

    async fn join_by_identifier(&self, name: &str) -> RemoteResult<ChatInfo> {
        self.call("join", &ChatRequest { chat: name }).await
    }

    async fn leave(&self, chat: &ChatRef) -> RemoteResult<()> {
        let _: Ack = self.call("leave", &LeaveRequest { chat }).await?;
        Ok(())
    }

    async fn get_chat(&self, name: &str) -> RemoteResult<ChatInfo> {
        self.call("get_chat", &ChatRequest { chat: name }).await
    }

    async fn send_message(&self, target: &str, text: &str) -> RemoteResult<()> {
        let _: Ack = self
            .call("send_message", &SendMessageRequest { target, text })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
