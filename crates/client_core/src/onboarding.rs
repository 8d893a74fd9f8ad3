use std::sync::Arc;

use shared::{
    domain::{Phone, SessionCredential},
    error::ValidationError,
    protocol::OnboardingStep,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    pool::SessionPool,
    remote::{RemoteClient, RemoteError, VerificationToken},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OnboardingError {
    /// The input was rejected; the flow stays where it was.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("onboarding already {0:?}")]
    Finished(OnboardingStep),
}

/// What the operator should be told after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnboardingNotice {
    CodeSent(Phone),
    PasswordRequired,
    InvalidCode,
    Committed(Phone),
    Aborted(String),
}

impl OnboardingNotice {
    pub fn message(&self) -> String {
        match self {
            Self::CodeSent(phone) => format!("Code sent to {phone}. Enter the code."),
            Self::PasswordRequired => "Two-step verification is enabled. Enter the password.".into(),
            Self::InvalidCode => "Invalid code. Try again.".into(),
            Self::Committed(phone) => format!("Account {phone} added."),
            Self::Aborted(reason) => format!("Onboarding aborted: {reason}"),
        }
    }
}

struct AuthSession {
    phone: Phone,
    client: Arc<dyn RemoteClient>,
    token: VerificationToken,
}

/// One operator's conversation that turns a phone number into a pooled,
/// authenticated account. Any connection opened along the way is either
/// handed to the pool on commit or released.
pub struct OnboardingFlow {
    pool: Arc<SessionPool>,
    step: OnboardingStep,
    session: Option<AuthSession>,
}

impl OnboardingFlow {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self {
            pool,
            step: OnboardingStep::AwaitingPhone,
            session: None,
        }
    }

    pub fn step(&self) -> OnboardingStep {
        self.step
    }

    pub fn is_finished(&self) -> bool {
        self.step.is_terminal()
    }

    /// Feeds the next operator answer to whichever step is current.
    pub async fn submit(&mut self, input: &str) -> Result<OnboardingNotice, OnboardingError> {
        match self.step {
            OnboardingStep::AwaitingPhone => self.submit_phone(input).await,
            OnboardingStep::AwaitingCode => Ok(self.submit_code(input).await),
            OnboardingStep::AwaitingPassword => Ok(self.submit_password(input).await),
            step => Err(OnboardingError::Finished(step)),
        }
    }

    async fn submit_phone(&mut self, input: &str) -> Result<OnboardingNotice, OnboardingError> {
        let phone = Phone::parse(input)?;
        if self.pool.contains(&phone).await {
            return Err(ValidationError::DuplicatePhone(phone.to_string()).into());
        }

        let client = self.pool.factory().client_for(&phone, None);
        let requested = match client.connect().await {
            Ok(()) => client.send_verification_code(&phone).await,
            Err(error) => Err(error),
        };
        match requested {
            Ok(token) => {
                info!(%phone, "verification code requested");
                self.session = Some(AuthSession {
                    phone: phone.clone(),
                    client,
                    token,
                });
                self.step = OnboardingStep::AwaitingCode;
                Ok(OnboardingNotice::CodeSent(phone))
            }
            Err(error) => {
                release(&phone, client.as_ref()).await;
                Ok(self.fail(format!("could not request a code: {error}")))
            }
        }
    }

    async fn submit_code(&mut self, code: &str) -> OnboardingNotice {
        let Some(session) = &self.session else {
            return self.fail("no pending sign-in".into());
        };

        let result = session
            .client
            .sign_in(&session.phone, &session.token, code.trim())
            .await;
        match result {
            Ok(()) => self.commit().await,
            Err(RemoteError::PasswordRequired) => {
                info!(phone = %session.phone, "password required");
                self.step = OnboardingStep::AwaitingPassword;
                OnboardingNotice::PasswordRequired
            }
            Err(RemoteError::InvalidCode) => {
                warn!(phone = %session.phone, "invalid verification code");
                OnboardingNotice::InvalidCode
            }
            Err(error) => self.abort_with(format!("sign-in failed: {error}")).await,
        }
    }

    async fn submit_password(&mut self, password: &str) -> OnboardingNotice {
        let Some(session) = &self.session else {
            return self.fail("no pending sign-in".into());
        };

        match session.client.check_password(password).await {
            Ok(()) => self.commit().await,
            Err(error) => self.abort_with(format!("password check failed: {error}")).await,
        }
    }

    async fn commit(&mut self) -> OnboardingNotice {
        let Some(session) = self.session.take() else {
            return self.fail("no pending sign-in".into());
        };

        let credential: SessionCredential = match session.client.export_credential().await {
            Ok(credential) => credential,
            Err(error) => {
                release(&session.phone, session.client.as_ref()).await;
                return self.fail(format!("could not export the session: {error}"));
            }
        };

        match self
            .pool
            .commit(session.phone.clone(), credential, Arc::clone(&session.client))
            .await
        {
            Ok(_) => {
                self.step = OnboardingStep::Committed;
                OnboardingNotice::Committed(session.phone)
            }
            Err(error) => {
                release(&session.phone, session.client.as_ref()).await;
                self.fail(error.to_string())
            }
        }
    }

    /// Abandons the conversation. Returns whether a sign-in was pending.
    pub async fn abort(&mut self) -> bool {
        let had_session = match self.session.take() {
            Some(session) => {
                release(&session.phone, session.client.as_ref()).await;
                true
            }
            None => false,
        };
        if !self.step.is_terminal() {
            self.step = OnboardingStep::Aborted;
        }
        had_session
    }

    async fn abort_with(&mut self, reason: String) -> OnboardingNotice {
        self.abort().await;
        self.fail(reason)
    }

    fn fail(&mut self, reason: String) -> OnboardingNotice {
        warn!(%reason, "onboarding aborted");
        self.session = None;
        self.step = OnboardingStep::Aborted;
        OnboardingNotice::Aborted(reason)
    }
}

impl Drop for OnboardingFlow {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                release(&session.phone, session.client.as_ref()).await;
            });
        }
    }
}

async fn release(phone: &Phone, client: &dyn RemoteClient) {
    if let Err(error) = client.disconnect().await {
        warn!(%phone, %error, "releasing onboarding connection failed");
    }
}

#[cfg(test)]
#[path = "tests/onboarding_tests.rs"]
mod tests;
