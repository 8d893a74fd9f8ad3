use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::{ChatId, MassAction, OperationKind, OperatorId, Phone, TargetLink},
    error::ValidationError,
};

/// Parses `<number>` (seconds) or `<number>` followed by `h`, `m` or `s`.
pub fn parse_duration(raw: &str) -> Result<Duration, ValidationError> {
    let period = raw.trim().to_ascii_lowercase();
    let (number, multiplier) = if let Some(value) = period.strip_suffix('h') {
        (value, 3600.0)
    } else if let Some(value) = period.strip_suffix('m') {
        (value, 60.0)
    } else if let Some(value) = period.strip_suffix('s') {
        (value, 1.0)
    } else {
        (period.as_str(), 1.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| ValidationError::InvalidDuration(raw.trim().to_string()))?;
    if !value.is_finite() {
        return Err(ValidationError::InvalidDuration(raw.trim().to_string()));
    }
    let seconds = value * multiplier;
    if seconds <= 0.0 {
        return Err(ValidationError::NonPositiveDuration(raw.trim().to_string()));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| ValidationError::InvalidDuration(raw.trim().to_string()))
}

pub fn parse_count(raw: &str) -> Result<usize, ValidationError> {
    match raw.trim().parse::<usize>() {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(ValidationError::InvalidCount(raw.trim().to_string())),
    }
}

/// Count as typed: front ends send either a JSON number or free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CountInput {
    Number(i64),
    Text(String),
}

impl CountInput {
    pub fn parse(&self) -> Result<usize, ValidationError> {
        match self {
            Self::Number(value) => usize::try_from(*value)
                .ok()
                .filter(|count| *count > 0)
                .ok_or_else(|| ValidationError::InvalidCount(value.to_string())),
            Self::Text(text) => parse_count(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MassActionRequest {
    pub action: MassAction,
    pub link: TargetLink,
    pub count: usize,
    pub duration: Duration,
}

impl MassActionRequest {
    pub fn from_input(
        action: MassAction,
        link: &str,
        count: &CountInput,
        duration: &str,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            action,
            link: TargetLink::parse(link)?,
            count: count.parse()?,
            duration: parse_duration(duration)?,
        })
    }

    /// `min(count, pool_size)` accounts, paced evenly across the duration.
    pub fn plan(&self, pool_size: usize) -> RunPlan {
        let actual_count = self.count.min(pool_size);
        let interval = if actual_count == 0 {
            Duration::ZERO
        } else {
            self.duration.div_f64(actual_count as f64)
        };
        RunPlan {
            actual_count,
            interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    pub actual_count: usize,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastRequest {
    pub text: String,
    pub target: String,
    pub interval: Duration,
}

impl BroadcastRequest {
    pub fn new(text: &str, target: &str) -> Result<Self, ValidationError> {
        if text.trim().is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let target = target.trim();
        if target.is_empty() {
            return Err(ValidationError::EmptyTarget);
        }
        Ok(Self {
            text: text.to_string(),
            target: target.to_string(),
            interval: Duration::ZERO,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Delimited confirmation payload round-tripped through a front-end button:
/// `mass_action|<action>|<count>|<duration>|<link>` or `broadcast|<target>`.
/// The link is last so it may itself contain `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationToken {
    MassAction {
        action: MassAction,
        count: usize,
        duration: String,
        link: String,
    },
    Broadcast {
        target: String,
    },
}

impl FromStr for ConfirmationToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('|').collect();
        match parts.as_slice() {
            ["mass_action", action, count, duration, link @ ..] if !link.is_empty() => {
                Ok(Self::MassAction {
                    action: action.parse()?,
                    count: parse_count(count)?,
                    duration: duration.to_string(),
                    link: link.join("|"),
                })
            }
            ["broadcast", target @ ..] if !target.is_empty() => Ok(Self::Broadcast {
                target: target.join("|"),
            }),
            _ => Err(ValidationError::MalformedToken),
        }
    }
}

impl fmt::Display for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MassAction {
                action,
                count,
                duration,
                link,
            } => write!(f, "mass_action|{action}|{count}|{duration}|{link}"),
            Self::Broadcast { target } => write!(f, "broadcast|{target}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Next free-text answer in the operator's onboarding conversation.
    Onboarding {
        input: String,
    },
    /// Abandon the operator's onboarding conversation.
    Cancel,
    MassAction {
        action: MassAction,
        link: String,
        count: CountInput,
        duration: String,
    },
    Broadcast {
        text: String,
        target: String,
    },
    Confirm {
        token: String,
        #[serde(default)]
        text: Option<String>,
    },
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    AwaitingPhone,
    AwaitingCode,
    AwaitingPassword,
    Committed,
    Aborted,
}

impl OnboardingStep {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlReply {
    Onboarding {
        step: OnboardingStep,
        message: String,
    },
    OnboardingCancelled {
        had_session: bool,
    },
    Launched {
        operation_id: Uuid,
        kind: OperationKind,
        accounts: usize,
        interval_ms: u64,
    },
    StopRequested {
        active: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub operation_id: Uuid,
    pub processed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub target: String,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OperationEvent {
    Started {
        operation_id: Uuid,
        kind: OperationKind,
        target: String,
        accounts: usize,
        interval_ms: u64,
    },
    Progress(ProgressSnapshot),
    /// Final output of a stopped run; no `Finished` follows it.
    Cancelled {
        operation_id: Uuid,
        processed: usize,
    },
    Finished(OperationSummary),
    Rejected {
        kind: OperationKind,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorEvent {
    pub operator_id: OperatorId,
    pub event: OperationEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatus {
    pub operation_id: Uuid,
    pub kind: OperationKind,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    pub phone: Phone,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipLabel {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub chat_id: ChatId,
}

impl fmt::Display for MembershipLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.username {
            Some(username) => write!(f, "{} (@{username})", self.title),
            None => write!(f, "{} (ID: {})", self.title, self.chat_id),
        }
    }
}

/// Per-phone subscription overview: the first few memberships plus how many
/// more the ledger holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub phone: Phone,
    pub shown: Vec<MembershipLabel>,
    pub hidden: usize,
}

impl fmt::Display for SubscriptionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shown.is_empty() {
            return write!(f, "{} -> -", self.phone);
        }
        let labels = self
            .shown
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} -> {labels}", self.phone)?;
        if self.hidden > 0 {
            write!(f, " ... (+{})", self.hidden)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
