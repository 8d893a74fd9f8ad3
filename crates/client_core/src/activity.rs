use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    pool::{AccountSession, SessionPool},
    remote::SELF_TARGET,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySettings {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Text of the idle message each account sends to itself.
    pub marker: String,
}

impl Default for ActivitySettings {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(300),
            marker: "💭".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// The idle action went through on the existing connection.
    Active,
    /// The handle was dead and a reconnect brought it back.
    Recovered,
    Unreachable,
}

/// Background loop that periodically pokes one random account so dead
/// connections are noticed and repaired outside of operator runs.
pub struct ActivitySimulator {
    pool: Arc<SessionPool>,
    settings: ActivitySettings,
}

impl ActivitySimulator {
    pub fn new(pool: Arc<SessionPool>, settings: ActivitySettings) -> Self {
        Self { pool, settings }
    }

    pub fn settings(&self) -> &ActivitySettings {
        &self.settings
    }

    /// Uniform in `[min_delay, max_delay]`.
    pub fn next_delay(&self) -> Duration {
        let min = self.settings.min_delay;
        let max = self.settings.max_delay.max(min);
        if min == max {
            return min;
        }
        let millis = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
        Duration::from_millis(millis as u64)
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Runs until `shutdown` fires. Account failures stay inside one cycle.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            min_secs = self.settings.min_delay.as_secs(),
            max_secs = self.settings.max_delay.as_secs(),
            "activity simulator started"
        );
        loop {
            let delay = self.next_delay();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.tick().await;
        }
        info!("activity simulator stopped");
    }

    /// One cycle against a randomly chosen account; `None` on an empty pool.
    pub async fn tick(&self) -> Option<ActivityOutcome> {
        let accounts = self.pool.accounts().await;
        if accounts.is_empty() {
            debug!("activity tick skipped, pool is empty");
            return None;
        }
        let index = rand::thread_rng().gen_range(0..accounts.len());
        Some(self.exercise(&accounts[index]).await)
    }

    pub async fn exercise(&self, account: &AccountSession) -> ActivityOutcome {
        let phone = account.phone();
        let mut recovered = false;

        if let Err(error) = account.ensure_connected().await {
            warn!(%phone, %error, "idle connect failed, reconnecting");
            if let Err(error) = account.reconnect().await {
                warn!(%phone, %error, "idle reconnect failed");
                return ActivityOutcome::Unreachable;
            }
            recovered = true;
        }

        let sent = account
            .client()
            .send_message(SELF_TARGET, &self.settings.marker)
            .await;
        match sent {
            Ok(()) if recovered => ActivityOutcome::Recovered,
            Ok(()) => {
                debug!(%phone, "idle action sent");
                ActivityOutcome::Active
            }
            Err(error) => {
                warn!(%phone, %error, "idle action failed, reconnecting");
                match account.reconnect().await {
                    Ok(()) => ActivityOutcome::Recovered,
                    Err(error) => {
                        warn!(%phone, %error, "idle reconnect failed");
                        ActivityOutcome::Unreachable
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/activity_tests.rs"]
mod tests;
