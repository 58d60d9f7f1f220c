//! Session-health monitoring and interactive re-authentication.
//!
//! The monitor probes the transport on a fixed cadence. On failure it
//! notifies the administrators, then arbitrates the login flow by polling
//! the store for a freshly-submitted code (single-use) and, when demanded,
//! the 2FA password (persistent). After too many consecutive failures the
//! worker degrades to simulate mode.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use teltubby_db::ArchiveDb;
use teltubby_protocol::defaults::{
    CODE_FRESHNESS_SECONDS, PASSWORD_FRESHNESS_SECONDS, SECRET_CODE_KEY, SECRET_PASSWORD_KEY,
    SECRET_POLL_INTERVAL_SECONDS,
};
use teltubby_protocol::format_iso;

use crate::mtproto::AuthHooks;
use crate::notify::Notifier;
use crate::runner::TransportState;
use teltubby_protocol::{StatusFile, WorkerState, WorkerStatus};

/// Auth hooks backed by the store's `auth_secrets` table.
pub struct StoreAuthHooks {
    db: ArchiveDb,
}

impl StoreAuthHooks {
    pub fn new(db: ArchiveDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuthHooks for StoreAuthHooks {
    async fn request_code(&self) -> Result<String> {
        loop {
            let min_ts = format_iso(Utc::now() - chrono::Duration::seconds(CODE_FRESHNESS_SECONDS));
            if let Some((code, _)) = self.db.get_secret_since(SECRET_CODE_KEY, &min_ts).await? {
                // Codes are single-use: consume on read.
                self.db.delete_secret(SECRET_CODE_KEY).await?;
                return Ok(code);
            }
            tokio::time::sleep(Duration::from_secs(SECRET_POLL_INTERVAL_SECONDS)).await;
        }
    }

    async fn request_password(&self) -> Result<String> {
        loop {
            let min_ts =
                format_iso(Utc::now() - chrono::Duration::seconds(PASSWORD_FRESHNESS_SECONDS));
            if let Some((password, _)) =
                self.db.get_secret_since(SECRET_PASSWORD_KEY, &min_ts).await?
            {
                // Passwords persist across re-logins; never consumed here.
                return Ok(password);
            }
            tokio::time::sleep(Duration::from_secs(SECRET_POLL_INTERVAL_SECONDS)).await;
        }
    }
}

/// Periodic session-health monitor.
pub struct SessionMonitor {
    pub db: ArchiveDb,
    pub notifier: Notifier,
    pub transport: Arc<Mutex<TransportState>>,
    pub status: StatusFile,
    pub probe_interval: Duration,
    pub max_failures: u32,
}

impl SessionMonitor {
    /// Run forever; exits only when the task is aborted.
    pub async fn run(self) {
        let mut consecutive_failures: u32 = 0;
        info!("MTProto session monitoring started");

        loop {
            tokio::time::sleep(self.probe_interval).await;

            let healthy = {
                let state = self.transport.lock().await;
                match (&state.client, state.simulate) {
                    (_, true) | (None, _) => continue,
                    (Some(client), false) => client.healthy().await,
                }
            };
            if healthy {
                consecutive_failures = 0;
                continue;
            }

            warn!("MTProto session unhealthy; starting recovery");
            self.notifier
                .admins(
                    "MTProto session expired. Submit the verification code sent by Telegram with /mtcode <code>.",
                )
                .await;
            self.write_state(WorkerState::Authenticating).await;

            match self.attempt_relogin().await {
                Ok(()) => {
                    consecutive_failures = 0;
                    self.notifier
                        .admins("MTProto session restored. Large-file processing resumed.")
                        .await;
                    self.write_state(WorkerState::Healthy).await;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        "MTProto recovery failed ({consecutive_failures}/{}): {e}",
                        self.max_failures
                    );
                    if consecutive_failures >= self.max_failures {
                        self.notifier
                            .admins(
                                "CRITICAL: MTProto recovery failed repeatedly; worker switched to simulate mode. Large files will NOT be archived.",
                            )
                            .await;
                        let mut state = self.transport.lock().await;
                        state.simulate = true;
                        drop(state);
                        self.write_state(WorkerState::Simulate).await;
                    }
                }
            }
        }
    }

    async fn attempt_relogin(&self) -> Result<()> {
        let hooks = StoreAuthHooks::new(self.db.clone());
        let state = self.transport.lock().await;
        let Some(client) = &state.client else {
            anyhow::bail!("no transport client to recover");
        };
        client.sign_in(&hooks).await
    }

    async fn write_state(&self, worker_state: WorkerState) {
        let mut status = self
            .status
            .read_current()
            .unwrap_or_else(WorkerStatus::starting);
        status.state = worker_state;
        status.authorized = worker_state == WorkerState::Healthy;
        self.status.write(&status);
    }
}
