//! MTProto client wrapper.
//!
//! Manages the grammers client lifecycle and session persistence, runs the
//! login flow with code/password hooks, and downloads media by (chat id,
//! message id) streaming to disk.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use grammers_client::types::Chat;
use grammers_client::{Client, Config, InitParams, SignInError};
use grammers_session::Session;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Log a progress line roughly every this many bytes.
const PROGRESS_LOG_BYTES: u64 = 8 * 1024 * 1024;

/// Hooks for interactive authentication steps.
///
/// The worker wires these to the store so the administrator can submit the
/// code and password through the bot.
#[async_trait]
pub trait AuthHooks: Send + Sync {
    /// Return the login code once the administrator submitted it.
    async fn request_code(&self) -> Result<String>;

    /// Return the 2FA password once available.
    async fn request_password(&self) -> Result<String>;
}

/// MTProto transport configuration (plain data).
#[derive(Debug, Clone)]
pub struct MtConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub phone_number: String,
    pub session_path: PathBuf,
}

/// Thin wrapper around the grammers client.
pub struct MtClient {
    client: Client,
    config: MtConfig,
}

impl MtClient {
    /// Connect using the persisted session (created when missing).
    pub async fn connect(config: MtConfig) -> Result<Self> {
        let session = Session::load_file_or_create(&config.session_path)
            .with_context(|| format!("load session {}", config.session_path.display()))?;
        let client = Client::connect(Config {
            session,
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .context("connect to Telegram")?;

        Ok(Self { client, config })
    }

    pub async fn is_authorized(&self) -> Result<bool> {
        Ok(self.client.is_authorized().await?)
    }

    /// Run the interactive login flow via the provided hooks.
    pub async fn sign_in(&self, hooks: &dyn AuthHooks) -> Result<()> {
        let token = self
            .client
            .request_login_code(&self.config.phone_number)
            .await
            .context("request login code")?;
        info!("Login code requested for {}", self.config.phone_number);

        let code = hooks.request_code().await?;
        match self.client.sign_in(&token, &code).await {
            Ok(_) => {}
            Err(SignInError::PasswordRequired(password_token)) => {
                info!("2FA password required");
                let password = hooks.request_password().await?;
                self.client
                    .check_password(password_token, password)
                    .await
                    .map_err(|e| anyhow!("2FA check failed: {e}"))?;
            }
            Err(e) => bail!("sign in failed: {e}"),
        }

        self.save_session()?;
        let me = self.client.get_me().await?;
        info!(
            "MTProto client started as {}",
            me.username().unwrap_or("<no username>")
        );
        Ok(())
    }

    /// Persist the session so restarts skip the login flow.
    pub fn save_session(&self) -> Result<()> {
        self.client
            .session()
            .save_to_file(&self.config.session_path)
            .with_context(|| format!("save session {}", self.config.session_path.display()))?;
        Ok(())
    }

    /// Session health probe.
    pub async fn healthy(&self) -> bool {
        self.client.get_me().await.is_ok()
    }

    /// Download the media of one message to `dest`, returning the byte count.
    pub async fn fetch_to_file(&self, chat_id: i64, message_id: i64, dest: &Path) -> Result<u64> {
        let chat = self
            .resolve_chat(chat_id)
            .await?
            .ok_or_else(|| anyhow!("chat {chat_id} not found in dialogs"))?;

        let messages = self
            .client
            .get_messages_by_id(&chat, &[message_id as i32])
            .await
            .context("fetch message by id")?;
        let message = messages
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| anyhow!("message {message_id} not found in chat {chat_id}"))?;
        let media = message
            .media()
            .ok_or_else(|| anyhow!("message {message_id} has no media content"))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let downloadable = grammers_client::types::Downloadable::Media(media);
        let mut download = self.client.iter_download(&downloadable);
        let mut written: u64 = 0;
        let mut next_progress = PROGRESS_LOG_BYTES;
        while let Some(chunk) = download.next().await.context("download chunk")? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if written >= next_progress {
                info!("download progress: {written} bytes for message {message_id}");
                next_progress += PROGRESS_LOG_BYTES;
            }
        }
        file.flush().await?;

        if written == 0 {
            warn!("message {message_id} produced an empty download");
        }
        Ok(written)
    }

    async fn resolve_chat(&self, chat_id: i64) -> Result<Option<Chat>> {
        let mut dialogs = self.client.iter_dialogs();
        while let Some(dialog) = dialogs.next().await.context("iterate dialogs")? {
            if dialog.chat().id() == chat_id {
                return Ok(Some(dialog.chat().clone()));
            }
        }
        Ok(None)
    }
}
