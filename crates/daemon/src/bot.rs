use std::path::PathBuf;
use std::time::Duration;

use teleshare_core::config::TelegramSettings;
use teleshare_core::{
    InboundFile, Result, ShareConnector, TransferEngine, TransferOutcome, TransferRequest,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::telegram::{BotApi, Message};

const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const NOT_AUTHORIZED: &str = "Sorry, you are not authorized to use this bot.";
const NO_FILES: &str = "I didn't find any files to back up in this message. \
Please send me a file directly or forward a message containing a file.";
const HELP: &str = "I can help you back up files to your SMB server.\n\n\
Just send me any file, document, photo, video, or forward a message \
containing files, and I'll back them up automatically.\n\n\
Available commands:\n\
/start - Start the bot\n\
/help - Show this help message\n\
/status - Check the bot and SMB connection status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Status,
}

impl Command {
    /// `/status` and `/status@SomeBot` both parse; unknown commands do not.
    fn parse(text: &str) -> Option<Self> {
        let word = text.strip_prefix('/')?.split_whitespace().next()?;
        let name = word.split('@').next().unwrap_or(word);
        match name {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    Refuse,
    Command(Command),
    File(InboundFile),
    NoFiles,
    Ignore,
}

/// Decides what a message asks for. Plain chatter is ignored silently, even
/// from strangers; anything addressed to the bot from a stranger is refused.
pub fn classify(message: &Message, authorized_user_id: Option<i64>) -> Incoming {
    let Some(from) = &message.from else {
        return Incoming::Ignore;
    };
    let allowed = is_authorized(from.id, authorized_user_id);

    if let Some(text) = message.text.as_deref().filter(|t| t.starts_with('/')) {
        return match Command::parse(text) {
            Some(_) if !allowed => Incoming::Refuse,
            Some(command) => Incoming::Command(command),
            None => Incoming::Ignore,
        };
    }

    match message.inbound_file() {
        Some(_) if !allowed => Incoming::Refuse,
        Some(file) => Incoming::File(file),
        None if message.is_forwarded() && !allowed => Incoming::Refuse,
        None if allowed && (message.caption.is_some() || message.is_forwarded()) => {
            Incoming::NoFiles
        }
        None => Incoming::Ignore,
    }
}

fn is_authorized(user_id: i64, authorized_user_id: Option<i64>) -> bool {
    match authorized_user_id {
        Some(id) => id == user_id,
        None => {
            error!(
                event = "bot.no_authorized_user",
                user_id, "bot.no_authorized_user"
            );
            false
        }
    }
}

pub struct Bot<C> {
    api: BotApi,
    engine: TransferEngine<C>,
    authorized_user_id: Option<i64>,
    poll_timeout_secs: u32,
    download_dir: Option<PathBuf>,
}

impl<C: ShareConnector> Bot<C> {
    pub fn new(api: BotApi, engine: TransferEngine<C>, telegram: &TelegramSettings) -> Self {
        Self {
            api,
            engine,
            authorized_user_id: telegram.authorized_user_id,
            poll_timeout_secs: telegram.poll_timeout_secs,
            download_dir: telegram.download_dir.clone(),
        }
    }

    /// Long-polls for updates and handles them one at a time until
    /// `shutdown` fires. A message in progress is finished first.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut offset = None;
        loop {
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self.api.get_updates(offset, self.poll_timeout_secs) => polled,
            };
            let updates = match polled {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(event = "bot.poll_failed", error = %e, "bot.poll_failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => continue,
                    }
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);
                if let Some(message) = update.message {
                    self.handle_message(&message).await;
                }
            }
        }
        info!(event = "bot.stopped", "bot.stopped");
    }

    async fn handle_message(&self, message: &Message) {
        let user_id = message.from.as_ref().map(|u| u.id);
        let incoming = classify(message, self.authorized_user_id);
        debug!(
            event = "bot.message",
            message_id = message.message_id,
            user_id = ?user_id,
            action = ?incoming,
            "bot.message"
        );

        let result = match incoming {
            Incoming::Ignore => Ok(()),
            Incoming::Refuse => {
                warn!(event = "bot.unauthorized", user_id = ?user_id, "bot.unauthorized");
                self.reply(message, NOT_AUTHORIZED).await
            }
            Incoming::NoFiles => self.reply(message, NO_FILES).await,
            Incoming::Command(command) => self.command(message, command).await,
            Incoming::File(file) => self.process_file(message, &file).await,
        };
        if let Err(e) = result {
            error!(
                event = "bot.handle_failed",
                message_id = message.message_id,
                error = %e,
                "bot.handle_failed"
            );
        }
    }

    async fn command(&self, message: &Message, command: Command) -> Result<()> {
        let text = match command {
            Command::Start => {
                let name = message
                    .from
                    .as_ref()
                    .map(|u| u.first_name.as_str())
                    .unwrap_or_default();
                format!("Hi {name}! I'm your backup bot. Use /help to see available commands.")
            }
            Command::Help => HELP.to_string(),
            Command::Status => self.status_text().await,
        };
        self.reply(message, &text).await
    }

    async fn status_text(&self) -> String {
        let sessions = self.engine.sessions();
        if sessions.check().await {
            let config = sessions.config();
            format!(
                "✅ Bot is operational\n✅ SMB connection successful\nServer: {}\nShare: {}\nBackup directory: {}",
                config.server(),
                config.share(),
                config.backup_directory()
            )
        } else {
            "✅ Bot is operational\n❌ SMB connection failed\nPlease check your SMB server settings."
                .to_string()
        }
    }

    async fn process_file(&self, message: &Message, file: &InboundFile) -> Result<()> {
        let name = &file.suggested_name;
        let status = self
            .api
            .send_message(
                message.chat.id,
                &format!("Processing {name}..."),
                Some(message.message_id),
            )
            .await?;

        let text = match self.backup(message.chat.id, status.message_id, file).await {
            Ok(outcome) => match (outcome.success, outcome.remote_path) {
                (true, Some(path)) => format!("✅ Successfully backed up {name} to {path}"),
                _ => format!("❌ Failed to back up {name}"),
            },
            Err(e) => {
                error!(
                    event = "bot.file_failed",
                    filename = %name,
                    error = %e,
                    "bot.file_failed"
                );
                format!("Error processing file: {e}")
            }
        };
        self.api
            .edit_message_text(message.chat.id, status.message_id, &text)
            .await
    }

    /// Downloads into a temporary file that is removed when this returns,
    /// whatever the outcome.
    async fn backup(
        &self,
        chat_id: i64,
        status_message_id: i64,
        file: &InboundFile,
    ) -> Result<TransferOutcome> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("teleshare-");
        let temp = match &self.download_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let mut dest = tokio::fs::File::from_std(temp.reopen()?);
        let bytes = self.api.download(&file.file_id, &mut dest).await?;
        drop(dest);
        info!(
            event = "bot.downloaded",
            filename = %file.suggested_name,
            bytes,
            "bot.downloaded"
        );

        self.api
            .edit_message_text(
                chat_id,
                status_message_id,
                &format!("Backing up {}...", file.suggested_name),
            )
            .await?;

        let request = TransferRequest::new(temp.path(), file.suggested_name.as_str())?;
        Ok(self.engine.backup(&request).await)
    }

    async fn reply(&self, message: &Message, text: &str) -> Result<()> {
        self.api
            .send_message(message.chat.id, text, Some(message.message_id))
            .await?;
        Ok(())
    }
}
