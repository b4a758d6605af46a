use teleshare_core::config::{load_settings, resolve_config_dir};
use teleshare_core::{
    SessionManager, SmbConnector, TransferEngine, TransferOptions, init_logging,
};
use tokio_util::sync::CancellationToken;

mod bot;
mod telegram;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_root = resolve_config_dir(None);
    let mut settings = load_settings(&config_root)?;
    settings.apply_env()?;
    init_logging(settings.logging.format);

    let Some(bot_token) = settings
        .telegram
        .bot_token
        .clone()
        .filter(|t| !t.trim().is_empty())
    else {
        tracing::error!(event = "bot.missing_token", "bot.missing_token");
        return Err("no bot token found; set TELEGRAM_BOT_TOKEN".into());
    };
    let share = settings.remote_share_config()?;

    match settings.telegram.authorized_user_id {
        Some(user_id) => tracing::info!(
            event = "bot.authorized_user",
            user_id,
            "bot.authorized_user"
        ),
        None => tracing::warn!(
            event = "bot.no_authorized_user",
            "bot.no_authorized_user"
        ),
    }
    tracing::info!(
        event = "bot.starting",
        config_dir = %config_root.display(),
        server = %share.server(),
        share = %share.share(),
        backup_directory = %share.backup_directory(),
        "bot.starting"
    );

    let engine = TransferEngine::new(
        SessionManager::new(share, SmbConnector),
        TransferOptions {
            on_probe_failure: settings.transfer.on_probe_failure,
            now: None,
        },
    );
    let api = telegram::BotApi::new(&settings.telegram.api_base, &bot_token);
    let bot = bot::Bot::new(api, engine, &settings.telegram);

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(event = "bot.signal_failed", error = %e, "bot.signal_failed");
            return;
        }
        tracing::info!(event = "bot.shutdown_requested", "bot.shutdown_requested");
        ctrl_c.cancel();
    });

    bot.run(shutdown).await;
    Ok(())
}
