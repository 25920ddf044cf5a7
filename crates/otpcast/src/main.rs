use std::{
    io::{self, Write},
    sync::Arc,
};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use otpcast_core::{
    config::Config,
    poller::{Poller, RunMode},
    registry::{Group, Registries},
    settings::{self, Settings},
};
use otpcast_source::CampaignApi;
use otpcast_telegram::TelegramDelivery;

/// Campaign-API → Telegram verification-code relay.
#[derive(Parser, Debug)]
#[command(name = "otpcast", version, about, long_about = None)]
struct Cli {
    /// Run one polling cycle then exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), otpcast_core::Error> {
    otpcast_core::logging::init("otpcast")?;
    let cli = Cli::parse();

    let mut cfg = Config::load()?;

    // First-run prompts: only values that are still missing after the
    // settings file, `.env` and environment are asked for.
    if cfg.telegram_bot_token.trim().is_empty() {
        cfg.telegram_bot_token = ask("Telegram bot token", None);
    }

    let mut registries = Registries::load(&cfg);
    if registries.groups.is_empty() {
        let chat_id = match cfg.default_chat_id.clone() {
            Some(id) => id,
            None => ask("Telegram group/chat id (example: -1001234567890)", None),
        };
        cfg.default_chat_id = Some(chat_id.clone());
        registries.groups = vec![Group {
            name: "default_group".to_string(),
            chat_id,
            enabled: true,
        }];
    }

    if cfg.api_session_token.is_none() && registries.accounts.is_empty() {
        let token = ask("API session token (missing and no accounts found)", None);
        if !token.is_empty() {
            cfg.api_session_token = Some(token);
        }
    }

    // Persist effective runtime values to avoid repeated prompts.
    let mut persisted = Settings::load(&cfg.settings_file());
    persisted.set(settings::KEY_API_BASE_URL, cfg.api_base.clone());
    persisted.set(settings::KEY_API_START_DATE, cfg.start_date.clone());
    persisted.set(
        settings::KEY_API_SESSION_TOKEN,
        cfg.api_session_token.clone().unwrap_or_default(),
    );
    persisted.set(settings::KEY_TELEGRAM_BOT_TOKEN, cfg.telegram_bot_token.clone());
    if let Some(first) = registries.groups.first() {
        persisted.set(settings::KEY_TELEGRAM_CHAT_ID, first.chat_id.clone());
    }
    persisted.set(settings::KEY_BOT_LIMIT, cfg.limit.to_string());
    if let Err(e) = persisted.save() {
        warn!(error = %e, "could not persist runtime settings");
    }

    cfg.validate(!registries.accounts.is_empty())?;

    let source = Arc::new(CampaignApi::new(
        cfg.api_base.clone(),
        cfg.login_timeout,
        cfg.fetch_timeout,
    ));
    let delivery = Arc::new(TelegramDelivery::new(
        cfg.telegram_bot_token.clone(),
        cfg.send_timeout,
    ));

    let cfg = Arc::new(cfg);
    let mut poller = Poller::new(cfg.clone(), source, delivery, registries);
    poller.prime_accounts().await;

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            stop.cancel();
        }
    });

    let mode = if cli.once {
        RunMode::Once
    } else {
        RunMode::Forever
    };
    poller.run(mode, cancel).await
}

fn ask(prompt: &str, default: Option<&str>) -> String {
    match default {
        Some(d) => print!("{prompt} [{d}]: "),
        None => print!("{prompt}: "),
    }
    io::stdout().flush().ok();

    let mut line = String::new();
    io::stdin().read_line(&mut line).ok();
    let value = line.trim().to_string();
    if value.is_empty() {
        default.unwrap_or_default().to_string()
    } else {
        value
    }
}
