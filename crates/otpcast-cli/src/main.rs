//! Management CLI: edits the account/group/platform registries and the
//! stored dedup history. Invoked without a subcommand it drops into an
//! interactive menu.

use std::io::{self, Write};

use clap::{Parser, Subcommand};

use otpcast_core::{
    config::Config,
    registry::{self, Account, Group},
    store,
};

#[derive(Parser, Debug)]
#[command(name = "otpcast-cli", version, about = "Manage relay accounts, groups and stored history", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add or replace (by email) a source-API account.
    AddAccount {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        disabled: bool,
    },
    /// Add or replace (by chat id) a Telegram delivery group.
    AddGroup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        chat_id: String,
        #[arg(long)]
        disabled: bool,
    },
    /// Clear stored dedup history, for one day or entirely.
    ClearStore {
        #[arg(long)]
        start_date: Option<String>,
    },
    /// Print the account registry.
    ListAccounts,
    /// Print the group registry.
    ListGroups,
    /// Set a platform's custom-emoji identifier.
    SetPlatformEmojiId {
        #[arg(long)]
        key: String,
        #[arg(long)]
        emoji_id: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("config error: {e}");
            return;
        }
    };

    match cli.command {
        Some(Commands::AddAccount {
            name,
            email,
            password,
            disabled,
        }) => add_account(&cfg, name, email, password, !disabled),
        Some(Commands::AddGroup {
            name,
            chat_id,
            disabled,
        }) => add_group(&cfg, name, chat_id, !disabled),
        Some(Commands::ClearStore { start_date }) => clear_store(&cfg, start_date.as_deref()),
        Some(Commands::ListAccounts) => list_registry(&cfg.accounts_file()),
        Some(Commands::ListGroups) => list_registry(&cfg.groups_file()),
        Some(Commands::SetPlatformEmojiId { key, emoji_id }) => {
            set_platform_emoji_id(&cfg, &key, &emoji_id)
        }
        None => interactive_menu(&cfg),
    }
}

fn add_account(cfg: &Config, name: String, email: String, password: String, enabled: bool) {
    let account = Account {
        name,
        email: email.clone(),
        password,
        enabled,
    };
    match registry::upsert_account(&cfg.accounts_file(), account) {
        Ok(()) => println!("added account: {email}"),
        Err(e) => eprintln!("could not add account: {e}"),
    }
}

fn add_group(cfg: &Config, name: String, chat_id: String, enabled: bool) {
    let group = Group {
        name,
        chat_id: chat_id.clone(),
        enabled,
    };
    match registry::upsert_group(&cfg.groups_file(), group) {
        Ok(()) => println!("added group: {chat_id}"),
        Err(e) => eprintln!("could not add group: {e}"),
    }
}

fn clear_store(cfg: &Config, start_date: Option<&str>) {
    match store::clear(&cfg.daily_dir(), start_date) {
        Ok(true) if start_date.is_some() => {
            println!("cleared daily store for day={}", start_date.unwrap_or_default())
        }
        Ok(false) if start_date.is_some() => {
            println!("no daily store found for day={}", start_date.unwrap_or_default())
        }
        Ok(_) => println!("cleared all stored messages"),
        Err(e) => eprintln!("could not clear store: {e}"),
    }
}

fn list_registry(path: &std::path::Path) {
    let rows: Vec<serde_json::Value> = registry::load_json_list(path);
    match serde_json::to_string_pretty(&rows) {
        Ok(txt) => println!("{txt}"),
        Err(e) => eprintln!("could not render registry: {e}"),
    }
}

fn set_platform_emoji_id(cfg: &Config, key: &str, emoji_id: &str) {
    match registry::set_platform_emoji_id(&cfg.platforms_file(), key, emoji_id) {
        Ok(()) => println!("set emoji_id for platform '{key}'"),
        Err(e) => eprintln!("could not update platform: {e}"),
    }
}

fn interactive_menu(cfg: &Config) {
    loop {
        println!();
        println!("=== otpcast CLI menu ===");
        println!("1) Add account");
        println!("2) Add group");
        println!("3) List accounts");
        println!("4) List groups");
        println!("5) Exit");

        match ask("Choose (1-5)", None).as_str() {
            "1" => {
                let name = ask("Account name", None);
                let email = ask("Email", None);
                let password = ask("Password", None);
                let enabled = ask("Enabled? (y/n)", Some("y")).to_lowercase() != "n";
                add_account(cfg, name, email, password, enabled);
            }
            "2" => {
                let name = ask("Group name", None);
                let chat_id = ask("Telegram chat_id (example: -1001234567890)", None);
                let enabled = ask("Enabled? (y/n)", Some("y")).to_lowercase() != "n";
                add_group(cfg, name, chat_id, enabled);
                println!("group saved. Run otpcast and messages will be sent to enabled groups.");
            }
            "3" => list_registry(&cfg.accounts_file()),
            "4" => list_registry(&cfg.groups_file()),
            "5" | "" => {
                println!("bye");
                return;
            }
            _ => println!("invalid choice"),
        }
    }
}

fn ask(prompt: &str, default: Option<&str>) -> String {
    match default {
        Some(d) => print!("{prompt} [{d}]: "),
        None => print!("{prompt}: "),
    }
    io::stdout().flush().ok();

    let mut line = String::new();
    if io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
        // EOF: fall through with no input.
        return String::new();
    }
    let value = line.trim().to_string();
    if value.is_empty() {
        default.unwrap_or_default().to_string()
    } else {
        value
    }
}
