//! Registry console commands.

use crate::server::RegistryServer;
use cluster_protocol::handshake::hash_secret;
use cluster_protocol::{current_timestamp, AccountStore, CommandResult, ConsoleCommands};
use std::sync::Arc;
use tracing::{error, info};

/// Delay used by `shutdown` when none is given.
pub const DEFAULT_SHUTDOWN_DELAY_SECS: i64 = 60;

/// Builds the console command table of a registry process.
pub fn console_commands(server: Arc<RegistryServer>) -> ConsoleCommands {
    let mut console = ConsoleCommands::new();

    let registry = server.registry();
    console.add(
        "shutdown",
        "<group/name|*> [seconds]",
        "Asks one channel, or every channel, to shut down",
        move |args| {
            let Some(target) = args.get(1) else {
                return CommandResult::InvalidArgument;
            };
            let delay = match args.get(2) {
                Some(raw) => match raw.parse::<i64>() {
                    Ok(delay) => delay,
                    Err(_) => return CommandResult::InvalidArgument,
                },
                None => DEFAULT_SHUTDOWN_DELAY_SECS,
            };

            match registry.request_channel_shutdown(target, delay) {
                Some(0) => {
                    info!("No channels connected.");
                    CommandResult::Okay
                }
                Some(_) => CommandResult::Okay,
                None => {
                    error!("Channel '{}' not found.", target);
                    CommandResult::InvalidArgument
                }
            }
        },
    );

    let accounts = server.accounts();
    console.add("auth", "<account> <level>", "Changes an account's authority", move |args| {
        change_auth(accounts.as_ref(), args)
    });

    let accounts = server.accounts();
    console.add("passwd", "<account> <password>", "Changes an account's password", move |args| {
        change_password(accounts.as_ref(), args)
    });

    let registry = server.registry();
    console.add("status", "", "Lists known channels", move |_| {
        let entries = registry.snapshot();
        let now = current_timestamp();
        info!(
            "{} channel(s) known, {} node link(s) authenticated",
            entries.len(),
            registry.authenticated_links().len()
        );
        for entry in entries {
            info!(
                "  {:<24} {}:{:<6} {:>5}/{:<5} {:<12} last heartbeat {}s ago",
                entry.full_name(),
                entry.host,
                entry.port,
                entry.current_users,
                entry.max_users,
                entry.health.to_string(),
                now.saturating_sub(entry.last_heartbeat)
            );
        }
        CommandResult::Okay
    });

    console
}

fn change_auth(accounts: &dyn AccountStore, args: &[String]) -> CommandResult {
    let (Some(account), Some(level)) = (args.get(1), args.get(2)) else {
        return CommandResult::InvalidArgument;
    };
    let Ok(level) = level.parse::<i32>() else {
        return CommandResult::InvalidArgument;
    };

    if !accounts.change_auth(account, level) {
        error!("Account '{}' not found.", account);
        return CommandResult::Fail;
    }

    info!("Changed authority of '{}' to {}.", account, level);
    CommandResult::Okay
}

fn change_password(accounts: &dyn AccountStore, args: &[String]) -> CommandResult {
    let (Some(account), Some(password)) = (args.get(1), args.get(2)) else {
        return CommandResult::InvalidArgument;
    };

    if !accounts.set_password(account, &hash_secret(password)) {
        error!("Account '{}' not found.", account);
        return CommandResult::Fail;
    }

    info!("Changed password of '{}'.", account);
    CommandResult::Okay
}
