//! Channel console commands.

use crate::server::ChannelContext;
use crate::shutdown::ShutdownStatus;
use cluster_protocol::{CommandResult, ConsoleCommands, ShutdownResult};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Delay used by `shutdown` when none is given.
pub const DEFAULT_SHUTDOWN_DELAY_SECS: i64 = 60;

/// Builds the console command table of a channel process.
pub fn console_commands(context: Arc<ChannelContext>) -> ConsoleCommands {
    let mut console = ConsoleCommands::new();

    let ctx = context.clone();
    console.add(
        "shutdown",
        "[seconds]",
        "Shuts this channel down after the given time (60-1800)",
        move |args| {
            let seconds = match args.get(1) {
                Some(raw) => match raw.parse::<i64>() {
                    Ok(seconds) => seconds,
                    Err(_) => return CommandResult::InvalidArgument,
                },
                None => DEFAULT_SHUTDOWN_DELAY_SECS,
            };

            match ctx.coordinator.request(seconds) {
                ShutdownResult::Success => CommandResult::Okay,
                ShutdownResult::AlreadyInProgress => {
                    warn!("A shutdown is already in progress.");
                    CommandResult::Okay
                }
                ShutdownResult::Fail => {
                    error!("Shutdown could not be scheduled; is this channel registered?");
                    CommandResult::Fail
                }
            }
        },
    );

    let ctx = context;
    console.add("status", "", "Shows this channel's state", move |_| {
        let status = &ctx.status;
        info!(
            "{}: {} ({}/{} users), registry link {}",
            status.full_name(),
            status.health(),
            status.current_users(),
            status.max_users(),
            if ctx.upstream.is_logged_in() { "up" } else { "down" }
        );

        let session = ctx.coordinator.session();
        if session.status != ShutdownStatus::Idle {
            info!("Shutdown {:?}, {}s total", session.status, session.duration_secs);
        }

        for entry in ctx.server_list.snapshot() {
            info!(
                "  {:<24} {:>5}/{:<5} {}",
                entry.full_name(),
                entry.current_users,
                entry.max_users,
                entry.health
            );
        }
        CommandResult::Okay
    });

    console
}
