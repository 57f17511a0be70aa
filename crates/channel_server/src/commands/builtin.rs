//! Commands every channel has, independent of world logic.

use super::CommandSetBuilder;
use crate::clients::ClientRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::status::UpstreamLink;
use cluster_protocol::accounts::authority;
use cluster_protocol::{CommandResult, ControlMessage, ShutdownResult};
use std::sync::Arc;
use tracing::{info, warn};

/// Node services the built-in commands act on.
#[derive(Clone)]
pub struct BuiltinServices {
    pub coordinator: Arc<ShutdownCoordinator>,
    pub clients: Arc<ClientRegistry>,
    pub upstream: Arc<UpstreamLink>,
}

pub fn register_builtins(builder: &mut CommandSetBuilder, services: BuiltinServices) {
    let coordinator = services.coordinator.clone();
    builder.add(authority::ADMIN, -1, &["shutdown"], "<seconds>", move |ctx| {
        let Some(Ok(seconds)) = ctx.args.get(1).map(|raw| raw.parse::<i64>()) else {
            return CommandResult::InvalidArgument;
        };

        match coordinator.request(seconds) {
            ShutdownResult::Success => {
                info!("🛑 Shutdown requested by {}", ctx.sender.character());
                let duration = coordinator.session().duration_secs;
                ctx.sender.server_message(format!("Shutdown scheduled in {duration} seconds."));
                CommandResult::Okay
            }
            ShutdownResult::AlreadyInProgress => {
                ctx.sender.server_message("A shutdown is already in progress.");
                CommandResult::Okay
            }
            ShutdownResult::Fail => CommandResult::Fail,
        }
    });

    let upstream = services.upstream.clone();
    builder.add(authority::GM, authority::GM, &["broadcast", "bc"], "<message>", move |ctx| {
        if ctx.args.len() < 2 {
            return CommandResult::InvalidArgument;
        }

        let message = format!("{}: {}", ctx.target.character(), ctx.rest());
        if !upstream.send(ControlMessage::BroadcastNotice { message }) {
            warn!("Broadcast from {} dropped: registry link not ready", ctx.sender.character());
            return CommandResult::Fail;
        }
        CommandResult::Okay
    });

    let clients = services.clients.clone();
    builder.add(authority::GM, authority::GM, &["msg", "m"], "<message>", move |ctx| {
        if ctx.args.len() < 2 {
            return CommandResult::InvalidArgument;
        }

        clients.broadcast_notice(&format!("{}: {}", ctx.target.character(), ctx.rest()));
        CommandResult::Okay
    });

    let clients = services.clients;
    builder.add(authority::VIP, authority::GM, &["who"], "", move |ctx| {
        let mut names: Vec<String> = clients
            .snapshot()
            .iter()
            .map(|session| session.character().to_string())
            .collect();
        names.sort_unstable_by_key(|name| name.to_ascii_lowercase());

        ctx.sender
            .server_message(format!("Players online ({}): {}", names.len(), names.join(", ")));
        CommandResult::Okay
    });
}
