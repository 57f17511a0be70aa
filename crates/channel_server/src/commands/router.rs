use super::{CommandContext, CommandSet};
use crate::clients::{ActorDirectory, ClientSession};
use cluster_protocol::{parse_line, CommandResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Parses command lines typed in a session and dispatches them.
pub struct CommandRouter {
    commands: CommandSet,
    prefix: String,
    target_prefix: String,
    actors: Arc<dyn ActorDirectory>,
}

impl CommandRouter {
    pub fn new(
        commands: CommandSet,
        prefix: impl Into<String>,
        target_prefix: impl Into<String>,
        actors: Arc<dyn ActorDirectory>,
    ) -> Self {
        Self {
            commands,
            prefix: prefix.into(),
            target_prefix: target_prefix.into(),
            actors,
        }
    }

    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    /// Handles `text` typed by `session`.
    ///
    /// Returns `false` when the text is not a command, so the caller treats
    /// it as chat. Everything else, including refusals and failures, was
    /// answered here and returns `true`.
    pub fn process(&self, session: &Arc<ClientSession>, text: &str) -> bool {
        if text.len() < 2 {
            return false;
        }
        let Some((targeted, body)) = self.split_prefix(text) else {
            return false;
        };
        if body.starts_with(char::is_whitespace) {
            return false;
        }

        let mut args = parse_line(body);
        let Some(first) = args.first() else {
            return false;
        };
        let name = first.to_ascii_lowercase();

        let Some(command) = self.commands.get(&name).cloned() else {
            return false;
        };

        let target = if targeted {
            let found = args
                .get(1)
                .and_then(|target_name| self.actors.find_character(target_name));
            match found {
                Some(target) => {
                    args.remove(1);
                    target
                }
                None => {
                    session.server_message("Target not found.");
                    return true;
                }
            }
        } else {
            session.clone()
        };

        let authority = session.authority();
        if targeted {
            if command.target_min < 0 {
                session.server_message(format!("'{}' cannot be used on another character.", command.name));
                return true;
            }
            if authority < command.target_min {
                session.server_message(format!("You're not authorized to use '{}' on others.", command.name));
                return true;
            }
        } else if authority < command.global_min {
            session.server_message(format!("You're not authorized to use '{}'.", command.name));
            return true;
        }

        let context = CommandContext {
            sender: session,
            target: &target,
            args: &args,
            targeted,
        };

        match command.run(&context) {
            CommandResult::Okay => {
                if targeted {
                    info!("🛡️ {} used '{}' on {}", session.character(), command.name, target.character());
                } else {
                    debug!("{} used '{}'", session.character(), command.name);
                }
            }
            CommandResult::InvalidArgument => {
                session.server_message(format!("Usage: {} {}", command.name, command.usage).trim_end().to_string());
                if command.target_min > 0 && command.target_min <= authority {
                    session.server_message(
                        format!("Usage: {} <target> {}", command.name, command.usage)
                            .trim_end()
                            .to_string(),
                    );
                }
            }
            CommandResult::Fail => {
                session.server_message("Failed to process command.");
            }
        }

        true
    }

    /// Strips whichever marker `text` starts with, the longer one winning
    /// when both match. Returns whether it was the target marker.
    fn split_prefix<'t>(&self, text: &'t str) -> Option<(bool, &'t str)> {
        let target = text.strip_prefix(self.target_prefix.as_str());
        let own = text.strip_prefix(self.prefix.as_str());
        match (target, own) {
            (Some(rest), Some(_)) if self.target_prefix.len() >= self.prefix.len() => Some((true, rest)),
            (_, Some(rest)) => Some((false, rest)),
            (Some(rest), None) => Some((true, rest)),
            (None, None) => None,
        }
    }
}
