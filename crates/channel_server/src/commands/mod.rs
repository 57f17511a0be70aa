//! In-session commands.
//!
//! Commands are plain records built once at startup: names, the authority
//! needed to use them on oneself (`global_min`), the authority needed to
//! use them on another character (`target_min`, `-1` forbids that
//! entirely), a usage line and the handler. Aliases map to the same record.

mod builtin;
mod router;

pub use builtin::{register_builtins, BuiltinServices};
pub use router::CommandRouter;

use crate::clients::ClientSession;
use crate::config::CommandOverride;
use cluster_protocol::CommandResult;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Everything a handler gets to see.
pub struct CommandContext<'a> {
    /// Session that typed the command
    pub sender: &'a Arc<ClientSession>,
    /// Character the command acts on; the sender itself unless targeted
    pub target: &'a Arc<ClientSession>,
    /// Tokens as typed, command name first, target name removed
    pub args: &'a [String],
    pub targeted: bool,
}

impl CommandContext<'_> {
    /// Arguments after the command name joined back into one string.
    pub fn rest(&self) -> String {
        self.args.get(1..).unwrap_or_default().join(" ")
    }
}

pub type CommandHandler = Arc<dyn Fn(&CommandContext<'_>) -> CommandResult + Send + Sync>;

pub struct Command {
    pub name: String,
    pub aliases: Vec<String>,
    pub global_min: i32,
    pub target_min: i32,
    pub usage: String,
    handler: CommandHandler,
}

impl Command {
    pub fn run(&self, context: &CommandContext<'_>) -> CommandResult {
        (self.handler)(context)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("global_min", &self.global_min)
            .field("target_min", &self.target_min)
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}

/// Immutable name/alias -> command lookup.
#[derive(Debug, Default)]
pub struct CommandSet {
    by_name: HashMap<String, Arc<Command>>,
}

impl CommandSet {
    pub fn builder() -> CommandSetBuilder {
        CommandSetBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Command>> {
        self.by_name.get(&name.to_ascii_lowercase())
    }

    /// Distinct commands, by primary name.
    pub fn commands(&self) -> Vec<Arc<Command>> {
        let mut unique: BTreeMap<&str, Arc<Command>> = BTreeMap::new();
        for command in self.by_name.values() {
            unique.entry(command.name.as_str()).or_insert_with(|| command.clone());
        }
        unique.into_values().collect()
    }
}

#[derive(Default)]
pub struct CommandSetBuilder {
    commands: Vec<Command>,
}

impl CommandSetBuilder {
    /// Adds a command. `names` is the primary name followed by its aliases.
    pub fn add<F>(&mut self, global_min: i32, target_min: i32, names: &[&str], usage: &str, handler: F) -> &mut Self
    where
        F: Fn(&CommandContext<'_>) -> CommandResult + Send + Sync + 'static,
    {
        let Some((name, aliases)) = names.split_first() else {
            return self;
        };
        self.commands.push(Command {
            name: name.to_ascii_lowercase(),
            aliases: aliases.iter().map(|a| a.to_ascii_lowercase()).collect(),
            global_min,
            target_min,
            usage: usage.to_string(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Freezes the set, applying authority overrides keyed by primary name.
    /// A later command with a name already taken replaces the earlier one.
    pub fn build(self, overrides: &BTreeMap<String, CommandOverride>) -> CommandSet {
        let mut by_name = HashMap::new();

        for mut command in self.commands {
            if let Some(o) = overrides
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&command.name))
                .map(|(_, o)| o)
            {
                command.global_min = o.global_min.unwrap_or(command.global_min);
                command.target_min = o.target_min.unwrap_or(command.target_min);
                debug!(
                    "Command '{}' authority overridden to {}/{}",
                    command.name, command.global_min, command.target_min
                );
            }

            let command = Arc::new(command);
            by_name.insert(command.name.clone(), command.clone());
            for alias in &command.aliases {
                by_name.insert(alias.clone(), command.clone());
            }
        }

        CommandSet { by_name }
    }
}
