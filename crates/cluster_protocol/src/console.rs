//! Operator console commands shared by the registry and channel processes.
//!
//! Each process registers its own commands at startup; lines typed on the
//! console are tokenized with [`parse_line`] and dispatched by name. Output
//! goes through `tracing` so it lands in the same stream as the server log.

use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// What a command handler reports back to its dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Okay,
    InvalidArgument,
    Fail,
}

/// Splits a command line on whitespace; double quotes group words.
///
/// `>item "Blue Potion" 5` becomes `[">item", "Blue Potion", "5"]`.
pub fn parse_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }

    args
}

/// Console handler; `args[0]` is the command name as typed.
pub type ConsoleHandler = Box<dyn Fn(&[String]) -> CommandResult + Send + Sync>;

struct ConsoleCommand {
    usage: String,
    description: String,
    handler: ConsoleHandler,
}

/// Name → command table for one process's console.
#[derive(Default)]
pub struct ConsoleCommands {
    commands: BTreeMap<String, ConsoleCommand>,
}

impl ConsoleCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a command, replacing any earlier one with the same name.
    ///
    /// # Arguments
    ///
    /// * `name` - Command word, matched case-insensitively
    /// * `usage` - Argument synopsis shown by `help`
    /// * `description` - One-line summary shown by `help`
    /// * `handler` - Called with the parsed arguments, command word first
    pub fn add<F>(&mut self, name: &str, usage: &str, description: &str, handler: F)
    where
        F: Fn(&[String]) -> CommandResult + Send + Sync + 'static,
    {
        self.commands.insert(
            name.to_ascii_lowercase(),
            ConsoleCommand {
                usage: usage.to_string(),
                description: description.to_string(),
                handler: Box::new(handler),
            },
        );
    }

    /// Whether a command with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(&name.to_ascii_lowercase())
    }

    /// Runs one console line. Returns `None` for blank lines and unknown
    /// commands.
    pub fn process(&self, line: &str) -> Option<CommandResult> {
        let args = parse_line(line);
        let name = args.first()?.to_ascii_lowercase();

        if name == "help" {
            self.print_help();
            return Some(CommandResult::Okay);
        }

        let Some(command) = self.commands.get(&name) else {
            warn!("Unknown command '{}', type 'help' for a list.", name);
            return None;
        };

        let result = (command.handler)(&args);
        match result {
            CommandResult::Okay => {}
            CommandResult::InvalidArgument => info!("Usage: {} {}", name, command.usage),
            CommandResult::Fail => error!("Failed to run command '{}'.", name),
        }

        Some(result)
    }

    fn print_help(&self) {
        info!("Available commands:");
        info!("  {:<32} {}", "help", "Displays this list");
        for (name, command) in &self.commands {
            let synopsis = format!("{} {}", name, command.usage);
            info!("  {:<32} {}", synopsis.trim_end(), command.description);
        }
    }
}
