//! Command-line interface.
//!
//! One binary runs either role; the subcommand picks which. Flags given here
//! override the values read from the role's configuration file.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cluster", version, about = "Registry and channel nodes of a game server cluster")]
pub struct CliArgs {
    #[command(subcommand)]
    pub role: Role,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Debug, Subcommand)]
pub enum Role {
    /// Run the registry node
    Registry(RegistryArgs),
    /// Run a channel node
    Channel(ChannelArgs),
}

#[derive(Debug, Args)]
pub struct RegistryArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "registry.toml")]
    pub config: PathBuf,

    /// Address channel nodes connect to
    #[arg(short, long, value_name = "ADDRESS")]
    pub bind: Option<SocketAddr>,
}

#[derive(Debug, Args)]
pub struct ChannelArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "channel.toml")]
    pub config: PathBuf,

    /// Client listener address
    #[arg(short, long, value_name = "ADDRESS")]
    pub bind: Option<SocketAddr>,

    /// Registry address, host:port
    #[arg(short, long, value_name = "ADDRESS")]
    pub registry: Option<String>,

    /// Node name within its group
    #[arg(short, long, value_name = "NAME")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_overrides_parse() {
        let args = CliArgs::parse_from([
            "cluster",
            "channel",
            "--config",
            "w2.toml",
            "--name",
            "Beta",
            "--bind",
            "0.0.0.0:11021",
            "--json-logs",
        ]);

        assert!(args.json_logs);
        let Role::Channel(channel) = args.role else {
            panic!("expected channel role");
        };
        assert_eq!(channel.config, PathBuf::from("w2.toml"));
        assert_eq!(channel.name.as_deref(), Some("Beta"));
        assert_eq!(channel.bind, Some("0.0.0.0:11021".parse().unwrap()));
        assert!(channel.registry.is_none());
    }

    #[test]
    fn test_registry_defaults() {
        let args = CliArgs::parse_from(["cluster", "-l", "debug", "registry"]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        let Role::Registry(registry) = args.role else {
            panic!("expected registry role");
        };
        assert_eq!(registry.config, PathBuf::from("registry.toml"));
        assert!(registry.bind.is_none());
    }

    #[test]
    fn test_role_is_required() {
        assert!(CliArgs::try_parse_from(["cluster"]).is_err());
    }
}
