//! Command Line Interface
//!
//! Flags of `nexa-node start`. Every flag overrides the matching value of the
//! configuration file.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::NodeConfig;
use crate::error::NexaError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a node and join (or form) a cluster
    Start(StartArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct StartArgs {
    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Address to bind to, e.g. 10.0.0.5:7000 or :7000
    #[arg(long = "addr", short = 'a', conflicts_with = "interface")]
    pub addr: Option<String>,

    /// Bind to the first IPv4 address of this network interface
    #[arg(long = "if", short = 'i')]
    pub interface: Option<String>,

    /// Join the cluster of the node at this address
    #[arg(long, short = 'j')]
    pub join: Option<String>,

    /// Discover a cluster on this UDP multicast address, e.g. 239.0.0.1:9999
    #[arg(long, short = 'd')]
    pub discover: Option<String>,

    /// Working directory of this node
    #[arg(long = "var")]
    pub work_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Also write JSON logs below the working directory
    #[arg(long)]
    pub log_file: bool,
}

impl StartArgs {
    /// Loads the configuration file (if any) and applies the flags on top.
    pub fn into_config(self) -> Result<NodeConfig, NexaError> {
        let mut config = NodeConfig::load(self.config.as_deref())?;
        self.apply(&mut config);
        Ok(config)
    }

    pub fn apply(self, config: &mut NodeConfig) {
        // Either bind flag replaces the whole bind source of the file
        if let Some(addr) = self.addr {
            config.bind_address = Some(addr);
            config.bind_interface = None;
        } else if let Some(interface) = self.interface {
            config.bind_interface = Some(interface);
            config.bind_address = None;
        }
        if self.join.is_some() {
            config.join_address = self.join;
        }
        if self.discover.is_some() {
            config.discover_multicast_address = self.discover;
        }
        if let Some(dir) = self.work_dir {
            config.work_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.log_file {
            config.logging.file = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<StartArgs, clap::Error> {
        let cli = Cli::try_parse_from(std::iter::once("nexa-node").chain(args.iter().copied()))?;
        match cli.command {
            Commands::Start(args) => Ok(args),
        }
    }

    #[test]
    fn test_start_flags() {
        let args = parse(&[
            "start",
            "--addr",
            ":7000",
            "--join",
            "10.0.0.9:7000",
            "-d",
            "239.0.0.1:9999",
        ])
        .unwrap();
        assert_eq!(args.addr.as_deref(), Some(":7000"));
        assert_eq!(args.join.as_deref(), Some("10.0.0.9:7000"));
        assert_eq!(args.discover.as_deref(), Some("239.0.0.1:9999"));
    }

    #[test]
    fn test_addr_conflicts_with_interface() {
        assert!(parse(&["start", "--addr", ":7000", "--if", "eth0"]).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let mut config = NodeConfig {
            bind_interface: Some("eth0".to_string()),
            join_address: Some("10.0.0.1:7000".to_string()),
            ..NodeConfig::default()
        };

        let args = StartArgs {
            addr: Some("127.0.0.1:7000".to_string()),
            log_level: Some("debug".to_string()),
            ..StartArgs::default()
        };
        args.apply(&mut config);

        assert_eq!(config.bind_address.as_deref(), Some("127.0.0.1:7000"));
        assert_eq!(config.bind_interface, None);
        assert_eq!(config.join_address.as_deref(), Some("10.0.0.1:7000"));
        assert_eq!(config.logging.level, "debug");
    }
}
