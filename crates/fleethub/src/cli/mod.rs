//! Command-line interface for fleethub.
//!
//! This module provides the CLI structure for the `fleethub` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConditionCommand, ConfigCommand, ListCommand, RentalCommand, ServiceCommand, ShowCommand,
    StatusCommand, ToggleCommand,
};

/// fleethub - Luxury fleet management dashboard
///
/// Lists the rental fleet, flips vehicles between Available and Rented, and
/// records service, condition and rental data against the live document store.
#[derive(Debug, Parser)]
#[command(name = "fleethub")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the fleet as a card grid
    List(ListCommand),

    /// Show the detail view of one vehicle
    Show(ShowCommand),

    /// Flip a vehicle between Available and Rented
    Toggle(ToggleCommand),

    /// Append a service record
    Service(ServiceCommand),

    /// Append a condition log entry
    Condition(ConditionCommand),

    /// Record a rental return
    Rental(RentalCommand),

    /// Re-render the fleet on every change until interrupted
    Watch,

    /// Show store status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn cli(verbose: u8, quiet: bool) -> Cli {
        Cli {
            config: None,
            verbose,
            quiet,
            command: Command::Watch,
        }
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "fleethub");
    }

    #[test]
    fn test_verbosity_levels() {
        use crate::logging::Verbosity;
        assert_eq!(cli(0, true).verbosity(), Verbosity::Quiet);
        assert_eq!(cli(3, true).verbosity(), Verbosity::Quiet);
        assert_eq!(cli(0, false).verbosity(), Verbosity::Normal);
        assert_eq!(cli(1, false).verbosity(), Verbosity::Verbose);
        assert_eq!(cli(2, false).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list_json() {
        let cli = Cli::try_parse_from(["fleethub", "list", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::List(ListCommand { json: true })));
    }

    #[test]
    fn test_parse_show() {
        let cli = Cli::try_parse_from(["fleethub", "show", "abc123"]).unwrap();
        match cli.command {
            Command::Show(cmd) => {
                assert_eq!(cmd.id, "abc123");
                assert!(!cmd.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_toggle_requires_id() {
        assert!(Cli::try_parse_from(["fleethub", "toggle"]).is_err());
        let cli = Cli::try_parse_from(["fleethub", "toggle", "abc"]).unwrap();
        assert!(matches!(cli.command, Command::Toggle(_)));
    }

    #[test]
    fn test_parse_service() {
        let cli = Cli::try_parse_from([
            "fleethub",
            "service",
            "abc",
            "--date",
            "2025-01-01",
            "--notes",
            "Oil change",
            "--cost",
            "250",
        ])
        .unwrap();
        match cli.command {
            Command::Service(cmd) => {
                assert_eq!(cmd.date, "2025-01-01");
                assert_eq!(cmd.notes, "Oil change");
                assert_eq!(cmd.cost.as_deref(), Some("250"));
                assert!(cmd.next_date.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_condition() {
        let cli = Cli::try_parse_from([
            "fleethub",
            "condition",
            "abc",
            "--note",
            "Scratch on bumper",
            "--mileage",
            "12345",
        ])
        .unwrap();
        match cli.command {
            Command::Condition(cmd) => {
                assert_eq!(cmd.note, "Scratch on bumper");
                assert_eq!(cmd.mileage.as_deref(), Some("12345"));
                assert!(cmd.date.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rental() {
        let cli = Cli::try_parse_from(["fleethub", "rental", "abc", "--days", "3"]).unwrap();
        match cli.command {
            Command::Rental(cmd) => assert_eq!(cmd.days, "3"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_watch_and_status() {
        let cli = Cli::try_parse_from(["fleethub", "watch"]).unwrap();
        assert!(matches!(cli.command, Command::Watch));

        let cli = Cli::try_parse_from(["fleethub", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Status(StatusCommand { json: true })));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = Cli::try_parse_from(["fleethub", "-c", "/custom/config.toml", "list"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["fleethub", "list", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["fleethub", "watch", "-q"]).unwrap();
        assert!(cli.quiet);
    }
}
