//! CLI command definitions.
//!
//! Form fields are taken as raw text and validated by the hub, so the CLI
//! and any other front end report the same validation errors.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Show command arguments.
#[derive(Debug, Args)]
pub struct ShowCommand {
    /// Vehicle id
    pub id: String,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Toggle command arguments.
#[derive(Debug, Args)]
pub struct ToggleCommand {
    /// Vehicle id
    pub id: String,
}

/// Service log command arguments.
#[derive(Debug, Args)]
pub struct ServiceCommand {
    /// Vehicle id
    pub id: String,

    /// Service date (YYYY-MM-DD)
    #[arg(long)]
    pub date: String,

    /// Work performed
    #[arg(long)]
    pub notes: String,

    /// Cost of the service (recorded as 0 if not a number)
    #[arg(long)]
    pub cost: Option<String>,

    /// Next scheduled service (YYYY-MM-DD)
    #[arg(long)]
    pub next_date: Option<String>,
}

/// Condition log command arguments.
#[derive(Debug, Args)]
pub struct ConditionCommand {
    /// Vehicle id
    pub id: String,

    /// Observation
    #[arg(long)]
    pub note: String,

    /// Current odometer reading (recorded as 0 if not a number)
    #[arg(long)]
    pub mileage: Option<String>,

    /// Observation date (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    pub date: Option<String>,
}

/// Rental return command arguments.
#[derive(Debug, Args)]
pub struct RentalCommand {
    /// Vehicle id
    pub id: String,

    /// Days the vehicle was rented
    #[arg(long)]
    pub days: String,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_command_debug() {
        let cmd = ServiceCommand {
            id: "abc".to_string(),
            date: "2025-01-01".to_string(),
            notes: "Oil change".to_string(),
            cost: None,
            next_date: None,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Oil change"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
