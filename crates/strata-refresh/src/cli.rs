//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Operator tool for the Strata cache layer.
#[derive(Debug, Parser)]
#[command(name = "strata-refresh", version)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short, default_value = "strata.yaml")]
    pub config: PathBuf,

    /// Print results as JSON.
    #[arg(long)]
    pub json: bool,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Operator commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Repopulate the cache for one or more customers from the durable store.
    Refresh {
        /// Customer ids to refresh.
        #[arg(required = true)]
        customers: Vec<String>,
    },

    /// Report cache readiness and per-type entity counts.
    Status {
        /// Customer ids to count entities for.
        customers: Vec<String>,
    },

    /// Remove every cached key. Refused in production.
    Flush,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn refresh_takes_customer_list() {
        let cli = Cli::try_parse_from(["strata-refresh", "--json", "refresh", "C1", "C2"]);
        assert!(matches!(
            cli,
            Ok(Cli { json: true, command: Command::Refresh { ref customers }, .. })
                if customers == &["C1", "C2"]
        ));
    }

    #[test]
    fn refresh_requires_a_customer() {
        assert!(Cli::try_parse_from(["strata-refresh", "refresh"]).is_err());
    }
}
