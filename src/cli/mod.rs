//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the tool.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::application::OutputFormat;
use crate::domain::{EntityKind, FarmerType};

/// Agrisync - offline-first farm data cache with background sync.
///
/// Changes made offline are queued and replayed in order once the server
/// is reachable again.
#[derive(Parser, Debug)]
#[command(name = "agrisync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format: table or json.
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,

    /// Treat the server as unreachable; changes are queued.
    #[arg(long, global = true)]
    pub offline: bool,

    /// Configuration file (defaults to ~/.agrisync/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show connectivity, sync state and a summary of cached data.
    Status,

    /// Show one cached entity.
    Show {
        /// user, farms, loans, weather, prices or credit.
        entity: EntityKind,

        /// Crop to show when the entity is prices.
        #[arg(long)]
        crop: Option<String>,
    },

    /// List operations waiting to be sent to the server.
    Pending,

    /// Drop every pending operation without sending it.
    ClearPending {
        /// Skip the confirmation guard.
        #[arg(long)]
        yes: bool,
    },

    /// Send pending operations and refresh cached data.
    Sync,

    /// Refresh cached data from the server without sending anything.
    Refresh,

    /// Record a new credit score locally.
    SetCreditScore {
        /// Score between 0 and 1000.
        score: u16,
    },

    /// Edit the farmer profile.
    UpdateProfile {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        /// smallholder, medium, large or cooperative.
        #[arg(long)]
        farmer_type: Option<FarmerType>,

        #[arg(long)]
        address: Option<String>,

        #[arg(long, allow_negative_numbers = true)]
        latitude: Option<f64>,

        #[arg(long, allow_negative_numbers = true)]
        longitude: Option<f64>,
    },

    /// Add a farm, or replace the farm with the same ID.
    AddFarm {
        /// Farm ID (generated if not specified).
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        name: String,

        /// Size in hectares.
        #[arg(long)]
        size: f64,

        /// Crops grown, comma separated.
        #[arg(long, value_delimiter = ',')]
        crops: Vec<String>,

        #[arg(long, default_value = "")]
        soil: String,

        /// Crop health between 0 and 100.
        #[arg(long, default_value = "100")]
        health: u8,

        /// Last harvest date (YYYY-MM-DD).
        #[arg(long)]
        last_harvest: Option<NaiveDate>,
    },

    /// Remove a farm.
    RemoveFarm {
        id: String,
    },

    /// Apply for a loan.
    ApplyLoan {
        /// Loan ID (generated if not specified).
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        amount: f64,

        /// Annual interest rate in percent.
        #[arg(long)]
        rate: f64,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: NaiveDate,
    },

    /// Record a repayment against an active loan.
    RepayLoan {
        loan_id: String,
        amount: f64,
    },

    /// Create the default configuration file.
    InitConfig {
        /// Write a fresh file pointing at this server instead.
        #[arg(long)]
        server_url: Option<String>,
    },
}

impl Cli {
    /// Parse the output format argument.
    pub fn output_format(&self) -> Result<OutputFormat, String> {
        self.format.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add_farm() {
        let cli = Cli::try_parse_from([
            "agrisync",
            "--offline",
            "add-farm",
            "--name",
            "North",
            "--size",
            "1.5",
            "--crops",
            "maize,beans",
            "--last-harvest",
            "2024-02-10",
        ])
        .unwrap();

        assert!(cli.offline);
        match cli.command {
            Commands::AddFarm {
                crops,
                health,
                last_harvest,
                ..
            } => {
                assert_eq!(crops, vec!["maize", "beans"]);
                assert_eq!(health, 100);
                assert_eq!(last_harvest, NaiveDate::from_ymd_opt(2024, 2, 10));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_show_entity_alias() {
        let cli = Cli::try_parse_from(["agrisync", "show", "credit", "-f", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Show {
                entity: EntityKind::CreditScore,
                ..
            }
        ));
        assert_eq!(cli.output_format(), Ok(OutputFormat::Json));
    }

    #[test]
    fn test_rejects_bad_date() {
        assert!(Cli::try_parse_from([
            "agrisync",
            "apply-loan",
            "--amount",
            "100",
            "--rate",
            "5",
            "--start",
            "soon",
            "--end",
            "2025-01-01",
        ])
        .is_err());
    }
}
