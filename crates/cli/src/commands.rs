use clap::{Args, Subcommand};
use engine_config::overrides::JobOverrides;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the source and target databases accept connections
    TestConn,
    /// Print the exact row count of a table
    RowCount {
        #[arg(long, help = "Table as schema.table, or a bare name in public")]
        table: String,

        #[arg(long, help = "Count on the target database instead of the source")]
        target: bool,
    },
}

/// Switches for a transfer run. Used when no subcommand is given.
#[derive(Args, Debug, Clone, Default)]
pub struct TransferArgs {
    #[arg(long, help = "Drop and recreate the target table before loading")]
    pub drop_target: bool,

    #[arg(long, help = "Append only rows newer than the watermark")]
    pub incremental: bool,

    #[arg(long, value_name = "COLUMN", help = "Watermark column for incremental runs")]
    pub date_column: Option<String>,

    #[arg(long, value_name = "HH:MM", help = "Run every day at this local time")]
    pub schedule: Option<String>,

    #[arg(long, help = "Run once immediately, also before the first scheduled run")]
    pub run_now: bool,

    #[arg(long, conflicts_with = "disable_splitting")]
    pub enable_splitting: bool,

    #[arg(long)]
    pub disable_splitting: bool,

    #[arg(long, value_name = "N", help = "Number of partitions when splitting")]
    pub splits: Option<u32>,

    #[arg(long, value_name = "PATH", help = "Write the job report as JSON to this file")]
    pub report_json: Option<PathBuf>,
}

impl TransferArgs {
    pub fn overrides(&self) -> JobOverrides {
        JobOverrides {
            drop_target: self.drop_target,
            incremental: self.incremental,
            date_column: self.date_column.clone(),
            enable_splitting: self.enable_splitting,
            disable_splitting: self.disable_splitting,
            splits: self.splits,
        }
    }
}
