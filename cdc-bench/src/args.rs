use cdc_config::Environment;
use cdc_harness::types::Table;
use clap::{Parser, Subcommand, ValueEnum};

use crate::output::OutputFormat;

/// Measures how long rows written to MySQL take to become visible in StarRocks.
#[derive(Parser, Debug)]
#[command(name = "cdc-bench", version, long_about = None)]
pub struct Args {
    /// Report format written to stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    /// Where logs go; overrides `APP_ENVIRONMENT` when given
    #[arg(long, value_enum, global = true)]
    pub log_target: Option<LogTarget>,

    /// Serves Prometheus metrics on this port for the duration of the run
    #[arg(long, global = true)]
    pub metrics_port: Option<u16>,

    /// Table used by single-table probes and batches
    #[arg(long, default_value = "orders", global = true)]
    pub table: Table,

    #[command(subcommand)]
    pub command: Command,
}

/// Destination of log output.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogTarget {
    /// Human readable lines on stderr
    Terminal,
    /// JSON lines in daily rolling files under `logs/`
    File,
}

impl LogTarget {
    pub fn environment(self) -> Environment {
        match self {
            LogTarget::Terminal => Environment::Dev,
            LogTarget::File => Environment::Prod,
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Insert probe on `--table`
    Single,
    /// Correlated insert chain across all five tables
    Multi,
    /// Multi-row insert on `--table`, waiting for every row
    Batch {
        /// Rows to insert [default: load.batch_size]
        n: Option<usize>,
    },
    /// Update probe on `--table`
    Update,
    /// Delete probe on `--table`
    Delete,
    /// Runs single, multi, batch, update and delete in sequence
    All,
    /// Batch on every table
    Load {
        /// Rows per table [default: load.batch_size]
        n: Option<usize>,
    },
    /// Paced single-row inserts for a fixed duration
    Continuous {
        /// Seconds to insert for [default: load.duration_secs]
        duration: Option<u64>,
        /// Rows per second across all workers, 0 for unpaced [default: load.rate]
        rate: Option<f64>,
    },
    /// Paced single-row inserts until Ctrl-C
    Unlimited {
        /// Rows per second across all workers, 0 for unpaced [default: load.rate]
        rate: Option<f64>,
    },
    /// Bursts of correlated chains with a pause in between
    Burst {
        /// Number of bursts
        #[arg(default_value_t = 5)]
        bursts: usize,
        /// Chains per burst [default: load.batch_size]
        size: Option<usize>,
        /// Seconds between bursts
        #[arg(default_value_t = 5)]
        pause: u64,
    },
    /// Source and target row counts per table
    Counts,
    /// Waits until the target row counts caught up with the source
    Verify {
        /// Seconds to wait before giving up [default: probe.max_wait_secs]
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Reachability of every collaborator and current row counts
    Status,
    /// Removes harness rows, children before parents
    Cleanup {
        /// Marker prefixes to remove [default: cleanup.marker_prefixes]
        prefixes: Vec<String>,
    },
    /// Probes tables round-robin until Ctrl-C
    Monitor {
        /// Milliseconds between two probes [default: monitor.interval_ms]
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Tables to probe [default: all]
        #[arg(long, value_delimiter = ',')]
        tables: Vec<Table>,
        /// Reads row counts, probes every table once and exits
        #[arg(long)]
        once: bool,
    },
    /// Applies the schema scripts and exits
    Bootstrap,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Single => "single",
            Command::Multi => "multi",
            Command::Batch { .. } => "batch",
            Command::Update => "update",
            Command::Delete => "delete",
            Command::All => "all",
            Command::Load { .. } => "load",
            Command::Continuous { .. } => "continuous",
            Command::Unlimited { .. } => "unlimited",
            Command::Burst { .. } => "burst",
            Command::Counts => "counts",
            Command::Verify { .. } => "verify",
            Command::Status => "status",
            Command::Cleanup { .. } => "cleanup",
            Command::Monitor { .. } => "monitor",
            Command::Bootstrap => "bootstrap",
        }
    }

    /// Whether the command must pass the readiness gate before it runs.
    ///
    /// `status` reports readiness itself instead of failing on it.
    pub fn requires_ready(&self) -> bool {
        !matches!(self, Command::Bootstrap | Command::Status)
    }

    /// Whether the command writes harness rows and therefore needs the schema in place.
    pub fn writes_rows(&self) -> bool {
        matches!(
            self,
            Command::Single
                | Command::Multi
                | Command::Batch { .. }
                | Command::Update
                | Command::Delete
                | Command::All
                | Command::Load { .. }
                | Command::Continuous { .. }
                | Command::Unlimited { .. }
                | Command::Burst { .. }
                | Command::Monitor { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("cdc-bench").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn numeric_arguments_are_positional_and_optional() {
        let args = parse(&["continuous", "30", "50"]);
        assert_eq!(
            args.command,
            Command::Continuous {
                duration: Some(30),
                rate: Some(50.0)
            }
        );

        let args = parse(&["batch"]);
        assert_eq!(args.command, Command::Batch { n: None });

        let args = parse(&["burst"]);
        assert_eq!(
            args.command,
            Command::Burst {
                bursts: 5,
                size: None,
                pause: 5
            }
        );
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let args = parse(&["single", "--table", "oi", "--format", "json"]);
        assert_eq!(args.table, Table::OrderItems);
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.log_target, None);
    }

    #[test]
    fn unknown_tables_are_rejected() {
        let result = Args::try_parse_from(["cdc-bench", "--table", "invoices", "single"]);
        assert!(result.is_err());
    }

    #[test]
    fn monitor_takes_a_table_list() {
        let args = parse(&["monitor", "--tables", "orders,products", "--interval-ms", "250"]);
        assert_eq!(
            args.command,
            Command::Monitor {
                interval_ms: Some(250),
                tables: vec![Table::Orders, Table::Products],
                once: false,
            }
        );

        let args = parse(&["monitor", "--once"]);
        assert!(matches!(args.command, Command::Monitor { once: true, .. }));
    }

    #[test]
    fn bootstrap_and_status_skip_the_gate() {
        assert!(!Command::Bootstrap.requires_ready());
        assert!(!Command::Status.requires_ready());
        assert!(Command::Counts.requires_ready());
        assert!(!Command::Counts.writes_rows());
        assert!(Command::All.writes_rows());
    }
}
