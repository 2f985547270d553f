use std::fmt;
use std::io::{self, Write};

use cdc_harness::error::HarnessError;
use clap::ValueEnum;
use serde::Serialize;

use crate::error::BenchResult;

/// Format of the reports written to stdout.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned, human readable text
    #[default]
    Text,
    /// One JSON document per report
    Json,
}

/// Writes `report` to stdout in `format`.
pub fn emit<R>(format: OutputFormat, report: &R) -> BenchResult<()>
where
    R: fmt::Display + Serialize + ?Sized,
{
    let mut stdout = io::stdout().lock();
    write_report(&mut stdout, format, report)?;
    stdout.flush()?;

    Ok(())
}

fn write_report<W, R>(writer: &mut W, format: OutputFormat, report: &R) -> BenchResult<()>
where
    W: Write,
    R: fmt::Display + Serialize + ?Sized,
{
    match format {
        OutputFormat::Text => writeln!(writer, "{report}")?,
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, report).map_err(HarnessError::from)?;
            writeln!(writer)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        table: &'static str,
        latency_ms: u64,
    }

    impl fmt::Display for Sample {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:<10} {}ms", self.table, self.latency_ms)
        }
    }

    fn render(format: OutputFormat) -> String {
        let mut out = Vec::new();
        let sample = Sample {
            table: "orders",
            latency_ms: 1250,
        };
        write_report(&mut out, format, &sample).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn text_reports_use_display() {
        assert_eq!(render(OutputFormat::Text), "orders     1250ms\n");
    }

    #[test]
    fn json_reports_are_single_lines() {
        assert_eq!(
            render(OutputFormat::Json),
            "{\"table\":\"orders\",\"latency_ms\":1250}\n"
        );
    }
}
