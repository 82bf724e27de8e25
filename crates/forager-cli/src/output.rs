use std::io::Write;

use anyhow::{Context, Result};
use clap::ValueEnum;
use forager_core::ToolResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON array of results
    Json,
    /// One row per URL: url, success, error, data (as JSON)
    Csv,
}

/// Write a job's final results to `writer` in the chosen format.
pub fn write_results<W: Write>(
    mut writer: W,
    format: OutputFormat,
    results: &[ToolResult],
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, results)?;
            writeln!(writer)?;
        }
        OutputFormat::Csv => {
            let mut csv = csv::Writer::from_writer(writer);
            csv.write_record(["url", "success", "error", "data"])?;
            for result in results {
                let data = match &result.data {
                    Some(data) => serde_json::to_string(data)?,
                    None => String::new(),
                };
                csv.write_record([
                    result.url.as_str(),
                    if result.success { "true" } else { "false" },
                    result.error.as_deref().unwrap_or_default(),
                    data.as_str(),
                ])?;
            }
            csv.flush().context("Failed to write CSV output")?;
        }
    }
    Ok(())
}
