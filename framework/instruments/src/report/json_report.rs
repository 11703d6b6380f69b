use crate::report::ReportCollector;
use anyhow::Context;
use gale_summary_model::Report;
use std::io::Write;
use std::path::PathBuf;

/// Where the JSON report is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonTarget {
    Stdout,
    /// Created or truncated when the report is written.
    File(PathBuf),
}

/// Writes the report as pretty-printed JSON for other tools to consume.
#[derive(Debug)]
pub struct JsonReporter {
    target: JsonTarget,
}

impl JsonReporter {
    pub fn new(target: JsonTarget) -> Self {
        Self { target }
    }
}

impl ReportCollector for JsonReporter {
    fn finalize(&self, report: &Report) -> anyhow::Result<()> {
        match &self.target {
            JsonTarget::Stdout => {
                let mut stdout = std::io::stdout().lock();
                serde_json::to_writer_pretty(&mut stdout, report)
                    .context("Failed to write JSON report to stdout")?;
                stdout.write_all(b"\n")?;
            }
            JsonTarget::File(path) => {
                let file = std::fs::File::create(path).with_context(|| {
                    format!("Failed to create JSON report file: {}", path.display())
                })?;
                let mut writer = std::io::BufWriter::new(file);
                serde_json::to_writer_pretty(&mut writer, report)
                    .context("Failed to write JSON report")?;
                writer.flush()?;
                log::info!("Wrote JSON report to {}", path.display());
            }
        }

        Ok(())
    }
}
