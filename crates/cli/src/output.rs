use crate::error::CliError;
use engine_runtime::report::JobReport;
use std::path::Path;
use tracing::info;

pub async fn write_report(report: &JobReport, path: &Path) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(path, json).await?;
    info!(path = %path.display(), "Job report written");
    Ok(())
}
