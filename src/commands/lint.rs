//! Registry lint command

use crate::error::{Error, Result};
use crate::registry::{LintReport, SourceRegistry};
use std::path::Path;
use tracing::info;

/// Lint the registry at `path`. The configured registry falls back to the
/// built-in catalog when absent; an explicitly named file must exist.
pub fn cmd_lint(path: &Path, explicit: bool) -> Result<LintReport> {
    if explicit && !path.exists() {
        return Err(Error::Registry(format!(
            "Registry file not found: {}",
            path.display()
        )));
    }

    let registry = SourceRegistry::load(path)?;
    let report = registry.lint_report().clone();
    info!(
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "Linted registry"
    );
    Ok(report)
}

pub fn print_lint(report: &LintReport) {
    println!("{}", report.render());
}
