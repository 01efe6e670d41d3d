//! Registry lint
//!
//! Blocking errors keep a source out of backfill; warnings are advisory.

use crate::error::{Error, Result};
use crate::models::{is_known_sector, Frequency, RegimeTag};
use crate::registry::{
    parse_date, AuthType, RawProduct, RawSource, RegistryFile, SourceStatus, TransportType,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One lint finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintFinding {
    pub severity: Severity,
    pub rule: String,
    pub source_id: Option<String>,
    pub product_id: Option<String>,
    pub message: String,
}

/// Structured lint result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LintReport {
    pub sources_checked: usize,
    pub products_checked: usize,
    pub errors: Vec<LintFinding>,
    pub warnings: Vec<LintFinding>,
}

impl LintReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn passed(&self) -> bool {
        !self.has_errors()
    }

    /// Source ids with at least one blocking error
    pub fn blocked_sources(&self) -> HashSet<String> {
        self.errors
            .iter()
            .filter_map(|f| f.source_id.clone())
            .collect()
    }

    /// CI gate: an error when any blocking finding exists
    pub fn ensure_clean(&self) -> Result<()> {
        if self.has_errors() {
            Err(Error::Lint(self.errors.len()))
        } else {
            Ok(())
        }
    }

    /// Human-readable rendering
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Registry lint");
        let _ = writeln!(
            out,
            "  Checked {} sources, {} products",
            self.sources_checked, self.products_checked
        );

        if !self.errors.is_empty() {
            let _ = writeln!(out, "\nErrors ({}):", self.errors.len());
            for f in &self.errors {
                let _ = writeln!(out, "  ✗ [{}] {}: {}", f.rule, location(f), f.message);
            }
        }

        if !self.warnings.is_empty() {
            let _ = writeln!(out, "\nWarnings ({}):", self.warnings.len());
            for f in &self.warnings {
                let _ = writeln!(out, "  ⚠ [{}] {}: {}", f.rule, location(f), f.message);
            }
        }

        let verdict = if self.passed() {
            "✓ Registry lint passed"
        } else {
            "✗ Registry lint failed"
        };
        let _ = writeln!(
            out,
            "\n{} ({} errors, {} warnings)",
            verdict,
            self.errors.len(),
            self.warnings.len()
        );
        out
    }

    fn push(&mut self, severity: Severity, rule: &str, source: &str, product: Option<&str>, message: String) {
        let finding = LintFinding {
            severity,
            rule: rule.to_string(),
            source_id: Some(source.to_string()),
            product_id: product.map(str::to_string),
            message,
        };
        match severity {
            Severity::Error => self.errors.push(finding),
            Severity::Warning => self.warnings.push(finding),
        }
    }
}

fn location(f: &LintFinding) -> String {
    match (&f.source_id, &f.product_id) {
        (Some(s), Some(p)) => format!("{}/{}", s, p),
        (Some(s), None) => s.clone(),
        (None, Some(p)) => p.clone(),
        (None, None) => "registry".to_string(),
    }
}

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
}

fn id_pattern() -> Option<&'static Regex> {
    static ID: OnceLock<Option<Regex>> = OnceLock::new();
    ID.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").ok())
        .as_ref()
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

fn check_enum<T: FromStr>(
    report: &mut LintReport,
    rule: &str,
    value: &Option<String>,
    source: &str,
    product: Option<&str>,
    field: &str,
) -> Option<T> {
    match value.as_deref() {
        None => {
            report.push(Severity::Error, rule, source, product, format!("missing {}", field));
            None
        }
        Some(v) => match v.parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                report.push(
                    Severity::Error,
                    rule,
                    source,
                    product,
                    format!("invalid {} '{}'", field, v),
                );
                None
            }
        },
    }
}

/// Lint every entry of a registry file
pub fn lint_registry(file: &RegistryFile) -> LintReport {
    let mut report = LintReport {
        sources_checked: file.sources.len(),
        ..Default::default()
    };

    let mut source_ids: HashMap<String, usize> = HashMap::new();
    let mut product_ids: HashMap<String, usize> = HashMap::new();

    for (index, raw) in file.sources.iter().enumerate() {
        let label = match raw.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let label = format!("sources[{}]", index);
                report.push(Severity::Error, "id-required", &label, None, "missing source id".into());
                label
            }
        };

        *source_ids.entry(label.clone()).or_insert(0) += 1;
        lint_source(&mut report, raw, &label);

        for product in &raw.products {
            report.products_checked += 1;
            if let Some(pid) = product.id.as_deref() {
                *product_ids.entry(pid.to_string()).or_insert(0) += 1;
            }
            lint_product(&mut report, product, &label);
        }
    }

    for (id, count) in source_ids.into_iter().filter(|(_, c)| *c > 1) {
        report.push(
            Severity::Error,
            "id-unique",
            &id,
            None,
            format!("source id used {} times", count),
        );
    }

    for (pid, count) in product_ids.into_iter().filter(|(_, c)| *c > 1) {
        let owners: Vec<String> = file
            .sources
            .iter()
            .filter(|s| s.products.iter().any(|p| p.id.as_deref() == Some(pid.as_str())))
            .filter_map(|s| s.id.clone())
            .collect();
        for owner in owners {
            report.push(
                Severity::Error,
                "id-unique",
                &owner,
                Some(pid.as_str()),
                format!("product id used {} times", count),
            );
        }
    }

    report
}

fn lint_source(report: &mut LintReport, raw: &RawSource, id: &str) {
    for (field, value) in [
        ("name", &raw.name),
        ("organization", &raw.organization),
        ("url", &raw.url),
        ("license", &raw.license),
    ] {
        if blank(value) {
            report.push(
                Severity::Error,
                "field-required",
                id,
                None,
                format!("missing {}", field),
            );
        }
    }

    if let Some(url) = raw.url.as_deref().filter(|u| !u.trim().is_empty()) {
        if url::Url::parse(url).is_err() {
            report.push(Severity::Error, "url-valid", id, None, format!("invalid url '{}'", url));
        }
    }

    if let (Some(v), Some(re)) = (raw.id.as_deref(), id_pattern()) {
        if !re.is_match(v) {
            report.push(
                Severity::Warning,
                "id-format",
                id,
                None,
                "ids should be lowercase letters, digits, '-' or '_'".into(),
            );
        }
    }

    check_enum::<Frequency>(report, "cadence-enum", &raw.cadence, id, None, "cadence");
    let transport = check_enum::<TransportType>(report, "transport-enum", &raw.transport, id, None, "transport");
    let status = check_enum::<SourceStatus>(report, "status-enum", &raw.status, id, None, "status");

    let auth = match raw.auth.as_deref() {
        None => Some(AuthType::None),
        Some(_) => check_enum::<AuthType>(report, "auth-enum", &raw.auth, id, None, "auth"),
    };

    if let Some(adapter) = raw.adapter.as_deref() {
        if adapter.parse::<crate::registry::AdapterKind>().is_err() {
            report.push(
                Severity::Error,
                "adapter-enum",
                id,
                None,
                format!("invalid adapter '{}'", adapter),
            );
        }
    }

    if let Some(auth) = auth {
        let has_env = !blank(&raw.credential_env);
        if auth.needs_credential() && !has_env {
            report.push(
                Severity::Error,
                "auth-consistent",
                id,
                None,
                format!("auth '{}' requires credential_env", auth),
            );
        }
        if !auth.needs_credential() && has_env {
            report.push(
                Severity::Error,
                "auth-consistent",
                id,
                None,
                "auth 'none' must not name a credential_env".into(),
            );
        }
        if status == Some(SourceStatus::RequiresKey) && !auth.needs_credential() {
            report.push(
                Severity::Error,
                "auth-consistent",
                id,
                None,
                "status 'requires_key' needs a credentialed auth type".into(),
            );
        }
    }

    if raw.tolerance_days.is_none() {
        report.push(
            Severity::Warning,
            "tolerance-window",
            id,
            None,
            "no tolerance_days window declared".into(),
        );
    }

    if blank(&raw.description) {
        report.push(Severity::Warning, "description", id, None, "missing description".into());
    }

    let partnership = status == Some(SourceStatus::RequiresPartnership)
        || transport == Some(TransportType::Partner);
    if partnership {
        match raw.contact_email.as_deref() {
            Some(email) if email_pattern().map_or(true, |re| re.is_match(email)) => {}
            Some(email) => report.push(
                Severity::Warning,
                "contact-email",
                id,
                None,
                format!("contact_email '{}' does not look like an address", email),
            ),
            None => report.push(
                Severity::Warning,
                "contact-email",
                id,
                None,
                "partnership source has no contact_email".into(),
            ),
        }
    }

    if raw.products.is_empty() {
        report.push(Severity::Warning, "products", id, None, "source publishes no products".into());
    }
}

fn lint_product(report: &mut LintReport, raw: &RawProduct, source: &str) {
    let pid = raw.id.as_deref().filter(|v| !v.trim().is_empty());
    if pid.is_none() {
        report.push(Severity::Error, "id-required", source, None, "product without id".into());
    }
    let pid = pid.unwrap_or("<unnamed>");

    check_enum::<Frequency>(report, "cadence-enum", &raw.frequency, source, Some(pid), "frequency");
    check_enum::<RegimeTag>(report, "regime-enum", &raw.regime, source, Some(pid), "regime");

    if blank(&raw.unit) {
        report.push(Severity::Warning, "unit", source, Some(pid), "missing unit".into());
    }

    let from = match raw.available_from.as_deref() {
        None => {
            report.push(
                Severity::Error,
                "availability",
                source,
                Some(pid),
                "missing available_from".into(),
            );
            None
        }
        Some(v) => match parse_date(v) {
            Ok(d) => Some(d),
            Err(e) => {
                report.push(Severity::Error, "availability", source, Some(pid), e.to_string());
                None
            }
        },
    };

    if let Some(to) = raw.available_to.as_deref() {
        match parse_date(to) {
            Ok(to) if from.is_some_and(|f| f > to) => report.push(
                Severity::Error,
                "availability",
                source,
                Some(pid),
                "available_to precedes available_from".into(),
            ),
            Ok(_) => {}
            Err(e) => report.push(Severity::Error, "availability", source, Some(pid), e.to_string()),
        }
    }

    match raw.sector.as_deref() {
        None => report.push(Severity::Warning, "sector", source, Some(pid), "no sector mapping".into()),
        Some(sector) if !is_known_sector(sector) => report.push(
            Severity::Warning,
            "sector",
            source,
            Some(pid),
            format!("unknown sector '{}'", sector),
        ),
        Some(_) => {}
    }
}
