//! Default values for configuration

use super::SlaThreshold;
use crate::calendar::ChunkGranularity;
use crate::coverage::CoverageBasis;

/// Default User-Agent sent to every source API
pub fn default_http_user_agent() -> String {
    format!("backfill-engine/{}", env!("CARGO_PKG_VERSION"))
}

/// Default request timeout in seconds
pub fn default_http_timeout() -> u64 {
    30
}

/// Default redirect limit
pub fn default_http_max_redirects() -> usize {
    5
}

/// Default step granularity inside a yearly chunk
pub fn default_backfill_granularity() -> ChunkGranularity {
    ChunkGranularity::Year
}

/// Default fetch attempts after the first failure
pub fn default_backfill_max_retries() -> u32 {
    3
}

/// Default linear backoff unit between retries (milliseconds)
pub fn default_backfill_retry_backoff() -> u64 {
    1000
}

/// Default size of the rolling per-checkpoint error log
pub fn default_backfill_error_log_limit() -> usize {
    100
}

/// Default number of (source, product) jobs running at once
pub fn default_backfill_max_concurrent_jobs() -> usize {
    4
}

/// Default variance (percent) above which two sources contradict each other
pub fn default_variance_threshold() -> f64 {
    15.0
}

/// Default variance (percent) above which a contradiction is critical
pub fn default_critical_threshold() -> f64 {
    30.0
}

/// Default coverage basis
pub fn default_coverage_basis() -> CoverageBasis {
    CoverageBasis::Native
}

/// Default first year considered by the coverage map
pub fn default_coverage_start_year() -> i32 {
    2010
}

/// Default number of gap drivers listed per rollup
pub fn default_coverage_gap_driver_limit() -> usize {
    5
}

pub fn default_daily_sla() -> SlaThreshold {
    SlaThreshold::new(2, 7)
}

pub fn default_weekly_sla() -> SlaThreshold {
    SlaThreshold::new(10, 21)
}

pub fn default_monthly_sla() -> SlaThreshold {
    SlaThreshold::new(45, 90)
}

pub fn default_quarterly_sla() -> SlaThreshold {
    SlaThreshold::new(120, 180)
}

pub fn default_annual_sla() -> SlaThreshold {
    SlaThreshold::new(400, 730)
}

/// Actor recorded on tickets filed by the freshness monitor
pub fn default_freshness_ticket_actor() -> String {
    "freshness-monitor".to_string()
}

pub fn default_country_iso2() -> String {
    "YE".to_string()
}

pub fn default_country_iso3() -> String {
    "YEM".to_string()
}

pub fn default_country_name() -> String {
    "Yemen".to_string()
}
