//! Source registry
//!
//! Catalog of data sources and the products (indicators) they publish.
//! Raw TOML entries are linted, then converted into typed values. The
//! registry is immutable once built; [`SharedRegistry`] swaps in a freshly
//! loaded copy on reload so running backfills keep their snapshot.

pub mod catalog;
pub mod lint;

use crate::error::{Error, Result};
use crate::models::{Frequency, RegimeTag};
use chrono::{Datelike, NaiveDate, Utc};
pub use lint::{lint_registry, LintReport};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// How a source is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Api,
    Sdmx,
    Csv,
    Manual,
    Partner,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Api => write!(f, "api"),
            TransportType::Sdmx => write!(f, "sdmx"),
            TransportType::Csv => write!(f, "csv"),
            TransportType::Manual => write!(f, "manual"),
            TransportType::Partner => write!(f, "partner"),
        }
    }
}

impl FromStr for TransportType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "api" | "rest-api" | "rest" => Ok(TransportType::Api),
            "sdmx" => Ok(TransportType::Sdmx),
            "csv" => Ok(TransportType::Csv),
            "manual" => Ok(TransportType::Manual),
            "partner" => Ok(TransportType::Partner),
            _ => Err(Error::Registry(format!("Unknown transport type: {}", s))),
        }
    }
}

/// Operational status of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    RequiresKey,
    RequiresPartnership,
    Manual,
    Inactive,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Active => write!(f, "active"),
            SourceStatus::RequiresKey => write!(f, "requires_key"),
            SourceStatus::RequiresPartnership => write!(f, "requires_partnership"),
            SourceStatus::Manual => write!(f, "manual"),
            SourceStatus::Inactive => write!(f, "inactive"),
        }
    }
}

impl FromStr for SourceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SourceStatus::Active),
            "requires_key" => Ok(SourceStatus::RequiresKey),
            "requires_partnership" => Ok(SourceStatus::RequiresPartnership),
            "manual" => Ok(SourceStatus::Manual),
            "inactive" => Ok(SourceStatus::Inactive),
            _ => Err(Error::Registry(format!("Unknown source status: {}", s))),
        }
    }
}

/// Authentication scheme of a source API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    ApiKey,
    Oauth,
    Basic,
}

impl AuthType {
    /// Whether the scheme needs a secret supplied through the environment
    pub fn needs_credential(&self) -> bool {
        !matches!(self, AuthType::None)
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthType::None => write!(f, "none"),
            AuthType::ApiKey => write!(f, "api_key"),
            AuthType::Oauth => write!(f, "oauth"),
            AuthType::Basic => write!(f, "basic"),
        }
    }
}

impl FromStr for AuthType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(AuthType::None),
            "api_key" => Ok(AuthType::ApiKey),
            "oauth" => Ok(AuthType::Oauth),
            "basic" => Ok(AuthType::Basic),
            _ => Err(Error::Registry(format!("Unknown auth type: {}", s))),
        }
    }
}

/// Fetcher implementation serving a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    WorldBank,
    ImfSdmx,
    Unhcr,
    OchaFts,
    WfpVam,
    FileDrop,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterKind::WorldBank => write!(f, "world_bank"),
            AdapterKind::ImfSdmx => write!(f, "imf_sdmx"),
            AdapterKind::Unhcr => write!(f, "unhcr"),
            AdapterKind::OchaFts => write!(f, "ocha_fts"),
            AdapterKind::WfpVam => write!(f, "wfp_vam"),
            AdapterKind::FileDrop => write!(f, "file_drop"),
        }
    }
}

impl FromStr for AdapterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "world_bank" => Ok(AdapterKind::WorldBank),
            "imf_sdmx" => Ok(AdapterKind::ImfSdmx),
            "unhcr" => Ok(AdapterKind::Unhcr),
            "ocha_fts" => Ok(AdapterKind::OchaFts),
            "wfp_vam" => Ok(AdapterKind::WfpVam),
            "file_drop" => Ok(AdapterKind::FileDrop),
            _ => Err(Error::Registry(format!("Unknown adapter: {}", s))),
        }
    }
}

// ===== Raw (file) representation =====

/// Registry file layout: a list of `[[sources]]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub sources: Vec<RawSource>,
}

/// A source entry as written by operators. Everything is optional so that
/// the linter can report what is missing instead of failing to parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSource {
    pub id: Option<String>,
    pub name: Option<String>,
    pub organization: Option<String>,
    pub transport: Option<String>,
    pub status: Option<String>,
    pub auth: Option<String>,
    pub url: Option<String>,
    pub license: Option<String>,
    pub cadence: Option<String>,
    pub rate_limit_per_hour: Option<u32>,
    pub tolerance_days: Option<u32>,
    pub credential_env: Option<String>,
    pub adapter: Option<String>,
    pub description: Option<String>,
    pub documentation_url: Option<String>,
    pub contact_email: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub products: Vec<RawProduct>,
}

/// A product entry as written by operators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProduct {
    pub id: Option<String>,
    pub name: Option<String>,
    pub frequency: Option<String>,
    pub unit: Option<String>,
    pub available_from: Option<String>,
    pub available_to: Option<String>,
    pub regime: Option<String>,
    /// Canonical indicator code written on observations
    pub indicator: Option<String>,
    /// Code understood by the source API
    pub external_code: Option<String>,
    pub sector: Option<String>,
}

// ===== Typed representation =====

/// A data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub organization: String,
    pub transport: TransportType,
    pub status: SourceStatus,
    pub auth: AuthType,
    pub rate_limit_per_hour: Option<u32>,
    pub base_url: Option<String>,
    pub license: Option<String>,
    pub cadence: Option<Frequency>,
    pub tolerance_days: Option<u32>,
    pub credential_env: Option<String>,
    pub adapter: Option<AdapterKind>,
    pub description: Option<String>,
    pub documentation_url: Option<String>,
    pub contact_email: Option<String>,
    pub notes: Option<String>,
    /// False when the linter reported blocking errors for this source
    pub ready: bool,
    pub products: Vec<Product>,
}

impl Source {
    /// Adapter serving this source, falling back on the transport for
    /// manual and partner feeds
    pub fn adapter_kind(&self) -> Option<AdapterKind> {
        self.adapter.or(match self.transport {
            TransportType::Manual | TransportType::Partner | TransportType::Csv => {
                Some(AdapterKind::FileDrop)
            }
            _ => None,
        })
    }

    /// Read the API secret named by `credential_env`
    pub fn credential(&self) -> Result<String> {
        let var = self
            .credential_env
            .as_deref()
            .ok_or_else(|| Error::Credential(format!("{} has no credential_env", self.id)))?;
        std::env::var(var).map_err(|_| Error::Credential(format!("{} is not set", var)))
    }

    fn from_raw(raw: &RawSource) -> Result<Self> {
        let id = required(&raw.id, "source id")?;
        let products = raw
            .products
            .iter()
            .map(|p| Product::from_raw(p, &id))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: raw.name.clone().unwrap_or_else(|| id.clone()),
            organization: raw.organization.clone().unwrap_or_default(),
            transport: required(&raw.transport, "transport")?.parse()?,
            status: required(&raw.status, "status")?.parse()?,
            auth: raw.auth.as_deref().unwrap_or("none").parse()?,
            rate_limit_per_hour: raw.rate_limit_per_hour,
            base_url: raw.url.clone(),
            license: raw.license.clone(),
            cadence: raw.cadence.as_deref().map(str::parse).transpose()?,
            tolerance_days: raw.tolerance_days,
            credential_env: raw.credential_env.clone(),
            adapter: raw.adapter.as_deref().map(str::parse).transpose()?,
            description: raw.description.clone(),
            documentation_url: raw.documentation_url.clone(),
            contact_email: raw.contact_email.clone(),
            notes: raw.notes.clone(),
            ready: true,
            products,
            id,
        })
    }
}

/// An indicator published by a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub source_id: String,
    pub name: String,
    pub frequency: Frequency,
    pub unit: String,
    pub available_from: NaiveDate,
    pub available_to: Option<NaiveDate>,
    pub regime: RegimeTag,
    pub indicator: Option<String>,
    pub external_code: Option<String>,
    pub sector: Option<String>,
}

impl Product {
    /// Indicator code stored on observations
    pub fn indicator_code(&self) -> &str {
        self.indicator.as_deref().unwrap_or(&self.id)
    }

    /// Whether `year` overlaps the availability window. An open window ends
    /// at `current_year`.
    pub fn is_available_in(&self, year: i32, current_year: i32) -> bool {
        let to_year = self
            .available_to
            .map(|d| d.year())
            .unwrap_or(current_year);
        year >= self.available_from.year() && year <= to_year
    }

    /// Availability window clipped to `[start, end]`
    pub fn clip(&self, start: NaiveDate, end: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let lo = start.max(self.available_from);
        let hi = match self.available_to {
            Some(to) => end.min(to),
            None => end,
        };
        (lo <= hi).then_some((lo, hi))
    }

    fn from_raw(raw: &RawProduct, source_id: &str) -> Result<Self> {
        let id = required(&raw.id, "product id")?;
        Ok(Self {
            source_id: source_id.to_string(),
            name: raw.name.clone().unwrap_or_else(|| id.clone()),
            frequency: required(&raw.frequency, "frequency")?.parse()?,
            unit: raw.unit.clone().unwrap_or_default(),
            available_from: parse_date(&required(&raw.available_from, "available_from")?)?,
            available_to: raw.available_to.as_deref().map(parse_date).transpose()?,
            regime: required(&raw.regime, "regime")?.parse()?,
            indicator: raw.indicator.clone(),
            external_code: raw.external_code.clone(),
            sector: raw.sector.clone(),
            id,
        })
    }
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::Registry(format!("missing {}", field))),
    }
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::Registry(format!("invalid date '{}': {}", s, e)))
}

/// Aggregate registry statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_sources: usize,
    pub active_sources: usize,
    pub ready_sources: usize,
    pub total_products: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_transport: BTreeMap<String, usize>,
    pub by_frequency: BTreeMap<String, usize>,
    pub by_regime: BTreeMap<String, usize>,
}

/// Immutable catalog of sources and products
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<Source>,
    source_index: HashMap<String, usize>,
    product_index: HashMap<String, (usize, usize)>,
    lint: LintReport,
}

impl SourceRegistry {
    /// Build from a parsed registry file. Entries that cannot be typed are
    /// dropped; entries with blocking lint errors are kept but not ready.
    pub fn from_file(file: &RegistryFile) -> Self {
        let lint = lint_registry(file);
        let blocked = lint.blocked_sources();

        let mut sources: Vec<Source> = Vec::new();
        let mut source_index = HashMap::new();
        let mut product_index = HashMap::new();

        for raw in &file.sources {
            let mut source = match Source::from_raw(raw) {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        source = raw.id.as_deref().unwrap_or("<unnamed>"),
                        "Skipping registry entry: {}", e
                    );
                    continue;
                }
            };

            if source_index.contains_key(&source.id) {
                warn!(source = %source.id, "Skipping duplicate source id");
                continue;
            }

            source.ready = !blocked.contains(&source.id);

            let idx = sources.len();
            let mut kept = Vec::with_capacity(source.products.len());
            for product in source.products.drain(..) {
                if product_index.contains_key(&product.id) {
                    warn!(product = %product.id, "Skipping duplicate product id");
                    continue;
                }
                product_index.insert(product.id.clone(), (idx, kept.len()));
                kept.push(product);
            }
            source.products = kept;
            source_index.insert(source.id.clone(), idx);
            sources.push(source);
        }

        debug!(
            sources = sources.len(),
            products = product_index.len(),
            "Built source registry"
        );

        Self {
            sources,
            source_index,
            product_index,
            lint,
        }
    }

    /// Parse a registry from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(content)?;
        Ok(Self::from_file(&file))
    }

    /// The built-in flagship catalog
    pub fn builtin() -> Result<Self> {
        Self::from_toml(catalog::BUILTIN_REGISTRY)
    }

    /// Load from `path`, or the built-in catalog when the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading source registry from {:?}", path);
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)
        } else {
            debug!("No registry file at {:?}, using built-in catalog", path);
            Self::builtin()
        }
    }

    pub fn list_sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn get_source(&self, id: &str) -> Option<&Source> {
        self.source_index.get(id).map(|&i| &self.sources[i])
    }

    /// Like [`get_source`](Self::get_source) but an error when absent
    pub fn source(&self, id: &str) -> Result<&Source> {
        self.get_source(id)
            .ok_or_else(|| Error::SourceNotFound(id.to_string()))
    }

    pub fn list_products(&self) -> Vec<&Product> {
        self.sources.iter().flat_map(|s| s.products.iter()).collect()
    }

    pub fn get_product(&self, id: &str) -> Option<&Product> {
        self.product_index
            .get(id)
            .map(|&(s, p)| &self.sources[s].products[p])
    }

    pub fn product(&self, id: &str) -> Result<&Product> {
        self.get_product(id)
            .ok_or_else(|| Error::ProductNotFound(id.to_string()))
    }

    /// True iff `year` falls within the product's availability window
    pub fn is_product_available(&self, product_id: &str, year: i32) -> bool {
        self.is_product_available_at(product_id, year, Utc::now().year())
    }

    pub fn is_product_available_at(&self, product_id: &str, year: i32, current_year: i32) -> bool {
        self.get_product(product_id)
            .map(|p| p.is_available_in(year, current_year))
            .unwrap_or(false)
    }

    /// Active sources reachable over an API (ready for automated backfill)
    pub fn active_sources(&self) -> Vec<&Source> {
        self.sources
            .iter()
            .filter(|s| {
                s.status == SourceStatus::Active
                    && matches!(s.transport, TransportType::Api | TransportType::Sdmx)
            })
            .collect()
    }

    pub fn products_by_frequency(&self, frequency: Frequency) -> Vec<&Product> {
        self.list_products()
            .into_iter()
            .filter(|p| p.frequency == frequency)
            .collect()
    }

    pub fn products_by_regime(&self, regime: RegimeTag) -> Vec<&Product> {
        self.list_products()
            .into_iter()
            .filter(|p| p.regime == regime)
            .collect()
    }

    pub fn is_ready(&self, source_id: &str) -> bool {
        self.get_source(source_id).map(|s| s.ready).unwrap_or(false)
    }

    /// Lint report computed when the registry was built
    pub fn lint_report(&self) -> &LintReport {
        &self.lint
    }

    pub fn stats(&self) -> RegistryStats {
        let mut by_status = BTreeMap::new();
        let mut by_transport = BTreeMap::new();
        let mut by_frequency = BTreeMap::new();
        let mut by_regime = BTreeMap::new();

        for source in &self.sources {
            *by_status.entry(source.status.to_string()).or_insert(0) += 1;
            *by_transport.entry(source.transport.to_string()).or_insert(0) += 1;
            for product in &source.products {
                *by_frequency.entry(product.frequency.to_string()).or_insert(0) += 1;
                *by_regime.entry(product.regime.to_string()).or_insert(0) += 1;
            }
        }

        RegistryStats {
            total_sources: self.sources.len(),
            active_sources: self
                .sources
                .iter()
                .filter(|s| s.status == SourceStatus::Active)
                .count(),
            ready_sources: self.sources.iter().filter(|s| s.ready).count(),
            total_products: self.product_index.len(),
            by_status,
            by_transport,
            by_frequency,
            by_regime,
        }
    }
}

/// Reloadable handle to the current registry
#[derive(Clone)]
pub struct SharedRegistry {
    path: PathBuf,
    current: Arc<RwLock<Arc<SourceRegistry>>>,
}

impl SharedRegistry {
    /// Load the registry at `path` (or the built-in catalog)
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let registry = SourceRegistry::load(&path)?;
        Ok(Self {
            path,
            current: Arc::new(RwLock::new(Arc::new(registry))),
        })
    }

    /// Wrap an already built registry (fixtures)
    pub fn from_registry(registry: SourceRegistry) -> Self {
        Self {
            path: PathBuf::new(),
            current: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// The registry as of now. Holders keep this copy across reloads.
    pub fn snapshot(&self) -> Arc<SourceRegistry> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Re-read the registry file and swap it in
    pub fn reload(&self) -> Result<Arc<SourceRegistry>> {
        let fresh = Arc::new(SourceRegistry::load(&self.path)?);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&fresh);
        info!(sources = fresh.list_sources().len(), "Reloaded source registry");
        Ok(fresh)
    }
}
