//! Source listing commands

use crate::error::Result;
use crate::registry::{
    AdapterKind, AuthType, RegistryStats, SourceRegistry, SourceStatus, TransportType,
};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One registry source as shown by `backfill sources`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub organization: String,
    pub transport: TransportType,
    pub status: SourceStatus,
    pub auth: AuthType,
    pub adapter: Option<AdapterKind>,
    pub rate_limit_per_hour: Option<u32>,
    pub ready: bool,
    pub products: Vec<ProductInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductInfo {
    pub id: String,
    pub indicator_code: String,
    pub frequency: String,
    pub regime: String,
    pub available_from: String,
    pub available_to: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceListOptions {
    /// Only API/SDMX sources marked active
    pub active_only: bool,
}

/// List registry sources
pub fn cmd_list_sources(registry: &SourceRegistry, options: &SourceListOptions) -> Vec<SourceInfo> {
    info!("Listing sources");

    let sources: Vec<_> = if options.active_only {
        registry.active_sources()
    } else {
        registry.list_sources().iter().collect()
    };

    sources
        .into_iter()
        .map(|s| SourceInfo {
            id: s.id.clone(),
            name: s.name.clone(),
            organization: s.organization.clone(),
            transport: s.transport,
            status: s.status,
            auth: s.auth,
            adapter: s.adapter_kind(),
            rate_limit_per_hour: s.rate_limit_per_hour,
            ready: s.ready,
            products: s
                .products
                .iter()
                .map(|p| ProductInfo {
                    id: p.id.clone(),
                    indicator_code: p.indicator_code().to_string(),
                    frequency: p.frequency.to_string(),
                    regime: p.regime.to_string(),
                    available_from: p.available_from.to_string(),
                    available_to: p.available_to.map(|d| d.to_string()),
                })
                .collect(),
        })
        .collect()
}

/// Registry aggregate counts
pub fn cmd_source_stats(registry: &SourceRegistry) -> Result<RegistryStats> {
    Ok(registry.stats())
}

pub fn print_sources(sources: &[SourceInfo]) {
    println!("\n📚 Registered Sources\n");

    if sources.is_empty() {
        println!("No sources match. Check the registry with 'backfill lint'.");
        return;
    }

    for source in sources {
        let ready = if source.ready { "✓" } else { "✗" };
        println!("{} {} [{} / {}]", ready, source.name, source.transport, source.status);
        println!("  ID: {}", source.id);
        if !source.organization.is_empty() {
            println!("  Organization: {}", source.organization);
        }
        match &source.adapter {
            Some(kind) => println!("  Adapter: {}", kind),
            None => println!("  Adapter: none"),
        }
        if let Some(limit) = source.rate_limit_per_hour {
            println!("  Rate limit: {}/hour", limit);
        }
        for product in &source.products {
            println!(
                "    - {} ({}, {}, {}..{})",
                product.id,
                product.frequency,
                product.regime,
                product.available_from,
                product.available_to.as_deref().unwrap_or("")
            );
        }
        println!();
    }
}

pub fn print_source_stats(stats: &RegistryStats) {
    println!("\n📊 Registry Statistics\n");
    println!("Sources: {} ({} active, {} ready)", stats.total_sources, stats.active_sources, stats.ready_sources);
    println!("Products: {}", stats.total_products);

    let groups = [
        ("By status", &stats.by_status),
        ("By transport", &stats.by_transport),
        ("By frequency", &stats.by_frequency),
        ("By regime", &stats.by_regime),
    ];
    for (title, counts) in groups {
        println!("\n{}:", title);
        for (key, count) in counts {
            println!("  {}: {}", key, count);
        }
    }
}

/// Print source IDs with descriptions for shell completions
pub fn print_source_completions(sources: &[SourceInfo], shell: Shell) {
    for source in sources {
        let description = format!("{} ({})", source.name, source.transport).replace('\n', " ");

        match shell {
            Shell::Zsh => {
                let sanitized = description.replace(':', "\\:");
                println!("{}:{}", source.id, sanitized);
            }
            Shell::Fish => {
                let sanitized = description.replace('\t', " ");
                println!("{}\t{}", source.id, sanitized);
            }
            _ => {
                println!("{}", source.id);
            }
        }
    }
}
