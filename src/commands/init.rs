//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::catalog::BUILTIN_REGISTRY;
use crate::store::SqliteStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub force: bool,
}

/// What init wrote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitInfo {
    pub config_path: String,
    pub db_path: String,
    pub registry_path: String,
    pub drops_dir: String,
    /// False when an existing registry file was kept
    pub registry_written: bool,
}

/// Write the config, seed the registry file and create the database
pub async fn cmd_init(options: InitOptions) -> Result<InitInfo> {
    let InitOptions {
        base_dir,
        config_path,
        force,
    } = options;

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    let mut config = Config::default();
    config.init_paths(Some(base_dir));
    config.paths.config_file = config_path;
    config.validate()?;
    config.save()?;

    // an operator-edited registry survives a forced re-init
    let registry_written = !config.paths.registry_file.exists();
    if registry_written {
        std::fs::write(&config.paths.registry_file, BUILTIN_REGISTRY)?;
        info!("Wrote source registry to {:?}", config.paths.registry_file);
    }

    std::fs::create_dir_all(&config.paths.drops_dir)?;

    let store = SqliteStore::connect(&config).await?;
    store.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);

    Ok(InitInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        registry_path: config.paths.registry_file.display().to_string(),
        drops_dir: config.paths.drops_dir.display().to_string(),
        registry_written,
    })
}

pub fn print_init(info: &InitInfo) {
    println!("✓ Backfill engine initialized");
    println!("  Config:   {}", info.config_path);
    println!("  Database: {}", info.db_path);
    if info.registry_written {
        println!("  Registry: {} (built-in catalog)", info.registry_path);
    } else {
        println!("  Registry: {} (kept existing file)", info.registry_path);
    }
    println!("  Drops:    {}", info.drops_dir);
    println!("\nNext steps:");
    println!("  backfill lint                                  # Validate the registry");
    println!("  backfill probe                                 # Check source connectivity");
    println!("  backfill run --source wb-wdi --product wb-gdp --from 2026 --to 2020");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_writes_everything() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().to_path_buf();
        let info = cmd_init(InitOptions {
            base_dir: base.clone(),
            config_path: base.join("config.toml"),
            force: false,
        })
        .await
        .unwrap();

        assert!(info.registry_written);
        assert!(base.join("config.toml").exists());
        assert!(base.join("registry.toml").exists());
        assert!(base.join("drops").is_dir());

        let config = Config::load(&base.join("config.toml")).unwrap();
        let store = SqliteStore::connect_initialized(&config).await.unwrap();
        assert!(store.is_initialized().await.unwrap());
    }

    #[tokio::test]
    async fn test_init_refuses_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().to_path_buf();
        let options = InitOptions {
            base_dir: base.clone(),
            config_path: base.join("config.toml"),
            force: false,
        };
        cmd_init(options.clone()).await.unwrap();
        std::fs::write(base.join("registry.toml"), "# edited\n").unwrap();

        assert!(matches!(cmd_init(options.clone()).await, Err(Error::Config(_))));

        let forced = cmd_init(InitOptions {
            force: true,
            ..options
        })
        .await
        .unwrap();
        assert!(!forced.registry_written);
        assert_eq!(
            std::fs::read_to_string(base.join("registry.toml")).unwrap(),
            "# edited\n"
        );
    }
}
