use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use portal_core_db::{FileProfileStorage, ProfileKey, ProfileType};
use portal_core_services::services::{
    config::{ProfileManagerConfig, load_config_from_file, save_config_to_file},
    profile_manager::{CopletAdapterRegistry, InMemorySession, PortalUser, ProfileManager},
};
use portal_core_utils::log::init_tracing;

/// Inspect the profiles of a portal-core profile store
#[derive(Parser, Debug)]
#[command(name = "portal-profile", version, about)]
struct Cli {
    /// Path to a profile manager configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Profile store directory (overrides the configuration file)
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Portal name (overrides the configuration file)
    #[arg(long)]
    portal: Option<String>,

    /// Layout key (defaults to the configured default layout key)
    #[arg(long)]
    layout_key: Option<String>,

    /// Log portal-core internals at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print one merged profile as JSON
    Show {
        /// Profile type: copletbasedata, copletdata, copletinstancedata or layout
        #[arg(long = "type")]
        profile_type: ProfileType,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        user: Option<String>,
        /// Walk every tier again instead of serving cached merges
        #[arg(long)]
        forced: bool,
    },

    /// Log a user in and print the session view
    Session {
        #[arg(long)]
        user: String,
        #[arg(long)]
        role: Option<String>,
    },

    /// Check that every global profile document loads
    Validate,

    /// Write the effective configuration to a file
    WriteConfig { path: PathBuf },
}

fn resolve_config(cli: &Cli) -> Result<ProfileManagerConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let (Some(portal), Some(root)) = (&cli.portal, &cli.storage_root) else {
                bail!("Either --config or both --portal and --storage-root are required");
            };
            ProfileManagerConfig::new(portal.clone(), root.clone())
        }
    };

    if let Some(portal) = &cli.portal {
        config.portal_name = portal.clone();
    }
    if let Some(root) = &cli.storage_root {
        config.storage_root = root.clone();
    }
    if let Some(layout_key) = &cli.layout_key {
        config.default_layout_key = layout_key.clone();
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = resolve_config(&cli)?;
    tracing::debug!("Using profile store {}", config.storage_root.display());
    let storage = Arc::new(FileProfileStorage::new(config.storage_root.clone()));
    let manager = ProfileManager::new(config.clone(), storage, CopletAdapterRegistry::new());

    match cli.command {
        Commands::Show {
            profile_type,
            role,
            user,
            forced,
        } => {
            let key = ProfileKey::new(
                config.portal_name.as_str(),
                config.default_layout_key.as_str(),
                profile_type,
            )
            .with_role(role)
            .with_user(user);
            let profile = manager.loader().load(&key, forced)?;
            println!("{}", serde_json::to_string_pretty(&*profile)?);
        }
        Commands::Session { user, role } => {
            let session = InMemorySession::new();
            let mut portal_user = PortalUser::new(user);
            portal_user.role = role;
            manager.login(&session, portal_user)?;

            let layout = manager.get_portal_layout(&session, None, None)?;
            let instances = manager.get_coplet_instances(&session)?;
            let view = serde_json::json!({
                "coplet_instances": instances,
                "layout": layout,
            });
            println!("{}", serde_json::to_string_pretty(&view)?);
            manager.logout(&session);
        }
        Commands::Validate => {
            let mut failures = 0;
            for profile_type in ProfileType::ALL {
                let key = ProfileKey::new(
                    config.portal_name.as_str(),
                    config.default_layout_key.as_str(),
                    profile_type,
                );
                match manager.loader().load(&key, true) {
                    Ok(_) => println!("{profile_type}: ok"),
                    Err(e) => {
                        failures += 1;
                        println!("{profile_type}: {e:#}");
                    }
                }
            }
            if failures > 0 {
                bail!("{failures} profile type(s) failed to load");
            }
        }
        Commands::WriteConfig { path } => {
            save_config_to_file(&config, &path)
                .with_context(|| format!("Failed to write config {}", path.display()))?;
            tracing::info!("Wrote configuration to {}", path.display());
        }
    }

    Ok(())
}
