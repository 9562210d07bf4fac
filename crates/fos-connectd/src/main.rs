//! fOS Connect daemon
//!
//! Runs the orchestrators against the simulated tunnel with a demo host
//! profile and logs every state change.
//!
//! ```text
//! fos-connectd [config.toml] [catalog.toml] [preferences.toml]
//! ```

use anyhow::{Context, Result};
use fos_connect::{
    AppContext, CatalogIndex, Endpoint, MemoryProfileStore, MemoryVault, OpenVpnSettings,
    OrchestratorConfig, Preferences, Profile, ProtocolSettings, StaticProviderCatalog,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let mut args = std::env::args().skip(1).map(PathBuf::from);
    let config = match args.next() {
        Some(path) => OrchestratorConfig::from_toml_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };
    let index = match args.next() {
        Some(path) => CatalogIndex::from_toml_file(&path)
            .with_context(|| format!("loading catalog {}", path.display()))?,
        None => CatalogIndex::default(),
    };
    let preferences = match args.next() {
        Some(path) => Preferences::load(&path)
            .with_context(|| format!("loading preferences {}", path.display()))?,
        None => Preferences::in_memory(),
    };

    info!("fOS Connect starting...");
    info!("Using mimalloc allocator");

    let home = Profile::host(
        "Home",
        ProtocolSettings::OpenVpn(OpenVpnSettings {
            remotes: vec![Endpoint::new("198.51.100.7", 1194)],
            ..OpenVpnSettings::default()
        }),
    );
    let store = Arc::new(MemoryProfileStore::with_profiles([home.clone()]));
    let catalog = Arc::new(StaticProviderCatalog::with_bundled(index));
    let vault = Arc::new(MemoryVault::new());

    let (mut context, _) =
        AppContext::simulated(config, store, catalog, vault, preferences);

    let mut state = context.subscribe();
    let watcher = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let snapshot = state.borrow_and_update().clone();
            info!(
                "State: {} (enabled: {}, data: {:?})",
                snapshot.status, snapshot.is_enabled, snapshot.data_count
            );
        }
    });

    context.set_current(home.id).await?;
    context.connect(home.id, None).await?;
    tokio::time::sleep(Duration::from_secs(7)).await;

    info!("Moving to a custom endpoint");
    context
        .modify_active(|profile| {
            profile.host_custom_endpoint = Some(Endpoint::new("203.0.113.9", 443));
        })
        .await?;
    tokio::time::sleep(Duration::from_secs(4)).await;

    context.disable().await?;
    watcher.abort();

    info!("fOS Connect shutting down");
    Ok(())
}
