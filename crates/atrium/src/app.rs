//! Main application logic and lifecycle management.
//!
//! This module contains the core `Application` struct that orchestrates
//! runtime startup, world creation, health monitoring, and graceful shutdown.

use crate::{
    cli::CliArgs, config::AppConfig, logging::display_banner, signals::setup_signal_handlers,
};
use std::sync::Arc;
use tracing::info;
use world_server::{DefaultClientFactory, MemoryStore, NoStreaming, WorldManager};

/// Main application struct.
///
/// The `Application` struct manages the complete lifecycle of the Atrium
/// server, including configuration loading, world manager construction,
/// startup world creation, health monitoring, and graceful shutdown handling.
///
/// # Architecture
///
/// * **Configuration Management**: Loads and validates configuration from files and CLI
/// * **Runtime Orchestration**: Builds the world manager and ensures configured worlds
/// * **Health Monitoring**: Periodic session, cache and write-back statistics
/// * **Graceful Shutdown**: Handles termination signals and logs every client out
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// The world runtime
    manager: Arc<WorldManager>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// Loads configuration, applies CLI overrides, validates settings, and
    /// constructs the world manager with an in-memory object store.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// A configured `Application` instance ready to run, or an error if
    /// initialization failed.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if args.no_guests {
            config.runtime.guest_allowed = false;
        }
        if args.static_worlds {
            config.runtime.create_worlds = false;
        }

        // Validate configuration
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        // Display banner after logging is setup
        display_banner();

        let manager = Arc::new(WorldManager::new(
            config.runtime.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(DefaultClientFactory),
            Arc::new(NoStreaming),
        ));

        // Log startup information
        info!("🚀 Atrium World Server v{}", env!("CARGO_PKG_VERSION"));
        info!("🏗️ Architecture: Object Cache + Scenes + Write-Back Persistence");
        info!(
            "📂 Config: {} | Configured worlds: {}",
            args.config_path.display(),
            config.worlds.len()
        );

        Ok(Self { config, manager })
    }

    /// Runs the application until a shutdown signal arrives.
    ///
    /// Ensures the configured worlds exist, starts the periodic health
    /// report, waits for a termination signal, and then logs every remaining
    /// client out before reporting final statistics.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Atrium World Server");

        self.log_configuration_summary();

        // Ensure the default world and every configured world exist before
        // the first client arrives
        self.manager.create_worlds(&self.config.worlds).await?;

        // Start monitoring task for real-time statistics
        let monitoring_handle = {
            let manager = self.manager.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
                // The first tick completes immediately; skip it
                interval.tick().await;

                loop {
                    interval.tick().await;

                    let stats = manager.write_back_stats().await;
                    info!(
                        "📊 System Health - {} sessions | {} cached objects | {} writes buffered",
                        manager.session_count(),
                        manager.cache_size(),
                        stats.queued,
                    );
                }
            })
        };

        // Display ready message
        info!("✅ Atrium Server is now running!");
        info!("🔍 Health monitoring active - stats every 60 seconds");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        // Wait for shutdown signal
        setup_signal_handlers().await?;

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");

        monitoring_handle.abort();

        // Capture write-back totals before the logouts drop the buffers
        let stats = self.manager.write_back_stats().await;
        let sessions = self.manager.session_count();

        // Log out every remaining client; this flushes their write-back
        // buffers and runs the usual exit cleanup
        self.manager.shutdown().await;

        info!("📊 Final Statistics:");
        info!("  - Sessions closed: {}", sessions);
        info!("  - Writes queued: {}", stats.queued);
        info!("  - Writes merged: {}", stats.merged);
        info!("  - Buffer flushes: {}", stats.flushes);
        info!("  - Store writes: {}", stats.written);

        info!("✅ Atrium World Server shutdown complete");

        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        let runtime = &self.config.runtime;
        info!("📋 Configuration Summary:");
        info!("  👤 Guest logins: {}", on_off(runtime.guest_allowed));
        info!("  🌍 Worlds on demand: {}", on_off(runtime.create_worlds));
        info!(
            "  📝 Write-back: {} ({}ms flush interval)",
            on_off(runtime.write_back_active),
            runtime.write_back_delay_ms
        );
        if runtime.max_sessions > 0 {
            info!("  👥 Max sessions: {}", runtime.max_sessions);
        } else {
            info!("  👥 Max sessions: unlimited");
        }
        info!(
            "  🔭 Scene: range {:.0} / resolution {:.0} / up to {} objects",
            runtime.scene.range, runtime.scene.resolution, runtime.scene.size
        );
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "enabled"
    } else {
        "disabled"
    }
}
