use std::sync::Arc;
use std::time::Duration;

use castellan_api::{ApiServer, ApiState};
use castellan_auth::{AdminDirectory, BOOTSTRAP_USERNAME, DirectoryOptions};
use castellan_config::{ConfigStore, ConfigStoreOptions, StreamingUserRegistry};
use castellan_control::{
    ChangeCoordinator, CommandRunner, ControllerOptions, Firewall, HttpHealthProbe, LogCommand,
    LogStreamer, MediaApiClient, NoFirewall, ProtocolFirewallSync, RecordingLibrary,
    ServiceController, ServiceManager, SystemRunner, SystemdManager, UfwFirewall,
};
use castellan_events::EventBus;
use castellan_telemetry::{DEFAULT_LOG_LEVEL, LoggingConfig, Metrics};
use castellan_updater::{
    AutoUpdater, DEFAULT_ARTIFACT_NAME, FinalizeHandoff, FinalizeOutcome, GitHubReleaseFeed,
    UpdaterHost, UpdaterOptions,
};
use clap::Parser;
use tracing::{info, warn};

use crate::cli::{Cli, Command};
use crate::error::{AppError, AppResult};
use crate::settings::{ConsoleSettings, FirewallBackend};

const CONSOLE_VERSION: &str = env!("CARGO_PKG_VERSION");
const FINALIZE_UNIT: &str = "castellan-finalize";
const ADMIN_STORE_FILE: &str = "admins.json";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(20);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const MEDIA_API_TIMEOUT: Duration = Duration::from_secs(5);
const FEED_TIMEOUT: Duration = Duration::from_secs(60);

/// Collaborators shared by every subcommand.
struct Foundation {
    settings: ConsoleSettings,
    runner: Arc<dyn CommandRunner>,
    manager: Arc<dyn ServiceManager>,
    store: Arc<ConfigStore>,
    events: EventBus,
    metrics: Metrics,
}

impl Foundation {
    fn from_settings(settings: ConsoleSettings) -> AppResult<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(COMMAND_TIMEOUT));
        let manager: Arc<dyn ServiceManager> = Arc::new(SystemdManager::new(runner.clone()));
        let mut store_options =
            ConfigStoreOptions::new(&settings.config_path, &settings.backup_dir);
        store_options.lock_policy = settings.lock_policy;
        store_options.backup_retention = settings.backup_keep;
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self {
            runner,
            manager,
            store: ConfigStore::new(store_options),
            events: EventBus::new(),
            metrics,
            settings,
        })
    }

    fn updater(&self) -> AppResult<AutoUpdater> {
        let settings = &self.settings;
        let install_path = std::env::current_exe().map_err(|source| AppError::Io {
            operation: "updater.current_exe",
            source,
        })?;
        let feed =
            GitHubReleaseFeed::new(&settings.release_feed, DEFAULT_ARTIFACT_NAME, FEED_TIMEOUT)
                .map_err(|err| AppError::update("updater.feed", err))?;
        let probe = HttpHealthProbe::new(settings.console_health_url(), PROBE_TIMEOUT)
            .map_err(|err| AppError::control("updater.probe", err))?;
        let host = UpdaterHost {
            feed: Arc::new(feed),
            manager: self.manager.clone(),
            probe: Arc::new(probe),
            handoff: FinalizeHandoff::new(
                self.runner.clone(),
                FINALIZE_UNIT,
                settings.forwarded_env(),
            ),
        };
        Ok(AutoUpdater::new(
            UpdaterOptions::new(
                install_path,
                &settings.data_dir,
                &settings.console_unit,
                CONSOLE_VERSION,
            ),
            host,
            Arc::clone(&self.store),
            self.events.clone(),
            self.metrics.clone(),
        ))
    }
}

/// Entry point for the console binary: parse the command line, load settings
/// from the environment, install logging and run the chosen subcommand.
///
/// # Errors
///
/// Returns an error if settings are invalid, wiring fails, or the chosen
/// subcommand fails.
pub async fn run_app() -> AppResult<()> {
    let cli = Cli::parse();
    let settings = ConsoleSettings::from_env()?;
    castellan_telemetry::init_logging(&LoggingConfig {
        level: DEFAULT_LOG_LEVEL,
        format: settings.log_format,
        build_sha: option_env!("CASTELLAN_BUILD_SHA").unwrap_or("dev"),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;

    let foundation = Foundation::from_settings(settings)?;
    match cli.command.unwrap_or_default() {
        Command::Serve => Box::pin(serve(&foundation)).await,
        Command::FinalizeUpdate => finalize_update(&foundation).await,
    }
}

async fn serve(foundation: &Foundation) -> AppResult<()> {
    info!(version = CONSOLE_VERSION, "Castellan console starting");
    let settings = &foundation.settings;

    let directory = AdminDirectory::open(DirectoryOptions {
        path: settings.data_dir.join(ADMIN_STORE_FILE),
        session_idle: settings.session_idle,
        allow_registration: settings.allow_registration,
    })
    .await
    .map_err(|err| AppError::auth("directory.open", err))?;
    let configured = settings.bootstrap_password.clone();
    let generated = directory
        .bootstrap(configured)
        .await
        .map_err(|err| AppError::auth("directory.bootstrap", err))?;
    if let Some(password) = generated {
        warn!(
            username = BOOTSTRAP_USERNAME,
            password = %password,
            "generated bootstrap administrator password; change it after signing in"
        );
    }

    let probe = HttpHealthProbe::new(&settings.health_url, PROBE_TIMEOUT)
        .map_err(|err| AppError::control("controller.probe", err))?;
    let mut controller_options = ControllerOptions::new(&settings.service_unit);
    controller_options.restart_timeout = settings.restart_timeout;
    let controller = ServiceController::new(
        controller_options,
        foundation.manager.clone(),
        Arc::new(probe),
        Arc::clone(&foundation.store),
        foundation.events.clone(),
        foundation.metrics.clone(),
    );
    match controller.refresh_from_host().await {
        Ok(state) => info!(
            unit = %settings.service_unit,
            state = state.as_str(),
            "media service observed"
        ),
        Err(err) => warn!(
            error = %err,
            unit = %settings.service_unit,
            "media service state unknown"
        ),
    }

    let firewall: Arc<dyn Firewall> = match settings.firewall {
        FirewallBackend::Ufw => Arc::new(UfwFirewall::new(foundation.runner.clone())),
        FirewallBackend::Disabled => {
            info!("firewall management disabled");
            Arc::new(NoFirewall)
        }
    };
    let sync = Arc::new(ProtocolFirewallSync::new(
        firewall,
        settings.bind.port(),
        foundation.events.clone(),
        foundation.metrics.clone(),
    ));
    let changes = ChangeCoordinator::new(
        Arc::clone(&foundation.store),
        controller,
        sync,
        foundation.events.clone(),
        foundation.metrics.clone(),
    );
    let streams = MediaApiClient::new(&settings.health_url, MEDIA_API_TIMEOUT)
        .map_err(|err| AppError::control("streams.client", err))?;
    let updater = foundation.updater()?;

    let state = Arc::new(ApiState {
        directory,
        changes,
        registry: StreamingUserRegistry::new(Arc::clone(&foundation.store)),
        logs: LogStreamer::new(LogCommand::journal(&settings.service_unit)),
        streams,
        recordings: RecordingLibrary::new(Arc::clone(&foundation.store)),
        updater: Arc::new(updater),
        events: foundation.events.clone(),
        metrics: foundation.metrics.clone(),
        version: CONSOLE_VERSION.to_string(),
    });

    info!(
        addr = %settings.bind,
        config = %settings.config_path.display(),
        "Launching API listener"
    );
    ApiServer::new(state)
        .serve(settings.bind)
        .await
        .map_err(|err| AppError::api_server("api_server.serve", err))?;
    info!("API server shutdown complete");
    Ok(())
}

async fn finalize_update(foundation: &Foundation) -> AppResult<()> {
    let updater = foundation.updater()?;
    match updater
        .finalize()
        .await
        .map_err(|err| AppError::update("updater.finalize", err))?
    {
        FinalizeOutcome::NothingPending => info!("no pending update to finalize"),
        FinalizeOutcome::Applied { version } => info!(%version, "update finalized"),
        FinalizeOutcome::RolledBack {
            version,
            restored,
            reason,
        } => warn!(%version, %restored, %reason, "update rolled back"),
    }
    Ok(())
}
