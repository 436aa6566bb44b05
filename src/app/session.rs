use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;
use tracing::{info, warn};

use crate::app::commands::{new_trace_id, CommandRegistry, ExecContext};
use crate::app::config::{read_version, AppConfig};
use crate::app::console::Console;
use crate::app::device_status::DeviceStatusMap;
use crate::app::error::AppError;
use crate::app::job_pool::{DrainReport, JobPool, JobPoolOptions};
use crate::app::state::ConsoleState;
use crate::app::vti::{HttpLeaseClient, LeaseClient, NoLeaseClient};

/// A running console together with its job pool.
pub struct Session {
    console: Arc<Console>,
    pool: Option<JobPool>,
}

impl Session {
    pub fn start(config: AppConfig) -> Result<Self, AppError> {
        let registry = CommandRegistry::with_defaults()?;
        Self::start_with(config, registry, None)
    }

    /// Starts with an explicit registry and, optionally, a lease client that
    /// replaces the one derived from the config.
    pub fn start_with(
        config: AppConfig,
        registry: CommandRegistry,
        lease_client: Option<Arc<dyn LeaseClient>>,
    ) -> Result<Self, AppError> {
        let devices = if config.device.use_lock_files {
            let dir = config.lock_dir();
            DeviceStatusMap::with_lock_dir(&dir).map_err(|err| {
                AppError::system(
                    format!("Failed to prepare lock dir {}: {err}", dir.display()),
                    "",
                )
            })?
        } else {
            DeviceStatusMap::in_memory()
        };
        let version = match read_version(&config.paths.version_file) {
            version if version.is_empty() => env!("CARGO_PKG_VERSION").to_string(),
            version => version,
        };

        let lease_client = match lease_client {
            Some(client) => client,
            None if config.vti.endpoint.is_empty() => Arc::new(NoLeaseClient),
            None => Arc::new(HttpLeaseClient::new(
                &config.vti.endpoint,
                Duration::from_secs(config.vti.timeout_secs),
            )?),
        };
        let options = JobPoolOptions::from_config(&config);

        let devices = Arc::new(devices);
        let state = Arc::new(ConsoleState::new(config, version, Arc::clone(&devices)));
        let console = Arc::new(Console::new(registry, Arc::clone(&state)));
        console.set_up()?;

        let pool = JobPool::start(options, console.clone(), lease_client, devices)?;
        state.set_job_queue(Some(pool.handle()));
        info!(version = %state.version, pool = pool.size(), "console session started");

        Ok(Self {
            console,
            pool: Some(pool),
        })
    }

    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    /// Runs a campaign script in the interactive scope, printing any failure.
    pub fn run_script(&self, path: &Path) -> bool {
        let trace_id = new_trace_id();
        let exec = ExecContext::interactive(self.console.state());
        match self
            .console
            .run_configurable_script(path, &Map::new(), &exec, &trace_id)
        {
            Ok(ok) => ok,
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err, "campaign script failed");
                self.console.write_line(&err.console_line());
                false
            }
        }
    }

    pub fn repl<R: BufRead>(&self, reader: R) -> bool {
        self.console.start(reader)
    }

    /// Drains the job pool and tears the console down.
    pub fn close(mut self) -> Option<DrainReport> {
        self.console.state().set_job_queue(None);
        let report = self.pool.take().map(JobPool::shutdown);
        self.console.tear_down();
        report
    }
}
