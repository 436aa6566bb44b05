use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::app::build_provider::BuildProviderSet;
use crate::app::config::AppConfig;
use crate::app::device_status::DeviceStatusMap;
use crate::app::job_pool::JobPoolHandle;
use crate::app::placeholders::ArgBuffers;

/// Process-wide console state handed explicitly to processors and workers.
pub struct ConsoleState {
    pub config: AppConfig,
    pub version: String,
    pub devices: Arc<DeviceStatusMap>,
    pub builds: Arc<Mutex<BuildProviderSet>>,
    arg_buffers: Mutex<ArgBuffers>,
    job_queue: Mutex<Option<JobPoolHandle>>,
}

impl ConsoleState {
    pub fn new(config: AppConfig, version: String, devices: Arc<DeviceStatusMap>) -> Self {
        Self {
            config,
            version,
            devices,
            builds: Arc::new(Mutex::new(BuildProviderSet::default())),
            arg_buffers: Mutex::new(HashMap::new()),
            job_queue: Mutex::new(None),
        }
    }

    /// Replaces the processor's buffer with its most recently parsed arguments.
    pub fn record_args(&self, processor: &str, args: HashMap<String, String>) {
        lock_recover(&self.arg_buffers).insert(processor.to_string(), args);
    }

    pub fn set_arg(&self, processor: &str, key: &str, value: impl Into<String>) {
        lock_recover(&self.arg_buffers)
            .entry(processor.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    pub fn arg(&self, processor: &str, key: &str) -> Option<String> {
        lock_recover(&self.arg_buffers)
            .get(processor)
            .and_then(|args| args.get(key))
            .cloned()
    }

    pub fn arg_buffers(&self) -> ArgBuffers {
        lock_recover(&self.arg_buffers).clone()
    }

    pub fn set_job_queue(&self, handle: Option<JobPoolHandle>) {
        *lock_recover(&self.job_queue) = handle;
    }

    pub fn job_queue(&self) -> Option<JobPoolHandle> {
        lock_recover(&self.job_queue).clone()
    }
}

pub(crate) fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
