//! Fixed-size worker pool that leases jobs and runs their campaign scripts.
//!
//! Workers share one input queue of `WorkerCommand`s and one acknowledgement
//! queue. Draining pushes `Exit` once per worker and waits for the same
//! number of `WorkerAck::Exit` replies.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::commands::{new_trace_id, ExecContext};
use crate::app::config::{AppConfig, MAX_POOL_SIZE};
use crate::app::device_status::DeviceStatusMap;
use crate::app::error::AppError;
use crate::app::models::{DeviceState, JobStatus};
use crate::app::state::lock_recover;
use crate::app::vti::{Lease, LeaseClient};

/// Runs the campaign script of a leased job.
pub trait JobExecutor: Send + Sync {
    fn execute_job(&self, lease: &Lease, exec: &ExecContext, trace_id: &str) -> Result<bool, AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    Lease,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerAck {
    Exit,
}

/// Cloneable sender side of the pool's input queue.
#[derive(Clone)]
pub struct JobPoolHandle {
    sender: Sender<WorkerCommand>,
    size: usize,
}

impl JobPoolHandle {
    pub fn request_lease(&self, count: usize, trace_id: &str) -> Result<(), AppError> {
        for _ in 0..count {
            self.sender
                .send(WorkerCommand::Lease)
                .map_err(|_| AppError::system("job pool is shut down", trace_id))?;
        }
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

#[derive(Debug, Clone)]
pub struct JobPoolOptions {
    pub size: usize,
    pub hostname: String,
    pub exclusive: bool,
    pub log_root: PathBuf,
}

impl JobPoolOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            size: config.job_pool.pool_size,
            hostname: config.hostname(),
            exclusive: config.job_pool.exclusive_lease,
            log_root: config.tmp_root(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub acks: usize,
    /// Acknowledgements still queued after the expected ones were read.
    pub stray: usize,
}

pub struct JobPool {
    sender: Sender<WorkerCommand>,
    acks: Receiver<WorkerAck>,
    workers: Vec<JoinHandle<()>>,
    size: usize,
}

impl JobPool {
    pub fn start(
        options: JobPoolOptions,
        executor: Arc<dyn JobExecutor>,
        lease_client: Arc<dyn LeaseClient>,
        devices: Arc<DeviceStatusMap>,
    ) -> Result<Self, AppError> {
        let size = options.size.clamp(1, MAX_POOL_SIZE);
        let (sender, inputs) = mpsc::channel::<WorkerCommand>();
        let (ack_sender, acks) = mpsc::channel::<WorkerAck>();
        let inputs = Arc::new(Mutex::new(inputs));
        let options = Arc::new(options);

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let worker = Worker {
                index,
                options: Arc::clone(&options),
                executor: Arc::clone(&executor),
                lease_client: Arc::clone(&lease_client),
                devices: Arc::clone(&devices),
            };
            let inputs = Arc::clone(&inputs);
            let ack_sender = ack_sender.clone();
            let handle = thread::Builder::new()
                .name(format!("job-worker-{index}"))
                .spawn(move || worker.run(&inputs, &ack_sender))
                .map_err(|err| AppError::system(format!("Failed to spawn job worker: {err}"), ""))?;
            workers.push(handle);
        }
        info!(size, hostname = %options.hostname, "job pool started");

        Ok(Self {
            sender,
            acks,
            workers,
            size,
        })
    }

    pub fn handle(&self) -> JobPoolHandle {
        JobPoolHandle {
            sender: self.sender.clone(),
            size: self.size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Sends `Exit` once per worker, waits for as many acknowledgements and
    /// joins every thread. Workers finish their current job first.
    pub fn shutdown(self) -> DrainReport {
        for _ in 0..self.size {
            if self.sender.send(WorkerCommand::Exit).is_err() {
                break;
            }
        }
        let mut acks = 0;
        while acks < self.size {
            match self.acks.recv() {
                Ok(WorkerAck::Exit) => acks += 1,
                Err(_) => break,
            }
        }
        for worker in self.workers {
            if worker.join().is_err() {
                warn!("job worker panicked");
            }
        }
        let stray = self.acks.try_iter().count();
        info!(acks, stray, "job pool drained");
        DrainReport { acks, stray }
    }
}

struct Worker {
    index: usize,
    options: Arc<JobPoolOptions>,
    executor: Arc<dyn JobExecutor>,
    lease_client: Arc<dyn LeaseClient>,
    devices: Arc<DeviceStatusMap>,
}

impl Worker {
    fn run(&self, inputs: &Mutex<Receiver<WorkerCommand>>, acks: &Sender<WorkerAck>) {
        loop {
            let command = lock_recover(inputs).recv();
            match command {
                Ok(WorkerCommand::Lease) => self.lease_and_run(),
                Ok(WorkerCommand::Exit) => {
                    debug!(worker = self.index, "job worker exiting");
                    let _ = acks.send(WorkerAck::Exit);
                    return;
                }
                Err(_) => return,
            }
        }
    }

    fn lease_and_run(&self) {
        let trace_id = new_trace_id();
        let lease = match self
            .lease_client
            .lease_job(&self.options.hostname, self.options.exclusive)
        {
            Ok(lease) => lease,
            Err(err) => {
                warn!(worker = self.index, trace_id = %trace_id, error = %err, "job lease failed");
                return;
            }
        };
        let Some(script) = lease.script.as_deref() else {
            debug!(worker = self.index, "no job available");
            return;
        };
        info!(
            worker = self.index,
            trace_id = %trace_id,
            job_id = ?lease.job_id,
            script = %script.display(),
            "job leased"
        );
        let started_at = Utc::now();
        let log_dir = self.job_log_dir(&lease);

        let serials = lease.serials();
        let (status, claim) = match SerialClaim::acquire(&self.devices, &serials) {
            Ok(claim) => {
                let exec = ExecContext::for_job(lease.job_id.as_deref());
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.executor.execute_job(&lease, &exec, &trace_id)
                }));
                match outcome {
                    Ok(Ok(true)) => (JobStatus::Complete, Some((claim, DeviceState::Ready))),
                    Ok(Ok(false)) => (JobStatus::InfraError, Some((claim, DeviceState::Ready))),
                    Ok(Err(err)) => {
                        warn!(trace_id = %trace_id, error = %err, "job script failed");
                        (JobStatus::InfraError, Some((claim, DeviceState::Ready)))
                    }
                    Err(_) => {
                        warn!(trace_id = %trace_id, job_id = ?lease.job_id, "job script panicked");
                        (JobStatus::InfraError, Some((claim, DeviceState::Error)))
                    }
                }
            }
            Err(serial) => {
                warn!(trace_id = %trace_id, serial = %serial, "leased device is not available");
                (JobStatus::InfraError, None)
            }
        };

        let log_url = log_dir.to_string_lossy().into_owned();
        if let Err(err) = write_job_summary(&log_dir, &lease, &serials, status, started_at) {
            warn!(trace_id = %trace_id, error = %err, "failed to write job summary");
        }
        if let Err(err) = self.lease_client.stop_heartbeat(&lease, status, &log_url) {
            warn!(trace_id = %trace_id, error = %err, "failed to stop job heartbeat");
        }
        if let Some((claim, final_state)) = claim {
            claim.finish(final_state);
        }
        info!(trace_id = %trace_id, job_id = ?lease.job_id, status = %status, "job finished");
    }

    fn job_log_dir(&self, lease: &Lease) -> PathBuf {
        let root = &self.options.log_root;
        let prefix = format!(
            "job-{}-{}-",
            lease.job_id.as_deref().unwrap_or("local"),
            Utc::now().format("%Y%m%d-%H%M%S")
        );
        let created = fs::create_dir_all(root).and_then(|_| {
            tempfile::Builder::new()
                .prefix(&prefix)
                .tempdir_in(root)
                .map(|dir| dir.into_path())
        });
        match created {
            Ok(dir) => dir,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "failed to create job log dir");
                root.clone()
            }
        }
    }
}

/// Serials marked `use` for the duration of a job. Dropping an unsettled
/// claim marks its serials `error`.
struct SerialClaim<'a> {
    devices: &'a DeviceStatusMap,
    serials: Vec<String>,
    settled: bool,
}

impl<'a> SerialClaim<'a> {
    /// Claims every serial or none; returns the first serial that could not be
    /// claimed. A partial claim puts each serial back in its previous state.
    fn acquire(devices: &'a DeviceStatusMap, serials: &[String]) -> Result<Self, String> {
        let mut claim = Self {
            devices,
            serials: Vec::with_capacity(serials.len()),
            settled: false,
        };
        let mut previous = Vec::with_capacity(serials.len());
        for serial in serials {
            if claim.serials.contains(serial) {
                continue;
            }
            let before = devices.get(serial);
            if !devices.change_state(serial, DeviceState::Use) {
                claim.restore(&previous);
                return Err(serial.clone());
            }
            claim.serials.push(serial.clone());
            previous.push(before);
        }
        Ok(claim)
    }

    fn restore(mut self, previous: &[DeviceState]) {
        for (serial, state) in self.serials.drain(..).zip(previous.iter().copied()) {
            if !self.devices.change_state(&serial, state) {
                warn!(serial = %serial, state = %state, "failed to roll back device claim");
            }
        }
        self.settled = true;
    }

    fn finish(mut self, state: DeviceState) {
        self.settle(state);
    }

    fn settle(&mut self, state: DeviceState) {
        for serial in self.serials.drain(..) {
            if !self.devices.change_state(&serial, state) {
                warn!(serial = %serial, state = %state, "failed to release device");
            }
        }
        self.settled = true;
    }
}

impl Drop for SerialClaim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(DeviceState::Error);
        }
    }
}

#[derive(Serialize)]
struct JobSummary<'a> {
    job_id: Option<&'a str>,
    script: Option<String>,
    serials: &'a [String],
    status: JobStatus,
    started_at: String,
    finished_at: String,
}

fn write_job_summary(
    dir: &Path,
    lease: &Lease,
    serials: &[String],
    status: JobStatus,
    started_at: chrono::DateTime<Utc>,
) -> Result<(), AppError> {
    let summary = JobSummary {
        job_id: lease.job_id.as_deref(),
        script: lease
            .script
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned()),
        serials,
        status,
        started_at: started_at.to_rfc3339(),
        finished_at: Utc::now().to_rfc3339(),
    };
    let raw = serde_json::to_string_pretty(&summary)
        .map_err(|err| AppError::system(format!("Failed to encode job summary: {err}"), ""))?;
    fs::write(dir.join("job.json"), raw)
        .map_err(|err| AppError::system(format!("Failed to write job summary: {err}"), ""))
}
