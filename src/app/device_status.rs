use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::app::models::DeviceState;
use crate::app::state::lock_recover;

/// Exclusive claim marker per serial. `try_acquire` never blocks.
pub trait SerialLocks: Send {
    fn try_acquire(&mut self, serial: &str) -> io::Result<bool>;
    fn release(&mut self, serial: &str) -> io::Result<()>;
}

#[derive(Default)]
pub struct InMemoryLocks {
    held: HashSet<String>,
}

impl SerialLocks for InMemoryLocks {
    fn try_acquire(&mut self, serial: &str) -> io::Result<bool> {
        Ok(self.held.insert(serial.to_string()))
    }

    fn release(&mut self, serial: &str) -> io::Result<()> {
        self.held.remove(serial);
        Ok(())
    }
}

/// One `<serial>.lock` file per device, shared by every console on the host.
///
/// A claim is an exclusive advisory lock on the open file, so the kernel drops
/// it when the owning process dies. Files stay on disk after release.
pub struct LockFileDir {
    dir: PathBuf,
    held: HashMap<String, File>,
}

impl LockFileDir {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            held: HashMap::new(),
        })
    }

    pub fn lock_path(&self, serial: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", encode_serial(serial)))
    }
}

impl SerialLocks for LockFileDir {
    fn try_acquire(&mut self, serial: &str) -> io::Result<bool> {
        if self.held.contains_key(serial) {
            return Ok(false);
        }
        let path = self.lock_path(serial);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() == fs2::lock_contended_error().kind() {
                return Ok(false);
            }
            return Err(err);
        }
        // Owner pid, for humans inspecting the directory.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        self.held.insert(serial.to_string(), file);
        Ok(true)
    }

    fn release(&mut self, serial: &str) -> io::Result<()> {
        // Only files we locked; another console may own the serial.
        match self.held.remove(serial) {
            Some(file) => FileExt::unlock(&file),
            None => Ok(()),
        }
    }
}

/// Reversible file-name encoding: bytes outside `[A-Za-z0-9.-]` become `_xx`.
fn encode_serial(serial: &str) -> String {
    let mut encoded = String::with_capacity(serial.len());
    for byte in serial.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("_{byte:02x}"));
        }
    }
    encoded
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub serial: String,
    pub previous: DeviceState,
    pub current: DeviceState,
}

pub type TransitionObserver = Arc<dyn Fn(&StateTransition) + Send + Sync>;

struct Inner {
    states: BTreeMap<String, DeviceState>,
    locks: Box<dyn SerialLocks>,
}

/// Shared device status map. Every status write and its lock acquire/release
/// happen under the same mutex, so the map and the locks cannot drift apart.
pub struct DeviceStatusMap {
    inner: Mutex<Inner>,
    observer: Mutex<Option<TransitionObserver>>,
}

impl DeviceStatusMap {
    pub fn new(locks: Box<dyn SerialLocks>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                states: BTreeMap::new(),
                locks,
            }),
            observer: Mutex::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::<InMemoryLocks>::default())
    }

    pub fn with_lock_dir(dir: &Path) -> io::Result<Self> {
        Ok(Self::new(Box::new(LockFileDir::new(dir)?)))
    }

    pub fn set_observer(&self, observer: TransitionObserver) {
        *lock_recover(&self.observer) = Some(observer);
    }

    /// Returns the state, creating an `Unknown` entry on first reference.
    pub fn get(&self, serial: &str) -> DeviceState {
        *lock_recover(&self.inner)
            .states
            .entry(serial.to_string())
            .or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, DeviceState> {
        lock_recover(&self.inner).states.clone()
    }

    pub fn change_state(&self, serial: &str, new_state: DeviceState) -> bool {
        let serial = serial.trim();
        if serial.is_empty() {
            return false;
        }
        let transition = {
            let mut inner = lock_recover(&self.inner);
            let previous = inner.states.get(serial).copied().unwrap_or_default();

            if new_state == DeviceState::Use {
                match inner.locks.try_acquire(serial) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(serial = %serial, "device already claimed");
                        return false;
                    }
                    Err(err) => {
                        warn!(serial = %serial, error = %err, "failed to acquire device lock");
                        return false;
                    }
                }
            }

            inner.states.insert(serial.to_string(), new_state);

            // error -> use re-acquired above; releasing here would drop the new claim.
            if previous.holds_lock() && previous != new_state && new_state != DeviceState::Use {
                if let Err(err) = inner.locks.release(serial) {
                    warn!(serial = %serial, error = %err, "failed to release device lock");
                }
            }

            StateTransition {
                serial: serial.to_string(),
                previous,
                current: new_state,
            }
        };

        debug!(
            serial = %transition.serial,
            previous = %transition.previous,
            current = %transition.current,
            "device state changed"
        );
        let observer = lock_recover(&self.observer).clone();
        if let Some(observer) = observer {
            observer(&transition);
        }
        true
    }
}
