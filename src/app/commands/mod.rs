//! Console command processors.
//!
//! Each processor owns one console verb. The console keeps them in a
//! `CommandRegistry` built at startup and hands every invocation a
//! `CommandContext` carrying the shared state and the build providers of the
//! current run (interactive or leased job).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use clap::{CommandFactory, FromArgMatches, Parser};
use uuid::Uuid;

use crate::app::build_provider::BuildProviderSet;
use crate::app::console::Console;
use crate::app::error::AppError;
use crate::app::state::ConsoleState;

mod adb;
mod config;
mod device;
mod fetch;
mod hook;
mod info;
mod lease;
mod list;
mod sleep;

#[cfg(test)]
mod tests;

pub use adb::AdbProcessor;
pub use config::ConfigProcessor;
pub use device::DeviceProcessor;
pub use fetch::FetchProcessor;
pub use hook::HookProcessor;
pub use info::InfoProcessor;
pub use lease::LeaseProcessor;
pub use list::ListProcessor;
pub use sleep::SleepProcessor;

/// Names handled by the console itself.
pub const BUILTIN_COMMANDS: &[&str] = &["exit", "quit", "help"];

/// Per-run execution scope: which build providers commands see and which job
/// (if any) they belong to.
#[derive(Clone)]
pub struct ExecContext {
    pub builds: Arc<Mutex<BuildProviderSet>>,
    pub job_id: Option<String>,
    /// Whether `exit`/`quit` ends the interactive loop. Off for leased jobs
    /// and campaign scripts.
    pub stoppable: bool,
}

impl ExecContext {
    pub fn interactive(state: &ConsoleState) -> Self {
        Self {
            builds: Arc::clone(&state.builds),
            job_id: None,
            stoppable: true,
        }
    }

    pub fn for_job(job_id: Option<&str>) -> Self {
        Self {
            builds: Arc::new(Mutex::new(BuildProviderSet::default())),
            job_id: job_id.map(str::to_string),
            stoppable: false,
        }
    }

    /// Same providers and job, but `exit` no longer stops the console.
    pub fn nested(&self) -> Self {
        Self {
            stoppable: false,
            ..self.clone()
        }
    }
}

pub struct CommandContext<'a> {
    pub console: &'a Console,
    pub exec: &'a ExecContext,
    pub trace_id: &'a str,
}

impl CommandContext<'_> {
    pub fn state(&self) -> &ConsoleState {
        self.console.state()
    }

    pub fn println(&self, line: impl AsRef<str>) {
        self.console.write_line(line.as_ref());
    }
}

pub trait CommandProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-line description for `help`.
    fn description(&self) -> &'static str;

    /// Full usage text.
    fn help(&self) -> String;

    fn set_up(&self, _state: &ConsoleState) -> Result<(), AppError> {
        Ok(())
    }

    /// `Ok(false)` reports a command that ran but did not succeed.
    fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<bool, AppError>;

    fn tear_down(&self, _state: &ConsoleState) {}
}

#[derive(Default)]
pub struct CommandRegistry {
    processors: BTreeMap<&'static str, Box<dyn CommandProcessor>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every processor the console ships with.
    pub fn with_defaults() -> Result<Self, AppError> {
        let mut registry = Self::new();
        registry.register(Box::new(AdbProcessor))?;
        registry.register(Box::new(ConfigProcessor))?;
        registry.register(Box::new(DeviceProcessor))?;
        registry.register(Box::new(FetchProcessor))?;
        registry.register(Box::new(HookProcessor))?;
        registry.register(Box::new(InfoProcessor))?;
        registry.register(Box::new(LeaseProcessor))?;
        registry.register(Box::new(ListProcessor))?;
        registry.register(Box::new(SleepProcessor))?;
        Ok(registry)
    }

    pub fn register(&mut self, processor: Box<dyn CommandProcessor>) -> Result<(), AppError> {
        let name = processor.name();
        if name.trim().is_empty() || name.contains(char::is_whitespace) {
            return Err(AppError::validation(
                format!("invalid command name '{name}'"),
                "",
            ));
        }
        if BUILTIN_COMMANDS.contains(&name) || self.processors.contains_key(name) {
            return Err(AppError::validation(
                format!("command '{name}' is already registered"),
                "",
            ));
        }
        self.processors.insert(name, processor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn CommandProcessor> {
        self.processors.get(name).map(|processor| processor.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn CommandProcessor> {
        self.processors.values().map(|processor| processor.as_ref())
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

pub enum Parsed<T> {
    Run(T),
    /// `--help` was requested; the rendered text is returned instead.
    Help(String),
}

/// Parses processor arguments with clap and records every argument that has a
/// value into the processor's argument buffer.
pub fn parse_args<T: Parser>(
    ctx: &CommandContext<'_>,
    name: &'static str,
    args: &[String],
) -> Result<Parsed<T>, AppError> {
    let command = T::command().name(name);
    let arg_ids: Vec<String> = command
        .get_arguments()
        .map(|arg| arg.get_id().as_str().to_string())
        .filter(|id| id != "help")
        .collect();
    let argv = std::iter::once(name.to_string()).chain(args.iter().cloned());
    let matches = match command.try_get_matches_from(argv) {
        Ok(matches) => matches,
        Err(err) => {
            return match err.kind() {
                clap::error::ErrorKind::DisplayHelp
                | clap::error::ErrorKind::DisplayVersion => Ok(Parsed::Help(err.to_string())),
                _ => Err(AppError::validation(
                    first_line(&err.to_string()),
                    ctx.trace_id,
                )),
            };
        }
    };
    let parsed = T::from_arg_matches(&matches)
        .map_err(|err| AppError::validation(first_line(&err.to_string()), ctx.trace_id))?;

    let mut recorded = HashMap::new();
    for id in arg_ids {
        if let Ok(Some(values)) = matches.try_get_raw(&id) {
            let joined = values
                .map(|value| value.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(",");
            recorded.insert(id, joined);
        }
    }
    ctx.state().record_args(name, recorded);
    Ok(Parsed::Run(parsed))
}

pub fn render_help<T: CommandFactory>(name: &'static str) -> String {
    T::command().name(name).render_help().to_string()
}

fn first_line(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("invalid arguments")
        .trim_start_matches("error: ")
        .to_string()
}
