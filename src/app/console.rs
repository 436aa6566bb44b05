//! Line-oriented console: dispatches command lines and nested command trees
//! to registered processors.

use std::any::Any;
use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::app::campaign::load_campaign;
use crate::app::command_tree::{split_command_line, CommandTree, ExecPolicy};
use crate::app::commands::{
    new_trace_id, CommandContext, CommandRegistry, ExecContext, BUILTIN_COMMANDS,
};
use crate::app::error::AppError;
use crate::app::job_pool::JobExecutor;
use crate::app::placeholders::format_string;
use crate::app::state::{lock_recover, ConsoleState};
use crate::app::vti::Lease;

pub struct Console {
    registry: CommandRegistry,
    state: Arc<ConsoleState>,
    out: Mutex<Box<dyn Write + Send>>,
    policy: ExecPolicy,
    default_exec: ExecContext,
    stop_requested: AtomicBool,
    torn_down: AtomicBool,
}

impl Console {
    pub fn new(registry: CommandRegistry, state: Arc<ConsoleState>) -> Self {
        let policy = ExecPolicy::from_depth(state.config.console.parallel_depth);
        let default_exec = ExecContext::interactive(&state);
        Self {
            registry,
            state,
            out: Mutex::new(Box::new(io::stdout())),
            policy,
            default_exec,
            stop_requested: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn with_output(mut self, out: Box<dyn Write + Send>) -> Self {
        self.out = Mutex::new(out);
        self
    }

    pub fn with_policy(mut self, policy: ExecPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> &ConsoleState {
        &self.state
    }

    pub fn set_up(&self) -> Result<(), AppError> {
        for processor in self.registry.iter() {
            processor.set_up(&self.state)?;
        }
        debug!(processors = self.registry.len(), "console set up");
        Ok(())
    }

    /// Tears every processor down; later calls do nothing.
    pub fn tear_down(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for processor in self.registry.iter() {
            processor.tear_down(&self.state);
        }
    }

    pub fn write_line(&self, line: &str) {
        let mut out = lock_recover(&self.out);
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }

    fn write_prompt(&self) {
        let mut out = lock_recover(&self.out);
        let _ = write!(out, "{}", self.state.config.console.prompt);
        let _ = out.flush();
    }

    /// Runs a command or command tree in the interactive scope.
    ///
    /// Returns `None` for an absent or empty input, otherwise whether every
    /// command that ran succeeded. Failures are printed, never returned.
    pub fn onecmd(&self, tree: Option<&CommandTree>) -> Option<bool> {
        self.onecmd_in(tree, &self.default_exec)
    }

    pub fn onecmd_in(&self, tree: Option<&CommandTree>, exec: &ExecContext) -> Option<bool> {
        let tree = tree.filter(|tree| !tree.is_empty())?;
        Some(self.run_tree(tree, 1, exec))
    }

    fn run_tree(&self, tree: &CommandTree, depth: usize, exec: &ExecContext) -> bool {
        match tree {
            CommandTree::Single(line) => self.execute_line(line, exec),
            CommandTree::List(items) if self.policy.runs_parallel(depth) => {
                self.run_parallel(items, depth, exec)
            }
            CommandTree::List(items) => {
                for item in items.iter().filter(|item| !item.is_empty()) {
                    if !self.run_tree(item, depth + 1, exec) {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// One thread per element; every branch runs to completion before the
    /// results are ANDed.
    fn run_parallel(&self, items: &[CommandTree], depth: usize, exec: &ExecContext) -> bool {
        let branches: Vec<&CommandTree> = items.iter().filter(|item| !item.is_empty()).collect();
        let expected = branches.len();
        let (tx, rx) = mpsc::channel::<bool>();

        thread::scope(|scope| {
            let handles: Vec<_> = branches
                .into_iter()
                .map(|branch| {
                    let tx = tx.clone();
                    scope.spawn(move || {
                        let _ = tx.send(self.run_tree(branch, depth + 1, exec));
                    })
                })
                .collect();
            for handle in handles {
                if handle.join().is_err() {
                    warn!(depth, "parallel branch panicked");
                }
            }
        });
        drop(tx);

        let results: Vec<bool> = rx.iter().collect();
        // A branch that died without reporting counts as a failure.
        results.len() == expected && results.into_iter().all(|ok| ok)
    }

    fn execute_line(&self, line: &str, exec: &ExecContext) -> bool {
        let trace_id = new_trace_id();
        let line = format_string(line, &self.state.arg_buffers());
        info!(trace_id = %trace_id, job_id = ?exec.job_id, command = %line, "executing command");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&line, exec, &trace_id)));
        match outcome {
            Ok(Ok(ok)) => ok,
            Ok(Err(err)) => {
                warn!(trace_id = %trace_id, code = %err.code, error = %err.error, "command failed");
                self.write_line(&err.console_line());
                false
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(trace_id = %trace_id, panic = %message, "command panicked");
                self.write_line(&format!("Panic: {message}"));
                false
            }
        }
    }

    fn dispatch(&self, line: &str, exec: &ExecContext, trace_id: &str) -> Result<bool, AppError> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(true);
        }
        let tokens = split_command_line(trimmed)
            .map_err(|err| AppError::validation(err.error, trace_id))?;
        let Some((name, args)) = tokens.split_first() else {
            return Ok(true);
        };

        match name.as_str() {
            "exit" | "quit" if exec.stoppable => {
                self.stop_requested.store(true, Ordering::SeqCst);
                Ok(true)
            }
            "exit" | "quit" => {
                debug!(
                    trace_id = %trace_id,
                    job_id = ?exec.job_id,
                    command = %name,
                    "exit ignored outside the console loop"
                );
                Ok(true)
            }
            "help" => self.print_help(args.first().map(String::as_str), trace_id),
            _ => {
                let processor = self
                    .registry
                    .get(name)
                    .ok_or_else(|| AppError::unknown_command(name, trace_id))?;
                let ctx = CommandContext {
                    console: self,
                    exec,
                    trace_id,
                };
                processor.run(&ctx, args)
            }
        }
    }

    fn print_help(&self, topic: Option<&str>, trace_id: &str) -> Result<bool, AppError> {
        match topic {
            None => {
                self.write_line("Commands:");
                for processor in self.registry.iter() {
                    self.write_line(&format!(
                        "  {:<10} {}",
                        processor.name(),
                        processor.description()
                    ));
                }
                self.write_line(&format!("  {}", BUILTIN_COMMANDS.join(", ")));
            }
            Some(name) if BUILTIN_COMMANDS.contains(&name) => {
                self.write_line(&format!("{name}: console builtin"));
            }
            Some(name) => {
                let processor = self
                    .registry
                    .get(name)
                    .ok_or_else(|| AppError::unknown_command(name, trace_id))?;
                self.write_line(processor.help().trim_end());
            }
        }
        Ok(true)
    }

    /// Interactive loop. Stops on `exit`/`quit` or end of input and returns
    /// whether every executed line succeeded.
    pub fn start<R: BufRead>(&self, mut reader: R) -> bool {
        self.stop_requested.store(false, Ordering::SeqCst);
        let mut all_ok = true;
        let mut line = String::new();
        loop {
            self.write_prompt();
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "failed to read console input");
                    break;
                }
            }
            let command = line.trim();
            if command.is_empty() {
                continue;
            }
            all_ok &= self
                .onecmd(Some(&CommandTree::from(command)))
                .unwrap_or(true);
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
        }
        all_ok
    }

    /// Loads a campaign script, substitutes `kwargs` and runs it through
    /// `onecmd` in the given scope.
    pub fn run_configurable_script(
        &self,
        path: &Path,
        kwargs: &Map<String, Value>,
        exec: &ExecContext,
        trace_id: &str,
    ) -> Result<bool, AppError> {
        let campaign = load_campaign(path, trace_id)?;
        let tree = campaign.expand(kwargs);
        let exec = &exec.nested();
        info!(
            trace_id = %trace_id,
            job_id = ?exec.job_id,
            script = %path.display(),
            commands = tree.command_count(),
            "running campaign script"
        );
        Ok(self.onecmd_in(Some(&tree), exec).unwrap_or(true))
    }
}

impl JobExecutor for Console {
    fn execute_job(&self, lease: &Lease, exec: &ExecContext, trace_id: &str) -> Result<bool, AppError> {
        let script = lease
            .script
            .as_deref()
            .ok_or_else(|| AppError::validation("lease has no script", trace_id))?;
        self.run_configurable_script(script, &lease.kwargs, exec, trace_id)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
