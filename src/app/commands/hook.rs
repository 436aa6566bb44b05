use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::app::adb::runner::run_command_with_timeout;
use crate::app::commands::{parse_args, render_help, CommandContext, CommandProcessor, Parsed};
use crate::app::error::AppError;
use crate::app::placeholders::{DiffEntry, Placeholders};

const NAME: &str = "hook";

/// Run a host command after expanding `${VAR}` upload-hook placeholders.
///
/// Recognized: PREUPLOAD_COMMIT_MESSAGE, PREUPLOAD_COMMIT, PREUPLOAD_FILES,
/// PREUPLOAD_FILES_PREFIXED, REPO_ROOT, BUILD_OS.
#[derive(Parser, Debug)]
struct HookArgs {
    /// Changed file; repeatable.
    #[arg(long = "file")]
    files: Vec<String>,
    #[arg(long = "repo-root")]
    repo_root: Option<String>,
    #[arg(long)]
    timeout: Option<u64>,
    /// Print the expanded command without running it.
    #[arg(long = "dry-run")]
    dry_run: bool,
    #[arg(required = true, last = true)]
    command: Vec<String>,
}

pub struct HookProcessor;

impl CommandProcessor for HookProcessor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Run a command with upload-hook placeholders"
    }

    fn help(&self) -> String {
        render_help::<HookArgs>(NAME)
    }

    fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<bool, AppError> {
        let args = match parse_args::<HookArgs>(ctx, NAME, args)? {
            Parsed::Run(args) => args,
            Parsed::Help(text) => {
                ctx.println(text);
                return Ok(true);
            }
        };
        let repo_root = match args.repo_root {
            Some(root) => root,
            None => std::env::current_dir()
                .map(|dir| dir.to_string_lossy().into_owned())
                .map_err(|err| AppError::system(format!("Failed to read cwd: {err}"), ctx.trace_id))?,
        };
        let diff = args.files.into_iter().map(DiffEntry::modified).collect();
        let placeholders = Placeholders::from_env(diff, repo_root);
        let expanded = placeholders
            .expand_vars(&args.command)
            .map_err(|err| AppError::validation(err.error, ctx.trace_id))?;
        let Some((program, rest)) = expanded.split_first() else {
            return Err(AppError::validation("empty hook command", ctx.trace_id));
        };

        if args.dry_run {
            ctx.println(expanded.join(" "));
            return Ok(true);
        }
        info!(trace_id = %ctx.trace_id, program = %program, "running hook command");
        let timeout = args
            .timeout
            .filter(|secs| *secs > 0)
            .unwrap_or(ctx.state().config.console.command_timeout_secs);
        let output = run_command_with_timeout(
            program,
            rest,
            Duration::from_secs(timeout),
            ctx.trace_id,
        )?;
        for stream in [&output.stdout, &output.stderr] {
            let text = stream.trim_end();
            if !text.is_empty() {
                ctx.println(text);
            }
        }
        Ok(output.exit_code == Some(0))
    }
}
