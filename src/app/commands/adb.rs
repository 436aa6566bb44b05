use std::time::Duration;

use clap::Parser;
use tracing::warn;

use crate::app::adb::locator::{resolve_adb_program, validate_program};
use crate::app::adb::runner::run_adb;
use crate::app::commands::{parse_args, render_help, CommandContext, CommandProcessor, Parsed};
use crate::app::error::AppError;
use crate::app::state::ConsoleState;

const NAME: &str = "adb";

/// Run an adb command, optionally against one serial.
#[derive(Parser, Debug)]
struct AdbArgs {
    #[arg(long, short = 's')]
    serial: Option<String>,
    /// Seconds before the command is killed; defaults to the console timeout.
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

pub struct AdbProcessor;

impl CommandProcessor for AdbProcessor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Run an adb command"
    }

    fn help(&self) -> String {
        render_help::<AdbArgs>(NAME)
    }

    fn set_up(&self, state: &ConsoleState) -> Result<(), AppError> {
        let program = resolve_adb_program(&state.config.device.adb_path);
        if let Err(err) = validate_program(&program) {
            warn!(program = %program, error = %err, "configured adb is not usable");
        }
        Ok(())
    }

    fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<bool, AppError> {
        let args = match parse_args::<AdbArgs>(ctx, NAME, args)? {
            Parsed::Run(args) => args,
            Parsed::Help(text) => {
                ctx.println(text);
                return Ok(true);
            }
        };
        let config = &ctx.state().config;
        let program = resolve_adb_program(&config.device.adb_path);
        let timeout = args
            .timeout
            .filter(|secs| *secs > 0)
            .unwrap_or(config.console.command_timeout_secs);

        let output = run_adb(
            &program,
            args.serial.as_deref(),
            &args.command,
            Duration::from_secs(timeout),
            ctx.trace_id,
        )?;

        let stdout = output.stdout.trim_end();
        if !stdout.is_empty() {
            ctx.println(stdout);
        }
        let stderr = output.stderr.trim_end();
        if !stderr.is_empty() {
            ctx.println(stderr);
        }
        let exit_code = output
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        ctx.state().set_arg(NAME, "stdout", stdout);
        ctx.state().set_arg(NAME, "exit_code", exit_code);
        Ok(output.exit_code == Some(0))
    }
}
