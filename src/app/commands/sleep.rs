use std::thread;
use std::time::Duration;

use clap::Parser;

use crate::app::commands::{parse_args, render_help, CommandContext, CommandProcessor, Parsed};
use crate::app::error::AppError;

const NAME: &str = "sleep";

/// Pause the current branch.
#[derive(Parser, Debug)]
struct SleepArgs {
    /// Seconds; fractions are allowed.
    seconds: f64,
}

pub struct SleepProcessor;

impl CommandProcessor for SleepProcessor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Sleep for a number of seconds"
    }

    fn help(&self) -> String {
        render_help::<SleepArgs>(NAME)
    }

    fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<bool, AppError> {
        let args = match parse_args::<SleepArgs>(ctx, NAME, args)? {
            Parsed::Run(args) => args,
            Parsed::Help(text) => {
                ctx.println(text);
                return Ok(true);
            }
        };
        let duration = Duration::try_from_secs_f64(args.seconds).map_err(|err| {
            AppError::validation(
                format!("invalid sleep duration {}: {err}", args.seconds),
                ctx.trace_id,
            )
        })?;
        thread::sleep(duration);
        Ok(true)
    }
}
