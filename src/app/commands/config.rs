use std::path::PathBuf;

use clap::Parser;

use crate::app::campaign::parse_key_values;
use crate::app::commands::{parse_args, render_help, CommandContext, CommandProcessor, Parsed};
use crate::app::error::AppError;

const NAME: &str = "config";

/// Run a configurable campaign script.
#[derive(Parser, Debug)]
struct ConfigArgs {
    #[arg(long)]
    file: PathBuf,
    /// `key=value` substituted for `{key}` in the script; repeatable.
    #[arg(long = "arg", value_name = "KEY=VALUE")]
    args: Vec<String>,
}

pub struct ConfigProcessor;

impl CommandProcessor for ConfigProcessor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Run a campaign script"
    }

    fn help(&self) -> String {
        render_help::<ConfigArgs>(NAME)
    }

    fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<bool, AppError> {
        let args = match parse_args::<ConfigArgs>(ctx, NAME, args)? {
            Parsed::Run(args) => args,
            Parsed::Help(text) => {
                ctx.println(text);
                return Ok(true);
            }
        };
        let kwargs = parse_key_values(&args.args, ctx.trace_id)?;
        ctx.console
            .run_configurable_script(&args.file, &kwargs, ctx.exec, ctx.trace_id)
    }
}
