use clap::{Parser, ValueEnum};

use crate::app::commands::device::list_devices;
use crate::app::commands::{parse_args, render_help, CommandContext, CommandProcessor, Parsed};
use crate::app::error::AppError;
use crate::app::state::lock_recover;

const NAME: &str = "list";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ListTarget {
    Devices,
    Builds,
}

/// List devices or fetched builds.
#[derive(Parser, Debug)]
struct ListArgs {
    #[arg(value_enum, default_value = "devices")]
    target: ListTarget,
}

pub struct ListProcessor;

impl CommandProcessor for ListProcessor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "List devices or builds"
    }

    fn help(&self) -> String {
        render_help::<ListArgs>(NAME)
    }

    fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<bool, AppError> {
        let args = match parse_args::<ListArgs>(ctx, NAME, args)? {
            Parsed::Run(args) => args,
            Parsed::Help(text) => {
                ctx.println(text);
                return Ok(true);
            }
        };
        match args.target {
            ListTarget::Devices => list_devices(ctx),
            ListTarget::Builds => {
                let builds = lock_recover(&ctx.exec.builds);
                if builds.is_empty() {
                    ctx.println("no builds");
                }
                for (name, provider) in builds.iter() {
                    ctx.println(format!("{name}\t{}", provider.root().display()));
                    for (file, artifact) in provider.artifacts() {
                        ctx.println(format!("  {file}\t{:?}", artifact.kind));
                    }
                }
            }
        }
        Ok(true)
    }
}
