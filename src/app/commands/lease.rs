use clap::Parser;
use tracing::info;

use crate::app::commands::{parse_args, render_help, CommandContext, CommandProcessor, Parsed};
use crate::app::error::AppError;

const NAME: &str = "lease";

/// Ask idle job pool workers to lease jobs.
#[derive(Parser, Debug)]
struct LeaseArgs {
    /// Number of lease requests; defaults to the pool size.
    #[arg(long)]
    count: Option<usize>,
}

pub struct LeaseProcessor;

impl CommandProcessor for LeaseProcessor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Lease jobs from the scheduling endpoint"
    }

    fn help(&self) -> String {
        render_help::<LeaseArgs>(NAME)
    }

    fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<bool, AppError> {
        let args = match parse_args::<LeaseArgs>(ctx, NAME, args)? {
            Parsed::Run(args) => args,
            Parsed::Help(text) => {
                ctx.println(text);
                return Ok(true);
            }
        };
        let queue = ctx
            .state()
            .job_queue()
            .ok_or_else(|| AppError::dependency("job pool is not running", ctx.trace_id))?;
        let count = args.count.unwrap_or_else(|| queue.size());
        queue.request_lease(count, ctx.trace_id)?;
        info!(trace_id = %ctx.trace_id, count, "lease requests queued");
        ctx.println(format!("queued {count} lease request(s)"));
        Ok(true)
    }
}
