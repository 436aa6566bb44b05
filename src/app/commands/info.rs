use clap::Parser;

use crate::app::commands::{parse_args, render_help, CommandContext, CommandProcessor, Parsed};
use crate::app::error::AppError;

const NAME: &str = "info";

/// Show console version and job pool settings.
#[derive(Parser, Debug)]
struct InfoArgs {}

pub struct InfoProcessor;

impl CommandProcessor for InfoProcessor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Show console information"
    }

    fn help(&self) -> String {
        render_help::<InfoArgs>(NAME)
    }

    fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<bool, AppError> {
        if let Parsed::Help(text) = parse_args::<InfoArgs>(ctx, NAME, args)? {
            ctx.println(text);
            return Ok(true);
        }
        let state = ctx.state();
        let version = if state.version.is_empty() {
            "unknown"
        } else {
            state.version.as_str()
        };
        let endpoint = if state.config.vti.endpoint.is_empty() {
            "(none)"
        } else {
            state.config.vti.endpoint.as_str()
        };
        let pool = state
            .job_queue()
            .map(|queue| queue.size().to_string())
            .unwrap_or_else(|| "not started".to_string());
        ctx.println(format!("version: {version}"));
        ctx.println(format!("hostname: {}", state.config.hostname()));
        ctx.println(format!("job pool: {pool}"));
        ctx.println(format!("vti endpoint: {endpoint}"));
        if let Some(job_id) = &ctx.exec.job_id {
            ctx.println(format!("job: {job_id}"));
        }
        Ok(true)
    }
}
