use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::app::build_provider::{check_provider_type, LocalBuildProvider};
use crate::app::commands::{parse_args, render_help, CommandContext, CommandProcessor, Parsed};
use crate::app::error::AppError;
use crate::app::state::lock_recover;

const NAME: &str = "fetch";

/// Register a build directory with the active build providers.
#[derive(Parser, Debug)]
struct FetchArgs {
    #[arg(long, default_value = "local")]
    r#type: String,
    #[arg(long)]
    path: PathBuf,
    /// Provider name; defaults to the directory name.
    #[arg(long)]
    name: Option<String>,
}

pub struct FetchProcessor;

impl CommandProcessor for FetchProcessor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Fetch build artifacts"
    }

    fn help(&self) -> String {
        render_help::<FetchArgs>(NAME)
    }

    fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<bool, AppError> {
        let args = match parse_args::<FetchArgs>(ctx, NAME, args)? {
            Parsed::Run(args) => args,
            Parsed::Help(text) => {
                ctx.println(text);
                return Ok(true);
            }
        };
        check_provider_type(&args.r#type, ctx.trace_id)?;

        let provider = LocalBuildProvider::fetch(&args.path, ctx.trace_id)?;
        let name = args
            .name
            .filter(|name| !name.trim().is_empty())
            .or_else(|| {
                args.path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "local".to_string());
        let count = provider.artifacts().len();
        for (file, artifact) in provider.device_images() {
            ctx.state()
                .set_arg(NAME, file, artifact.path.to_string_lossy().into_owned());
        }
        ctx.state().set_arg(NAME, "artifacts", count.to_string());

        info!(
            trace_id = %ctx.trace_id,
            job_id = ?ctx.exec.job_id,
            provider = %name,
            artifacts = count,
            "build fetched"
        );
        ctx.println(format!(
            "{name}: {count} artifact(s) from {}",
            provider.root().display()
        ));
        lock_recover(&ctx.exec.builds).insert(&name, provider);
        Ok(true)
    }
}
