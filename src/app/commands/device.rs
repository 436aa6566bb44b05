use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::app::adb::locator::resolve_adb_program;
use crate::app::adb::parse::{device_state_from_adb, parse_adb_devices};
use crate::app::adb::runner::run_adb;
use crate::app::commands::{parse_args, render_help, CommandContext, CommandProcessor, Parsed};
use crate::app::error::AppError;
use crate::app::models::DeviceState;

const NAME: &str = "device";

/// Inspect or change entries of the device status map.
#[derive(Parser, Debug)]
struct DeviceArgs {
    /// Print every known serial with its state.
    #[arg(long)]
    list: bool,
    /// Set SERIAL to STATE (unknown, ready, use, error).
    #[arg(long = "set_state", num_args = 2, value_names = ["SERIAL", "STATE"])]
    set_state: Option<Vec<String>>,
    /// Query `adb devices` and mark attached devices ready.
    #[arg(long)]
    refresh: bool,
}

pub struct DeviceProcessor;

impl CommandProcessor for DeviceProcessor {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Inspect or change device states"
    }

    fn help(&self) -> String {
        render_help::<DeviceArgs>(NAME)
    }

    fn run(&self, ctx: &CommandContext<'_>, args: &[String]) -> Result<bool, AppError> {
        let args = match parse_args::<DeviceArgs>(ctx, NAME, args)? {
            Parsed::Run(args) => args,
            Parsed::Help(text) => {
                ctx.println(text);
                return Ok(true);
            }
        };

        let mut ok = true;
        if let Some(pair) = &args.set_state {
            let (serial, state) = match pair.as_slice() {
                [serial, state] => (serial, state),
                _ => {
                    return Err(AppError::validation(
                        "--set_state needs SERIAL and STATE",
                        ctx.trace_id,
                    ))
                }
            };
            let state: DeviceState = state
                .parse()
                .map_err(|err: String| AppError::validation(err, ctx.trace_id))?;
            if ctx.state().devices.change_state(serial, state) {
                ctx.println(format!("{serial}: {state}"));
            } else {
                ctx.println(format!("{serial}: could not change state to {state}"));
                ok = false;
            }
        }
        if args.refresh {
            ok &= refresh(ctx)?;
        }
        if args.list || (args.set_state.is_none() && !args.refresh) {
            list_devices(ctx);
        }
        Ok(ok)
    }
}

pub(crate) fn list_devices(ctx: &CommandContext<'_>) {
    let snapshot = ctx.state().devices.snapshot();
    if snapshot.is_empty() {
        ctx.println("no devices");
        return;
    }
    for (serial, state) in snapshot {
        ctx.println(format!("{serial}\t{state}"));
    }
}

fn refresh(ctx: &CommandContext<'_>) -> Result<bool, AppError> {
    let config = &ctx.state().config;
    let program = resolve_adb_program(&config.device.adb_path);
    let output = run_adb(
        &program,
        None,
        &["devices".to_string(), "-l".to_string()],
        Duration::from_secs(config.console.command_timeout_secs),
        ctx.trace_id,
    )?;
    if output.exit_code != Some(0) {
        return Err(AppError::dependency(
            format!("adb devices failed: {}", output.stderr.trim()),
            ctx.trace_id,
        ));
    }

    let devices = &ctx.state().devices;
    let mut ok = true;
    for summary in parse_adb_devices(&output.stdout) {
        // Claimed serials belong to a running job; leave them alone.
        if devices.get(&summary.serial) == DeviceState::Use {
            continue;
        }
        let state = device_state_from_adb(&summary.state);
        ok &= devices.change_state(&summary.serial, state);
        info!(trace_id = %ctx.trace_id, serial = %summary.serial, state = %state, "device refreshed");
    }
    Ok(ok)
}
