use std::process::ExitCode;

fn main() -> ExitCode {
    host_controller_lib::run()
}
