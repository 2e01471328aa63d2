use std::process::ExitCode;

fn main() -> ExitCode {
    analyst_cli::run()
}
