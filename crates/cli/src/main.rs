use std::process::ExitCode;

fn main() -> ExitCode {
    askwell_cli::run()
}
