use std::process::ExitCode;

fn main() -> ExitCode {
    pgben_cli::run()
}
