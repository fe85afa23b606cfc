use std::process::ExitCode;

fn main() -> ExitCode {
    portline_cli::run()
}
