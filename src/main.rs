use std::process::ExitCode;

fn main() -> ExitCode {
    quietblock::run()
}
