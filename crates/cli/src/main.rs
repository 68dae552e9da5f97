use std::process::ExitCode;

fn main() -> ExitCode {
    hirewire_cli::run()
}
