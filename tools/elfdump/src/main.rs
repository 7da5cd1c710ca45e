use std::process::ExitCode;

use clap::Parser;
use rekon_elfdump::cli::Cli;
use rekon_elfdump::{logger, output};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    match rekon_elfdump::run(&cli) {
        Ok(report) => match output::emit(cli.output, &report) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                output::emit_error(cli.output, 2, &e.to_string());
                ExitCode::from(2)
            }
        },
        Err(e) => {
            output::emit_error(cli.output, e.code(), &e.to_string());
            e.exit_code()
        }
    }
}
