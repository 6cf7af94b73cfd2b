// Entrypoint for the canarymd CLI.
// - Keeps `main` small: parse flags and hand them to `cli::run`, which owns
//   logging setup and exit codes.

use std::process::ExitCode;

use canarymd::cli::{self, Cli};
use clap::Parser;

fn main() -> ExitCode {
    cli::run(Cli::parse())
}
