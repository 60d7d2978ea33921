//! Shell completion scripts.

use clap::CommandFactory;
use clap_complete::{generate, shells::Shell};
use std::io;

/// Writes the completion script for `shell` to stdout.
pub fn generate_completion(shell: Shell) {
    let mut command = crate::Cli::command();
    generate(shell, &mut command, "buzz", &mut io::stdout());
}
