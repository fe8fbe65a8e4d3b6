use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::app::AppError;
use crate::cli::Cli;

pub fn run(shell_name: &str) -> Result<(), AppError> {
    let shell = match shell_name.to_ascii_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        other => {
            return Err(AppError::InvalidArgument(format!(
                "unsupported shell '{}': expected bash, zsh, or fish",
                other
            )))
        }
    };
    let mut command = Cli::command();
    generate(shell, &mut command, "aislemap", &mut std::io::stdout());
    Ok(())
}
