pub mod cli;
pub mod prompt;

use crate::config::Settings;
use cli::{help_text, parse_cli_args, CliCommand, CliError};
pub use prompt::{execute_prompt_run, handle_prompt, prepare_adapter, CliReport, PromptExecution};

/// Entry point shared by the binary and tests. `lookup` stands in for the process environment.
pub fn run_cli<F>(args: &[String], lookup: F) -> CliReport
where
    F: Fn(&str) -> Option<String>,
{
    let (prompt, output) = match parse_cli_args(args) {
        Ok(CliCommand::Help) => {
            return CliReport {
                stdout: vec![help_text()],
                ..CliReport::default()
            }
        }
        Ok(CliCommand::Prompt { prompt, output }) => (prompt, output),
        Err(CliError::MissingPrompt) => {
            return CliReport {
                stdout: vec![help_text()],
                exit_code: 1,
                ..CliReport::default()
            }
        }
        Err(err) => {
            return CliReport {
                stderr: vec![format!("error: {err}"), help_text()],
                exit_code: 1,
                ..CliReport::default()
            }
        }
    };

    match Settings::load(lookup) {
        Ok(settings) => handle_prompt(&prompt, output.requests_afl(), &settings),
        Err(err) => CliReport {
            stderr: vec![format!("Configuration error: {err}")],
            exit_code: 1,
            ..CliReport::default()
        },
    }
}
