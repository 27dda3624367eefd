#[macro_use]
mod cli;
pub mod infrastructure;
pub mod mcp;

use std::process::ExitCode;

use clap::Parser;
use cli::display::{Message, MessageType};

fn init_failure(details: String) -> ExitCode {
    show_message!(
        MessageType::Error,
        Message {
            action: "Init".to_string(),
            details,
        }
    );
    ExitCode::from(1)
}

// Entry point for the CLI application
fn main() -> ExitCode {
    if let Err(e) = cli::settings::setup_user_directory() {
        return init_failure(format!(
            "Failed to initialize ~/.greatsql-probe, please check your permissions: {e:?}"
        ));
    }
    if let Err(e) = cli::settings::init_config_file() {
        return init_failure(format!("Failed to write the default config file: {e:?}"));
    }
    let settings = match cli::settings::read_settings() {
        Ok(settings) => settings,
        Err(e) => return init_failure(format!("Failed to read settings: {e}")),
    };

    // Clap's own format covers --help, --version and usage errors
    let cli_result = match cli::Cli::try_parse() {
        Ok(cli_result) => cli_result,
        Err(e) => e.exit(),
    };

    if cli_result.backtrace {
        // Safe: no other threads have started and no errors have been created yet.
        std::env::set_var("RUST_LIB_BACKTRACE", "1");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return init_failure(format!("Failed to create Tokio runtime: {e}")),
    };

    let result = runtime.block_on(async {
        if let Err(e) = cli::logger::setup_logging(&settings.logger) {
            show_message!(
                MessageType::Warning,
                Message {
                    action: "Logger".to_string(),
                    details: e.to_string(),
                }
            );
        }
        cli::top_command_handler(settings, &cli_result).await
    });

    match result {
        Ok(s) => {
            // Empty messages mean the output (e.g. --json) is already printed
            if !s.message.action.is_empty() || !s.message.details.is_empty() {
                show_message!(s.message_type, s.message);
            }
            ExitCode::from(0)
        }
        Err(e) => {
            show_message!(e.message_type, e.message);
            if let Some(err) = e.error {
                eprintln!("{err:?}");
            }
            ExitCode::from(1)
        }
    }
}
