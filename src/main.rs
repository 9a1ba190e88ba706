use std::{panic, path::PathBuf};

use anyhow::Result;
use clap::Parser;

use packadive::{
    cli::{self, CliContext, RootCommand},
    logging::init_logging,
    settings::Settings,
    types::Credential,
};

const TOKEN_ENV: &str = "PACKADIVE_TOKEN";

#[derive(Parser, Debug)]
#[command(
    name = "packadive",
    about = "Dive gear packing checklists",
    long_about = "Keeps dive gear checklists locally and saves status changes to the checklist service when you switch lists, create a list, or exit.",
    version,
    author
)]
struct Cli {
    /// Bearer token for the checklist service. Falls back to PACKADIVE_TOKEN.
    #[arg(long, global = true, value_name = "TOKEN")]
    token: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: RootCommand,
}

enum RunOutcome {
    Continue,
    Exit(i32),
}

#[tokio::main]
async fn main() -> Result<()> {
    let logging = match init_logging() {
        Ok(handle) => Some(handle),
        Err(err) => {
            eprintln!("warning: failed to initialize logging: {err}");
            None
        }
    };
    if let Some(handle) = logging.as_ref() {
        install_panic_hook_with_log(handle.path.clone());
    }

    let outcome = run_app().await;
    // Flush buffered log lines before a possible process::exit.
    drop(logging);

    match outcome? {
        RunOutcome::Continue => Ok(()),
        RunOutcome::Exit(code) => std::process::exit(code),
    }
}

async fn run_app() -> Result<RunOutcome> {
    let cli = Cli::parse();
    let settings = Settings::load();
    let credential = resolve_credential(cli.token, std::env::var(TOKEN_ENV).ok());

    tracing::info!(
        api = %settings.api_base_url,
        signed_in = credential.is_some(),
        "starting packadive"
    );

    let context = CliContext {
        settings,
        credential,
    };
    let code = cli::run(context, cli.command, cli.json, cli.quiet).await;
    if code == 0 {
        Ok(RunOutcome::Continue)
    } else {
        Ok(RunOutcome::Exit(code))
    }
}

/// The flag wins over the environment; blank values count as absent.
fn resolve_credential(flag: Option<String>, env: Option<String>) -> Option<Credential> {
    flag.and_then(Credential::new)
        .or_else(|| env.and_then(Credential::new))
}

fn install_panic_hook_with_log(log_path: PathBuf) {
    let previous_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        eprintln!();
        eprintln!("  Log file: {}", log_path.display());
        eprintln!();
        previous_hook(panic_info);
    }));
}
