use std::process::ExitCode;

use clap::{Parser, Subcommand};

use placeherd::commands::hash_password::HashPasswordArgs;
use placeherd::commands::init::InitArgs;
use placeherd::commands::serve::ServeArgs;
use placeherd::commands::template::TemplateArgs;
use placeherd::{commands, error, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "placeherd",
    version,
    about = "Coordinates a swarm of pixel bots toward a target image"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the worker server and the maintenance loop
    Serve(ServeArgs),
    /// Fetch the target template now and summarize it
    Template(TemplateArgs),
    /// Print the admin password digest for the config file
    HashPassword(HashPasswordArgs),
    /// Print the JSON Schema for placeherd.toml
    Schema,
    /// Write a default placeherd.toml
    Init(InitArgs),
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Serve(_) => "serve",
            Self::Template(_) => "template",
            Self::HashPassword(_) => "hash-password",
            Self::Schema => "schema",
            Self::Init(_) => "init",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Serve(args) => args.execute(),
        Commands::Template(args) => args.execute(),
        Commands::HashPassword(args) => args.execute(),
        Commands::Schema => commands::schema::run_schema(),
        Commands::Init(args) => args.execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
