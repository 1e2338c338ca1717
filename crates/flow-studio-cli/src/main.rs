//! `flow-studio`: validate, store, publish, and test action flows from the terminal.

mod commands;

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use flow_studio_client::{Backends, FlowStudioClientConfig};
use flow_studio_core::FlowId;

#[derive(Parser, Debug)]
#[command(name = "flow-studio", version, about = "Flow Studio command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a flow file against the save rules.
    Validate(ValidateArgs),
    /// Print the publish status of a flow file.
    Status(StatusArgs),
    /// Create or update a flow from a file.
    Push {
        file: PathBuf,
    },
    /// Save and publish a stored flow.
    Publish {
        id: String,
    },
    /// Delete a stored flow. Cannot be undone.
    Delete {
        id: String,
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Rename a stored flow.
    Rename {
        id: String,
        name: String,
    },
    /// Run a flow file on the engine and stream its log. Ctrl-C cancels the run.
    Test(TestArgs),
}

#[derive(Args, Debug)]
struct ValidateArgs {
    file: PathBuf,
    /// Accept steps that are not reachable from the trigger.
    #[arg(long)]
    allow_orphans: bool,
}

#[derive(Args, Debug)]
struct StatusArgs {
    file: PathBuf,
    /// Flow file holding the definition as last published.
    #[arg(long)]
    published: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TestArgs {
    file: PathBuf,
    /// Trigger input as a JSON object.
    #[arg(long)]
    input: Option<String>,
}

fn backends() -> Result<Backends> {
    let config = FlowStudioClientConfig::from_env()
        .map_err(commands::user_facing)
        .context("flow API is not configured")?;
    Backends::http(&config).map_err(commands::user_facing)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    flow_studio_core::init_observability();

    let cli = Cli::parse();
    let mut out = io::stdout().lock();
    match cli.command {
        Command::Validate(args) => commands::validate(&args.file, args.allow_orphans, &mut out),
        Command::Status(args) => commands::status(&args.file, args.published.as_deref(), &mut out),
        Command::Push { file } => commands::push(&file, backends()?, &mut out).await,
        Command::Publish { id } => commands::publish(&FlowId::new(id), backends()?, &mut out).await,
        Command::Delete { id, yes } => {
            commands::confirm_delete(yes)?;
            commands::delete(&FlowId::new(id), backends()?, &mut out).await
        }
        Command::Rename { id, name } => {
            commands::rename(&FlowId::new(id), &name, backends()?, &mut out).await
        }
        Command::Test(args) => {
            let input = args.input.as_deref().map(commands::parse_input).transpose()?;
            commands::test(&args.file, input, backends()?, &mut out).await
        }
    }
}
