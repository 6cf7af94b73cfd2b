// Command-line front end: parses flags (with CANARYMD_* environment
// defaults), builds the PEO from flags plus an optional JSON data file,
// runs `select` or `version`, and maps failures to exit codes.

use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, ValueEnum};
use dialoguer::{Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::Client;
use crate::error::{Error, Result};
use crate::model::Peo;

/// Data file missing or not a JSON object.
pub const EXIT_DATAFILE: u8 = 10;
/// Any error raised by the client library.
pub const EXIT_CLIENT: u8 = 20;

#[derive(Parser, Debug)]
#[command(name = "canarymd", version, about = "Request message selections from Canary")]
pub struct Cli {
    /// Increase verbosity (can be specified multiple times)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// The principal (i.e. username) to authenticate as
    #[arg(short, long, value_name = "PRINCIPAL", env = "CANARYMD_USERNAME")]
    pub username: Option<String>,

    /// The principal's credential/token (i.e. password)
    #[arg(
        short,
        long,
        value_name = "CREDENTIAL",
        env = "CANARYMD_PASSWORD",
        hide_env_values = true
    )]
    pub password: Option<String>,

    /// The Canary environment to connect to
    #[arg(
        short = 'e',
        long = "env",
        value_name = "ENVIRONMENT",
        env = "CANARYMD_ENV",
        default_value = "prod"
    )]
    pub environment: String,

    /// Override the environment's API root URL
    #[arg(long, value_name = "URL", env = "CANARYMD_URL")]
    pub url: Option<String>,

    /// The partner context under which to make the selection
    #[arg(short, long, value_name = "CONTEXT", env = "CANARYMD_CONTEXT")]
    pub context: Option<String>,

    /// The selection's purpose
    #[arg(long, value_name = "PURPOSE", default_value = "discover")]
    pub purpose: String,

    /// The selection's transport
    #[arg(long, value_name = "TRANSPORT", default_value = "site")]
    pub transport: String,

    /// Maximum number of seconds (supports decimals) the server may take
    #[arg(short, long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    #[arg(value_enum, value_name = "COMMAND")]
    pub command: Command,

    /// JSON file with PEO details, merged over --purpose/--transport
    #[arg(value_name = "FILENAME")]
    pub datafile: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Request a message selection and print its content
    Select,
    /// Print the server, client and protocol versions
    Version,
}

/// Install logging and run the parsed command.
pub fn run(cli: Cli) -> ExitCode {
    init_logging(cli.verbose);
    ExitCode::from(dispatch(&cli))
}

/// Run the command and return the process exit status.
pub fn dispatch(cli: &Cli) -> u8 {
    let peo = match build_peo(cli) {
        Ok(peo) => peo,
        Err(err) => {
            let path = cli.datafile.as_deref().unwrap_or(Path::new("-"));
            eprintln!(
                "[**] ERROR: could not open and/or parse data file: {}",
                path.display()
            );
            eprintln!("[**]      : {err:#}");
            return EXIT_DATAFILE;
        }
    };

    match execute(cli, peo) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("[**] ERROR: {err}");
            EXIT_CLIENT
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::new("off"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Start from `--purpose`/`--transport` and overlay the data file's
/// top-level keys.
fn build_peo(cli: &Cli) -> anyhow::Result<Value> {
    let mut peo = json!({
        "purpose": cli.purpose,
        "transport": cli.transport,
    });

    if let Some(path) = &cli.datafile {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let data: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        let Value::Object(data) = data else {
            bail!("expected a JSON object at the top level");
        };
        if let Value::Object(peo) = &mut peo {
            peo.extend(data);
        }
    }
    Ok(peo)
}

fn execute(cli: &Cli, peo: Value) -> Result<()> {
    match cli.command {
        Command::Version => {
            let client = connect(cli, String::new(), String::new())?;
            let version = client.version();
            println!("server: {}", version.server.as_deref().unwrap_or("unknown"));
            println!("client: {}", version.client);
            println!("protocol: {}", version.api);
            Ok(())
        }
        Command::Select => {
            let context = cli.context.as_deref().ok_or_else(|| {
                Error::Configuration(
                    "no context supplied (use --context or CANARYMD_CONTEXT)".into(),
                )
            })?;
            let peo = Peo::try_from(peo)?;
            let username = resolve_credential(cli.username.clone(), "username", false)?;
            let password = resolve_credential(cli.password.clone(), "password", true)?;
            let client = connect(cli, username, password)?;

            let spinner = spinner("Requesting selection...");
            let selection = client.select(context, &peo, cli.timeout);
            spinner.finish_and_clear();

            match selection? {
                Some(selection) => {
                    info!("selection id: {}", selection.id);
                    info!("  channels: {:?}", selection.channel_ids());
                    print!("{}", selection.content);
                }
                None => info!("no applicable message found"),
            }
            Ok(())
        }
    }
}

fn connect(cli: &Cli, username: String, password: String) -> Result<Client> {
    let mut builder = Client::builder()
        .principal(username)
        .credential(password)
        .environment(&cli.environment);
    if let Some(url) = &cli.url {
        builder = builder.base_url(url);
    }
    builder.build()
}

/// Use the supplied value, or prompt when attached to a terminal.
fn resolve_credential(value: Option<String>, what: &str, secret: bool) -> Result<String> {
    if let Some(value) = value {
        return Ok(value);
    }
    if !io::stdin().is_terminal() {
        return Err(Error::Configuration(format!(
            "no {what} supplied (use --{what} or CANARYMD_{})",
            what.to_uppercase()
        )));
    }

    let prompt = format!("Canary {what}");
    let answer = if secret {
        Password::new().with_prompt(prompt).interact()
    } else {
        Input::<String>::new().with_prompt(prompt).interact_text()
    };
    answer.map_err(|e| Error::Configuration(format!("could not read {what}: {e}")))
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
