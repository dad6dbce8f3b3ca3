use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use northstar_controller::{Command, CommandScheduler, ControllerConfig, ExchangeOutcome, Param};
use northstar_shared::Response;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Send commands to a NorthStar agent daemon
#[derive(Parser, Debug)]
#[command(name = "northstar", version)]
struct Cli {
    /// Agent daemon host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Agent daemon port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// TOML config file
    #[arg(long, short, global = true, env = "NORTHSTAR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

/// Agents addressed by a per-agent command
#[derive(Args, Debug)]
struct Targets {
    /// Agent ids
    #[arg(required = true)]
    ids: Vec<String>,

    /// Queue the command on the agent until `launch` instead of running it now
    #[arg(long)]
    set: bool,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Link agents to the daemon
    Link {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Unlink agents from the daemon
    Unlink {
        #[arg(required_unless_present = "all")]
        ids: Vec<String>,
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },
    /// Set the GPS origin, given as `lat,lon`
    Origin {
        #[arg(value_parser = parse_origin, allow_hyphen_values = true)]
        coordinates: (f64, f64),
        #[command(flatten)]
        targets: Targets,
    },
    Arm(Targets),
    Disarm(Targets),
    /// Climb to ALTITUDE metres
    Takeoff {
        altitude: f32,
        /// Seconds to reach the altitude
        #[arg(long, short, default_value_t = 10.0)]
        time: f32,
        #[command(flatten)]
        targets: Targets,
    },
    /// Fly to a local position, given as `x,y,z`
    Move {
        #[arg(value_parser = parse_position, allow_hyphen_values = true)]
        position: [f32; 3],
        /// Seconds to reach the position
        #[arg(long, short, default_value_t = 1.0)]
        time: f32,
        #[command(flatten)]
        targets: Targets,
    },
    Land(Targets),
    /// Return to the home position
    Home(Targets),
    /// Stop motors immediately
    Kill {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Pause agents for SECONDS
    Delay {
        seconds: f32,
        #[command(flatten)]
        targets: Targets,
    },
    /// Run queued commands on the given agents, or on every linked agent
    Launch { ids: Vec<String> },
    /// Show agent status
    Status { ids: Vec<String> },
    /// Stop the agent daemon
    Shutdown,
    /// Send every command in a script, in order
    Run { script: PathBuf },
}

fn parse_numbers<const N: usize, T: std::str::FromStr>(value: &str) -> Result<[T; N], String> {
    let parts: Vec<&str> = value.trim_matches('"').split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(format!("expected {} comma-separated numbers", N));
    }
    let mut parsed = Vec::with_capacity(N);
    for part in parts {
        parsed.push(part.parse::<T>().map_err(|_| format!("invalid number '{}'", part))?);
    }
    parsed
        .try_into()
        .map_err(|_| format!("expected {} comma-separated numbers", N))
}

fn parse_origin(value: &str) -> Result<(f64, f64), String> {
    let [lat, lon] = parse_numbers::<2, f64>(value)?;
    Ok((lat, lon))
}

fn parse_position(value: &str) -> Result<[f32; 3], String> {
    parse_numbers::<3, f32>(value)
}

/// One line of a command script: an action name followed by whitespace
/// separated positional parameters. Blank lines and `#` comments are skipped.
#[derive(Debug, PartialEq)]
struct ScriptLine {
    line: usize,
    name: String,
    params: Vec<Param>,
}

fn parse_script(text: &str) -> Vec<ScriptLine> {
    text.lines()
        .enumerate()
        .filter_map(|(index, raw)| {
            let content = raw.split('#').next().unwrap_or_default();
            let mut tokens = content.split_whitespace();
            let name = tokens.next()?;
            Some(ScriptLine {
                line: index + 1,
                name: name.to_string(),
                params: tokens.map(Param::from).collect(),
            })
        })
        .collect()
}

fn per_agent<F>(targets: &Targets, build: F) -> Vec<Command>
where
    F: Fn(&str, bool) -> Command,
{
    targets.ids.iter().map(|id| build(id, targets.set)).collect()
}

/// Translate the parsed command line into wire commands, in send order
fn build_commands(command: &CliCommand, config: &ControllerConfig) -> Result<Vec<Command>> {
    let commands = match command {
        CliCommand::Link { ids } => vec![Command::link(ids)],
        CliCommand::Unlink { all: true, .. } => vec![Command::unlink_all()],
        CliCommand::Unlink { ids, .. } => vec![Command::unlink(ids)],
        CliCommand::Origin {
            coordinates: (lat, lon),
            targets,
        } => per_agent(targets, |id, set| Command::origin(*lat, *lon, id, set)),
        CliCommand::Arm(targets) => per_agent(targets, |id, set| Command::arm(id, set)),
        CliCommand::Disarm(targets) => per_agent(targets, |id, set| Command::disarm(id, set)),
        CliCommand::Takeoff {
            altitude,
            time,
            targets,
        } => per_agent(targets, |id, set| Command::takeoff(*altitude, *time, id, set)),
        CliCommand::Move {
            position,
            time,
            targets,
        } => per_agent(targets, |id, set| Command::move_to(*position, *time, id, set)),
        CliCommand::Land(targets) => per_agent(targets, |id, set| Command::land(id, set)),
        CliCommand::Home(targets) => per_agent(targets, |id, set| Command::home(id, set)),
        CliCommand::Kill { ids } => ids.iter().map(Command::kill).collect(),
        CliCommand::Delay { seconds, targets } => {
            per_agent(targets, |id, set| Command::delay(*seconds, id, set))
        }
        CliCommand::Launch { ids } => vec![Command::launch(ids)],
        CliCommand::Status { ids } => vec![Command::status(ids)],
        CliCommand::Shutdown => vec![Command::shutdown()],
        CliCommand::Run { script } => load_script(script, config)?,
    };
    Ok(commands)
}

fn load_script(path: &Path, config: &ControllerConfig) -> Result<Vec<Command>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;

    let mut commands = Vec::new();
    for line in parse_script(&text) {
        let command = Command::from_positional(&line.name, &line.params, config.unknown_commands)
            .with_context(|| format!("{}:{}", path.display(), line.line))?;
        commands.push(command);
    }
    if commands.is_empty() {
        bail!("Script {} contains no commands", path.display());
    }
    Ok(commands)
}

fn load_config(cli: &Cli) -> Result<ControllerConfig> {
    let config = match &cli.config {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };
    let mut config = config.with_env()?;

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    Ok(config)
}

/// Print the per-agent entries of a status response
fn print_status(outcome: &ExchangeOutcome) {
    let response = Response::decode(outcome.message.as_bytes());
    let Some(status) = response.status else {
        println!("No status returned");
        return;
    };
    for (id, info) in &status {
        println!("Agent {}:", id);
        match info.as_object() {
            Some(fields) if fields.is_empty() => println!("  (no data)"),
            Some(fields) => {
                for (key, value) in fields {
                    println!("  {}: {}", key, value);
                }
            }
            None => println!("  {}", info),
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = load_config(&cli)?;
    let commands = build_commands(&cli.command, &config)?;
    debug!("Sending {} command(s) to {}", commands.len(), config.address());

    let scheduler = CommandScheduler::from_config(&config);

    // Everything is queued up front; the scheduler keeps the order
    let mut sent = Vec::new();
    let mut receivers = Vec::new();
    for command in commands {
        receivers.push(scheduler.submit(command.clone())?);
        sent.push(command);
    }
    scheduler.shutdown();

    let outcomes = join_all(receivers).await;

    let mut all_ok = true;
    for (command, outcome) in sent.iter().zip(outcomes) {
        let outcome = outcome
            .unwrap_or_else(|_| ExchangeOutcome::failed("Scheduler stopped before completion"));

        if outcome.success {
            println!("{}: ok", command);
            if command.action() == "status" {
                print_status(&outcome);
            }
        } else {
            all_ok = false;
            println!("{}: failed: {}", command, outcome.message);
        }
    }

    scheduler.join().await;
    Ok(all_ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            info!("One or more commands failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
