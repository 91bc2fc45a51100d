use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use log::{LevelFilter, debug, info};
use serde::Serialize;
use tracing::Instrument;

use swarmspawn::engine::DockerCli;
use swarmspawn::settings::Settings;
use swarmspawn::{
    EngineCallAdapter, PollStatus, SessionBackend, SessionContext, Spawner, StartOverrides,
};

mod store;

use crate::store::StateStore;

const APP_NAME: &str = "swarmspawn";

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Completions need neither config nor a runtime.
    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), APP_NAME, &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let ctx = RuntimeContext::new(cli.common)?;
    ctx.init_logging();
    debug!(
        "config file {}, state dir {}",
        ctx.config_file.display(),
        ctx.state_dir.display()
    );

    match cli.command {
        Command::State(cmd) => handle_state(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        command => dispatch(&ctx, command),
    }
}

/// Commands that talk to the engine.
#[tokio::main]
async fn dispatch(ctx: &RuntimeContext, command: Command) -> Result<()> {
    match command {
        Command::Start(cmd) => handle_start(ctx, cmd).await,
        Command::Poll(cmd) => handle_poll(ctx, cmd).await,
        Command::Stop(cmd) => handle_stop(ctx, cmd).await,
        Command::Check => handle_check(ctx).await,
        other => Err(anyhow!("{other:?} does not use the engine")),
    }
}

/// Per-user session services on a Docker swarm.
#[derive(Debug, Parser)]
#[command(name = APP_NAME, author, version, propagate_version = true)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Config file (or directory holding config.toml)
    #[arg(long, global = true, value_name = "PATH", env = "SWARMSPAWN_CONFIG")]
    config: Option<PathBuf>,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// More log output; repeat for trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Same as -vv
    #[arg(long, global = true)]
    debug: bool,
    /// Log everything
    #[arg(long, global = true)]
    trace: bool,
    /// JSON on stdout and JSON log lines on stderr
    #[arg(long, global = true)]
    json: bool,
    /// Plain log output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a user's session, or adopt the one already running
    Start(StartCommand),
    /// Show whether a user's session is running
    Poll(UserArgs),
    /// Remove a user's session service
    Stop(UserArgs),
    /// Print the stored session state for a user
    State(UserArgs),
    /// Check that the engine answers
    Check,
    /// Show or reset the configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct UserArgs {
    /// User identity
    #[arg(short, long)]
    user: String,
}

#[derive(Debug, Clone, Args)]
struct StartCommand {
    #[command(flatten)]
    user: UserArgs,
    /// Image for this start, instead of the configured base image
    #[arg(long)]
    image: Option<String>,
    /// Extra environment for the session (KEY=VALUE, repeatable)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    env: Vec<(String, String)>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective settings
    Show,
    /// Print the config file location
    Path,
    /// Overwrite the config file with defaults
    Reset,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    state_dir: PathBuf,
    config: Settings,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = match &common.config {
            Some(path) => {
                let path = expand(path)?;
                if path.is_dir() {
                    path.join("config.toml")
                } else {
                    path
                }
            }
            None => app_dir("XDG_CONFIG_HOME", dirs::config_dir(), &[".config"])?
                .join("config.toml"),
        };

        if !config_file.exists() {
            write_default_config(&config_file)?;
        }
        let config = Settings::load(&config_file)?;

        let state_dir = match &config.paths.state_dir {
            Some(dir) => PathBuf::from(dir),
            None => app_dir("XDG_STATE_HOME", dirs::state_dir(), &[".local", "state"])?,
        };

        Ok(Self {
            common,
            config_file,
            state_dir,
            config,
        })
    }

    fn log_level(&self) -> LevelFilter {
        let common = &self.common;
        if common.quiet {
            return LevelFilter::Error;
        }
        if common.trace || common.verbose >= 2 {
            return LevelFilter::Trace;
        }
        if common.debug || common.verbose == 1 {
            return LevelFilter::Debug;
        }
        self.config.logging.level.parse().unwrap_or(LevelFilter::Info)
    }

    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        let level = self.log_level();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{APP_NAME}={}", level.as_str().to_lowercase()))
        });

        let registry = tracing_subscriber::registry().with(filter);
        if self.common.json {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let ansi = !self.common.no_color
                && env::var_os("NO_COLOR").is_none()
                && io::stderr().is_terminal();
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(ansi)
                        .with_target(level >= LevelFilter::Debug),
                )
                .try_init()
                .ok();
        }

        // `log` records from the library when no subscriber bridge picked them up.
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .try_init()
            .ok();
    }

    /// Shared engine queue and session plumbing for this process.
    fn spawner(&self) -> Spawner {
        let engine = Arc::new(DockerCli::from_settings(&self.config.engine));
        debug!("using docker engine at {}", engine.host());
        let adapter = EngineCallAdapter::new(engine, self.config.engine.concurrency);
        Spawner::from_settings(adapter, &self.config)
    }

    fn store(&self) -> StateStore {
        StateStore::new(&self.state_dir)
    }

    /// Values the hub would hand to the spawner for this user.
    fn session_context(&self, user: &str, env: BTreeMap<String, String>) -> SessionContext {
        let hub = &self.config.hub;
        SessionContext {
            user: user.to_string(),
            cookie_name: format!("{}-{}", hub.cookie_name, user),
            base_url: format!("{}{}/", hub.user_prefix, user),
            hub_prefix: hub.prefix.clone(),
            hub_api_url: hub.api_url.clone(),
            env,
        }
    }

    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) -> Result<()> {
        if self.common.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).context("encoding JSON output")?
            );
        } else {
            println!("{}", human());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StartOutput<'a> {
    user: &'a str,
    service: &'a str,
    host: String,
    port: u16,
    workload_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct PollOutput<'a> {
    user: &'a str,
    service: &'a str,
    status: &'static str,
    state: Option<String>,
}

async fn handle_start(ctx: &RuntimeContext, cmd: StartCommand) -> Result<()> {
    let StartCommand { user, image, env } = cmd;
    let user = user.user;
    let span = tracing::info_span!("start", user = %user);

    async {
        let store = ctx.store();
        let env: BTreeMap<String, String> = env.into_iter().collect();
        let mut controller = ctx.spawner().controller(ctx.session_context(&user, env));
        controller.load_state(store.load(&user)?);

        let overrides = StartOverrides {
            image,
            ..Default::default()
        };
        let endpoint = controller
            .start(overrides)
            .await
            .with_context(|| format!("starting session for {user}"))?;

        let state = controller.get_state();
        store.save(&user, &state)?;

        let output = StartOutput {
            user: &user,
            service: controller.session_name(),
            host: endpoint.host.clone(),
            port: endpoint.port,
            workload_id: state.workload_id.clone(),
        };
        ctx.emit(&output, || {
            format!(
                "{} -> {}:{} (ID: {})",
                output.service,
                output.host,
                output.port,
                output.workload_id.as_deref().unwrap_or("-")
            )
        })
    }
    .instrument(span)
    .await
}

async fn handle_poll(ctx: &RuntimeContext, cmd: UserArgs) -> Result<()> {
    let user = cmd.user;
    let span = tracing::info_span!("poll", user = %user);

    async {
        let mut controller = ctx
            .spawner()
            .controller(ctx.session_context(&user, BTreeMap::new()));
        controller.load_state(ctx.store().load(&user)?);

        let status = controller.poll().await;
        let (label, state) = match &status {
            PollStatus::Running => ("running", None),
            PollStatus::NotRunning(raw) => ("not_running", Some(raw.clone())),
            PollStatus::Absent => ("absent", None),
        };
        let output = PollOutput {
            user: &user,
            service: controller.session_name(),
            status: label,
            state,
        };
        ctx.emit(&output, || format!("{}: {}", output.service, status))
    }
    .instrument(span)
    .await
}

async fn handle_stop(ctx: &RuntimeContext, cmd: UserArgs) -> Result<()> {
    let user = cmd.user;
    let span = tracing::info_span!("stop", user = %user);

    async {
        let store = ctx.store();
        let mut controller = ctx
            .spawner()
            .controller(ctx.session_context(&user, BTreeMap::new()));
        controller.load_state(store.load(&user)?);

        controller
            .stop()
            .await
            .with_context(|| format!("stopping session for {user}"))?;
        store.save(&user, &controller.get_state())?;

        info!("session for {} stopped", user);
        Ok(())
    }
    .instrument(span)
    .await
}

async fn handle_check(ctx: &RuntimeContext) -> Result<()> {
    let spawner = ctx.spawner();
    let version = spawner
        .adapter()
        .version()
        .await
        .context("querying engine version")?;

    if ctx.common.json {
        println!("{}", version);
    } else {
        let parsed: serde_json::Value =
            serde_json::from_str(&version).unwrap_or(serde_json::Value::Null);
        let server = parsed
            .pointer("/Server/Version")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        println!("engine reachable (server version {})", server);
    }
    Ok(())
}

fn handle_state(ctx: &RuntimeContext, cmd: UserArgs) -> Result<()> {
    let state = ctx.store().load(&cmd.user)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&state).context("serializing session state")?
    );
    Ok(())
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show if ctx.common.json => ctx.emit(&ctx.config, String::new),
        ConfigCommand::Show => {
            print!("{}", ctx.config.to_toml()?);
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            write_default_config(&ctx.config_file)?;
            info!("wrote defaults to {}", ctx.config_file.display());
            Ok(())
        }
    }
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let body = format!(
        "# {APP_NAME} configuration\n\
         # Environment overrides: {}__<SECTION>__<KEY>\n\n{}",
        swarmspawn::settings::ENV_PREFIX,
        Settings::default().to_toml()?
    );
    fs::write(path, body).with_context(|| format!("writing {}", path.display()))
}

fn expand(path: &Path) -> Result<PathBuf> {
    let Some(text) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    let expanded =
        shellexpand::full(text).with_context(|| format!("expanding path {text}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// `$<xdg_var>/swarmspawn`, else the platform dir, else `~/<home_fallback>/swarmspawn`.
fn app_dir(xdg_var: &str, platform: Option<PathBuf>, home_fallback: &[&str]) -> Result<PathBuf> {
    let base = env::var_os(xdg_var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or(platform)
        .or_else(|| {
            dirs::home_dir().map(|home| home_fallback.iter().fold(home, |p, c| p.join(c)))
        })
        .ok_or_else(|| anyhow!("cannot locate a directory for {xdg_var}"))?;
    Ok(base.join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs() {
        assert_eq!(
            parse_key_value("GRANT_SUDO=yes").unwrap(),
            ("GRANT_SUDO".to_string(), "yes".to_string())
        );
        assert_eq!(
            parse_key_value("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swarmspawn").join("config.toml");
        write_default_config(&path).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.session.name_prefix, "notebook");
        assert!(settings.container.0.mounts.is_some());
    }
}
