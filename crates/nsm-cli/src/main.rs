mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Failure, EXIT_FAILURE};
use nsm_core::{Engine, SettingKey, SettingsStore};
use nsm_schema::Dialect;
use nsm_toolchain::NixToolchain;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "nsm",
    version,
    about = "Manage Nix development shells and their settings"
)]
struct Cli {
    /// Path to the settings file.
    #[arg(long, env = "NSM_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Project directory holding shell.nix or flake.nix.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a shell.nix (or flake.nix) in the project directory.
    Init {
        /// Packages to include besides the configured defaults.
        packages: Vec<String>,
        /// Descriptor format; defaults to the configured one.
        #[arg(long, value_parser = ["shell", "flake"], conflicts_with = "flake")]
        format: Option<String>,
        /// Shorthand for --format flake.
        #[arg(long, default_value_t = false)]
        flake: bool,
    },
    /// Add packages to the project descriptor.
    Add {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Remove packages from the project descriptor.
    Remove {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// List the packages in the project descriptor.
    List {
        /// Also show whether each package is in your Nix profile.
        #[arg(long, default_value_t = false)]
        status: bool,
    },
    /// Write a flake.nix carrying the packages of the existing shell.nix.
    Convert,
    /// Pin a package to a version (looked up from the channel when omitted).
    Pin {
        package: String,
        version: Option<String>,
    },
    /// Remove a version pin.
    Unpin { package: String },
    /// List pinned packages.
    Pins,
    /// Read or change settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Upgrade the settings file to the current schema.
    Migrate,
    /// Run diagnostic checks on Nix, the settings and the project.
    Doctor {
        /// Apply automatic fixes where possible.
        #[arg(long, default_value_t = false)]
        fix: bool,
    },
    /// Collect garbage in the Nix store.
    Clean,
    /// Update the subscribed Nix channels.
    Upgrade,
    /// Show a summary of the toolchain, settings and project.
    Info,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print one setting.
    Get { key: String },
    /// Change one setting.
    Set { key: String, value: String },
    /// Print the whole settings file.
    Show,
    /// Replace the settings file with defaults, keeping a backup.
    Reset,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("NSM_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let json = cli.json;
    let result = build_engine(&cli).and_then(|engine| dispatch(cli.command, &engine, json));

    match result {
        Ok(code) => ExitCode::from(code),
        Err(failure) => {
            eprintln!("error: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}

fn build_engine(cli: &Cli) -> Result<Engine, Failure> {
    let settings_path = match &cli.config {
        Some(path) => path.clone(),
        None => SettingsStore::default_path().ok_or_else(|| {
            Failure::new(
                EXIT_FAILURE,
                "cannot locate a configuration directory; pass --config",
            )
        })?,
    };
    let project_dir = match &cli.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()
            .map_err(|e| Failure::new(EXIT_FAILURE, format!("current directory: {e}")))?,
    };
    debug!(
        "settings {}, project {}",
        settings_path.display(),
        project_dir.display()
    );
    Ok(Engine::new(settings_path, project_dir, NixToolchain::system()))
}

fn dispatch(command: Commands, engine: &Engine, json: bool) -> Result<u8, Failure> {
    let needs_nix = matches!(
        command,
        Commands::Clean | Commands::Upgrade | Commands::Pin { version: None, .. }
    );
    if needs_nix && std::env::var("NSM_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = nsm_toolchain::check_nix_prereqs();
        if !missing.is_empty() {
            return Err(Failure::new(
                EXIT_FAILURE,
                nsm_toolchain::format_missing(&missing),
            ));
        }
    }

    match command {
        Commands::Init {
            packages,
            format,
            flake,
        } => {
            let dialect = if flake {
                Some(Dialect::Flake)
            } else {
                format
                    .map(|f| f.parse::<Dialect>())
                    .transpose()
                    .map_err(|e| Failure::new(EXIT_FAILURE, e.to_string()))?
            };
            commands::init::run(engine, dialect, &packages, json)
        }
        Commands::Add { packages } => commands::packages::add(engine, &packages, json),
        Commands::Remove { packages } => commands::packages::remove(engine, &packages, json),
        Commands::List { status } => commands::packages::list(engine, status, json),
        Commands::Convert => commands::convert::run(engine, json),
        Commands::Pin { package, version } => {
            commands::pin::pin(engine, &package, version.as_deref(), json)
        }
        Commands::Unpin { package } => commands::pin::unpin(engine, &package, json),
        Commands::Pins => commands::pin::list(engine, json),
        Commands::Config { action } => match action {
            ConfigAction::Get { key } => {
                commands::config::get(engine, parse_key(&key)?, json)
            }
            ConfigAction::Set { key, value } => {
                commands::config::set(engine, parse_key(&key)?, &value, json)
            }
            ConfigAction::Show => commands::config::show(engine, json),
            ConfigAction::Reset => commands::config::reset(engine, json),
        },
        Commands::Migrate => commands::migrate::run(engine, json),
        Commands::Doctor { fix } => commands::doctor::run(engine, fix, json),
        Commands::Clean => commands::maintenance::clean(engine, json),
        Commands::Upgrade => commands::maintenance::upgrade(engine, json),
        Commands::Info => commands::info::run(engine, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    }
}

fn parse_key(key: &str) -> Result<SettingKey, Failure> {
    key.parse::<SettingKey>()
        .map_err(|e| Failure::from(nsm_core::CoreError::from(e)))
}
