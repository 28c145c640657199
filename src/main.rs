#![allow(clippy::print_stdout, reason = "CLI subcommands report results on stdout")]

use clap::{Parser, Subcommand};
use log::error;
use snooper_lib::{Config, InitError, Snooper, StatusReport};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "snooper")]
#[command(about = "Keeps a foreground-app observer alive and reports to a consumer engine")]
struct Cli {
    /// Path to a TOML config file (defaults to the platform config dir)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the keep-alive host in the foreground until `stop-host`
    Host,

    /// Run the reconciler once: start the host if needed and resync the engine
    Reconcile {
        /// Seconds to keep a freshly started engine alive before exiting
        #[arg(long, default_value_t = 5)]
        linger_secs: u64,
    },

    /// Register the periodic reconciler (keeps an existing registration)
    Schedule,

    /// Remove the periodic reconciler
    Cancel,

    /// Run scheduled work that is due; meant for a cron entry or systemd timer
    RunDue {
        /// Seconds to keep a freshly started engine alive before exiting
        #[arg(long, default_value_t = 5)]
        linger_secs: u64,
    },

    /// Register an engine entry point and print its callback handle
    RegisterEntry {
        /// Program started as the consumer engine
        program: String,
        /// Entry point name passed to the program
        entry_point: String,
    },

    /// Persist the callback handle the engine is rebuilt from
    RegisterCallback {
        handle: i64,
    },

    /// Show host, callback and schedule state
    Status,

    /// Ask a running keep-alive host to stop
    StopHost,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, InitError> {
    Ok(match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    })
}

/// Arguments that re-run this executable as the keep-alive host.
fn host_args(config: Option<&PathBuf>) -> Vec<OsString> {
    let mut args = Vec::new();
    if let Some(path) = config {
        args.push(OsString::from("--config"));
        args.push(path.clone().into_os_string());
    }
    args.push(OsString::from("host"));
    args
}

fn print_status(status: &StatusReport) {
    match &status.host {
        Some(host) => println!("host:        running (pid {})", host.pid),
        None => println!("host:        stopped"),
    }
    match status.indicator.as_ref().and_then(|r| r.notification.as_ref()) {
        Some(notification) => println!("indicator:   {}: {}", notification.title, notification.text),
        None => println!("indicator:   none"),
    }
    match &status.callback {
        Some(callback) => println!("callback:    {}", callback.handle),
        None => println!("callback:    not registered"),
    }
    println!("permission:  {}", if status.permission { "granted" } else { "denied" });
    if status.work.is_empty() {
        println!("work:        none scheduled");
    }
    for task in &status.work {
        println!(
            "work:        {} every {}s, next at {}, attempt {}, last {}",
            task.name,
            task.interval_secs,
            task.next_run_at,
            task.run_attempt,
            task.last_outcome.as_deref().unwrap_or("never run")
        );
    }
}

fn run(cli: Cli) -> Result<(), InitError> {
    let config = load_config(cli.config.as_ref())?;
    let app = Snooper::open(config, host_args(cli.config.as_ref()))?;

    match cli.command {
        Commands::Host => app.run_host()?,
        Commands::Reconcile { linger_secs } => {
            let outcome = app.reconcile_once(Duration::from_secs(linger_secs))?;
            println!("{outcome:?}");
        }
        Commands::Schedule => println!("{:?}", app.schedule()?),
        Commands::Cancel => println!("{}", if app.cancel()? { "cancelled" } else { "nothing scheduled" }),
        Commands::RunDue { linger_secs } => {
            for (name, outcome) in app.run_due(Duration::from_secs(linger_secs))? {
                println!("{name}: {}", outcome.as_str());
            }
        }
        Commands::RegisterEntry { program, entry_point } => {
            println!("{}", app.register_entry(&program, &entry_point)?);
        }
        Commands::RegisterCallback { handle } => app.register_callback(handle)?,
        Commands::Status => print_status(&app.status()?),
        Commands::StopHost => println!("{}", if app.stop_host()? { "stop requested" } else { "not running" }),
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
