//! `vpnbench` command-line entry point.

use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use vpnbench::{
    BenchConfig, BenchError, CliOverrides, ConfigCustodian, ConfigLoader,
    CustodyPaths, PrivilegeError, Principal, ResultStore, RunController,
    RunOutcome, RunSettings, SpeedtestMeter, VpnCli, list_in_custody, logging,
    shutdown_signal,
    custody::restore_stale,
    store::run_stamp,
};

#[derive(Debug, Parser)]
#[command(
    name = "vpnbench",
    version,
    about = "Measure throughput through every AdGuard VPN location, resumably"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Args)]
struct GlobalOpts {
    /// TOML configuration file (default: ./vpnbench.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Environment file loaded before reading VPNBENCH_* variables
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    /// Path or name of the AdGuard VPN CLI
    #[arg(long, global = true)]
    vpn_binary: Option<PathBuf>,
    /// Address of the VPN client's SOCKS5 listener
    #[arg(long, global = true)]
    socks_host: Option<String>,
    #[arg(long, global = true)]
    socks_port: Option<u16>,
    /// Directory holding result CSV files
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,
    /// Directory for per-run log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    /// Per-request timeout of the speed test, e.g. "30s"
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    measure_timeout: Option<Duration>,
    /// Upper bound for each VPN CLI invocation, e.g. "2m"
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    command_timeout: Option<Duration>,
    /// Keep speedtest server URLs on plain http
    #[arg(long, global = true)]
    insecure: bool,
    /// Do not run `config set-mode socks` before the run
    #[arg(long, global = true)]
    skip_socks_mode: bool,
    /// Log to stdout only
    #[arg(long, global = true)]
    no_log_file: bool,
}

impl GlobalOpts {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            vpn_binary: self.vpn_binary.clone(),
            socks_host: self.socks_host.clone(),
            socks_port: self.socks_port,
            results_dir: self.results_dir.clone(),
            log_dir: self.log_dir.clone(),
            measure_timeout: self.measure_timeout,
            command_timeout: self.command_timeout,
            insecure: self.insecure,
            skip_socks_mode: self.skip_socks_mode,
            no_log_file: self.no_log_file,
        }
    }

    fn loader(&self) -> ConfigLoader {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.config {
            loader = loader.with_config_path(path);
        }
        if let Some(path) = &self.env_file {
            loader = loader.with_env_file(path);
        }
        loader
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Benchmark every location not yet in the result file (default)
    Run,
    /// Print the locations the VPN client offers
    Locations,
    /// Show which locations the active result file already covers
    Status,
    /// Put back a VPN configuration left displaced by a killed run
    Restore,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("vpnbench: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let config = cli
        .global
        .loader()
        .load(&cli.global.overrides())
        .context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Locations => locations(&config).await,
        Command::Status => status(&config),
        Command::Restore => restore(&config),
    }
}

async fn run(config: &BenchConfig) -> Result<()> {
    let stamp = run_stamp();
    let log_path = config.log_file.then(|| config.log_path(&stamp));
    logging::init(log_path.as_deref()).context("failed to set up logging")?;
    info!(
        vpn_binary = %config.vpn_binary.display(),
        results_dir = %config.results_dir.display(),
        "vpnbench starting"
    );

    let custodian = custodian(config)?;
    let vpn = VpnCli::new(&config.vpn_binary, config.command_timeout);
    let meter = SpeedtestMeter::new(config.speedtest_options());
    let store = ResultStore::with_latest_policy(
        &config.results_dir,
        config.results_prefix.as_str(),
        stamp,
    );
    let settings = RunSettings {
        endpoint: config.socks.clone(),
        set_socks_mode: config.set_socks_mode,
    };

    let mut controller =
        RunController::new(vpn, meter, custodian, store, settings);
    let report = controller
        .run(shutdown_signal())
        .await
        .map_err(|err| explain(err, config))?;

    if report.outcome == RunOutcome::Interrupted {
        println!("Run interrupted; start vpnbench again to resume.");
    }
    println!(
        "{} measured, {} skipped, {} failed of {} locations. Results: {}",
        report.measured,
        report.skipped,
        report.failed,
        report.total,
        report.results_file.display()
    );
    Ok(())
}

async fn locations(config: &BenchConfig) -> Result<()> {
    logging::init(None).context("failed to set up logging")?;
    let mut custodian = custodian(config)?;
    let vpn = VpnCli::new(&config.vpn_binary, config.command_timeout);

    let fetched = list_in_custody(&vpn, &mut custodian, shutdown_signal())
        .await
        .map_err(|err| explain(err, config))?;
    let Some(locations) = fetched else {
        println!("Interrupted before the catalog was listed.");
        return Ok(());
    };
    println!("{:<4} {:<28} {:<28} {:>5}", "ISO", "Country", "City", "Ping");
    for location in &locations {
        println!(
            "{:<4} {:<28} {:<28} {:>5}",
            location.iso_code,
            location.country,
            location.city,
            location.ping_estimate
        );
    }
    Ok(())
}

fn status(config: &BenchConfig) -> Result<()> {
    logging::init(None).context("failed to set up logging")?;
    let mut store = ResultStore::with_latest_policy(
        &config.results_dir,
        config.results_prefix.as_str(),
        run_stamp(),
    );
    if store.candidates()?.is_empty() {
        println!(
            "No result files matching {}_*.csv in {}",
            config.results_prefix,
            config.results_dir.display()
        );
        return Ok(());
    }

    let mut tested: Vec<String> = store.load_resume_set().into_iter().collect();
    tested.sort();
    println!("Active result file: {}", store.active_path().display());
    println!("{} locations tested: {}", tested.len(), tested.join(" "));
    Ok(())
}

fn restore(config: &BenchConfig) -> Result<()> {
    logging::init(None).context("failed to set up logging")?;
    let principal = Principal::from_environment()
        .map_err(|err| explain(err.into(), config))?;
    let paths = CustodyPaths::for_principal(&principal, &config.config_subdir);

    let restored = restore_stale(&paths).with_context(|| {
        format!("failed to restore {}", paths.destination.display())
    })?;
    if restored {
        println!("Restored {}", paths.destination.display());
    } else {
        println!("Nothing to restore: {} does not exist", paths.backup.display());
    }
    Ok(())
}

fn custodian(config: &BenchConfig) -> Result<ConfigCustodian> {
    let principal = Principal::from_environment()
        .map_err(|err| explain(err.into(), config))?;
    info!(user = %principal.name, "borrowing VPN configuration of invoking user");

    let custodian = ConfigCustodian::new(CustodyPaths::for_principal(
        &principal,
        &config.config_subdir,
    ));
    custodian
        .check_source()
        .map_err(|err| explain(err, config))?;
    Ok(custodian)
}

/// Print operator guidance for precondition failures.
fn explain(err: BenchError, config: &BenchConfig) -> anyhow::Error {
    let binary = config.vpn_binary.display();
    match &err {
        BenchError::Privilege(PrivilegeError::NotRoot) => {
            println!("\nvpnbench needs root privileges. Run it with sudo:");
            println!("    sudo vpnbench");
        }
        BenchError::Privilege(PrivilegeError::UnknownPrincipal) => {
            println!("\nRun vpnbench through sudo from your normal account,");
            println!("not from a root login shell.");
        }
        BenchError::ConfigNotFound { .. } => {
            println!("\nLog in to AdGuard VPN as your normal user first:");
            println!("    {binary} login");
            println!("Then run vpnbench again with sudo.");
        }
        BenchError::Discovery { .. } => {
            println!("\nCheck that the AdGuard VPN CLI is installed at {binary}");
            println!("and that `{binary} list-locations` works for your user.");
        }
        _ => {}
    }
    err.into()
}
