use anyhow::{Context, Result, bail};
use dockdash::cli::{Args, ConfigDiscovery, DashConfig, ExecutionMode, RunConfig};
use dockdash::container::{
    ContainerClient, ContainerOrchestrator, MemoryRuntime, NetworkProvisioner, create_request,
};
use dockdash::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let config = ConfigDiscovery::discover_config(args.config.as_deref())?;

    match mode {
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info(args.config.as_deref());
            println!();
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        ExecutionMode::Run(run) => run_container(&config, run).await,
        ExecutionMode::Network => ensure_network(&config).await,
        ExecutionMode::Stop(name) => {
            connect(&config).await?.stop(&name).await?;
            println!("Stopped {}", name);
            Ok(())
        }
        ExecutionMode::Remove(name) => {
            connect(&config).await?.delete(&name).await?;
            println!("Removed {}", name);
            Ok(())
        }
        ExecutionMode::Exists(name) => {
            let exists = connect(&config).await?.exists(&name).await?;
            if exists {
                println!("{} exists", name);
            } else {
                println!("{} does not exist", name);
            }
            std::process::exit(if exists { 0 } else { 1 });
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        env::VERBOSE_LOG_FILTER
    } else {
        env::DEFAULT_LOG_FILTER
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Container output owns stdout; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(config: &DashConfig) -> Result<ContainerOrchestrator> {
    ContainerOrchestrator::connect_with(config.client_config(), config.orchestrator_config())
        .await
        .context("Could not reach a container runtime")
}

async fn ensure_network(config: &DashConfig) -> Result<()> {
    let network = config
        .network_spec()
        .context("No [network] section in the configuration")?;
    let client = ContainerClient::with_config(config.client_config()).await?;
    let created = NetworkProvisioner::new(Arc::new(client))
        .ensure_network(&network)
        .await?;

    if created {
        println!("Created network {}", network.name);
    } else {
        println!("Network {} already exists", network.name);
    }
    Ok(())
}

async fn run_container(config: &DashConfig, run: RunConfig) -> Result<()> {
    let spec = config
        .launch_spec()
        .context("Invalid [container] configuration")?;

    let mut orchestrator_config = config.orchestrator_config();
    orchestrator_config.follow_logs &= run.follow_logs;

    let orchestrator = if run.dry_run {
        println!("Dry run, would create:\n{:#?}", create_request(&spec));
        orchestrator_config.settle_delay = Duration::ZERO;
        orchestrator_config.follow_logs = false;
        ContainerOrchestrator::with_runtime(Arc::new(MemoryRuntime::new()), orchestrator_config)
    } else {
        connect(config).await?
    };

    let name = spec.container_name();
    if orchestrator.exists(name).await? {
        bail!(
            "Container {} already exists; remove it with `dockdash rm {}`",
            name,
            name
        );
    }

    let mut handle = orchestrator.run(&spec).await?;
    let container = handle.container();
    println!(
        "{} {} {}",
        container.name,
        container.short_id(),
        container.assigned_ip.as_deref().unwrap_or("-")
    );

    if run.dry_run {
        handle.delete(&orchestrator).await?;
        return Ok(());
    }

    if let Some(delay) = run.teardown_after {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted, tearing down early"),
        }
        if let Err(e) = handle.stop(&orchestrator).await {
            warn!("Stop failed, removing anyway: {}", e);
        }
        if let Some(summary) = handle.delete(&orchestrator).await? {
            info!(
                "Followed {} bytes of stdout and {} bytes of stderr",
                summary.stdout_bytes, summary.stderr_bytes
            );
        }
        return Ok(());
    }

    if let Some(follower) = handle.take_follower() {
        tokio::select! {
            result = follower.join() => {
                if let Err(e) = result {
                    warn!("{}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.shutdown();
                info!("Detached from {}; it keeps running", name);
            }
        }
    }
    Ok(())
}
