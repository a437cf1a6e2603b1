mod check;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use touchlink_core::{ConfigResponse, DEFAULT_CONFIG_JSON, NodeConfig, Topics, compiled_default};
use touchlink_node::NodeSettings;
use touchlink_node::sim::{ConfigResponder, Scenario, SimClock, SimWorld, Simulation, sim_node};

#[derive(Parser)]
#[command(name = "touchlink", about = "Contact sensing for networked statues")]
struct Cli {
    /// Node settings file (TOML). Falls back to $TOUCHLINK_SETTINGS
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the config a node at this address would run
    Identify {
        /// Node network address
        #[arg(long)]
        address: String,

        /// Config response file to resolve against instead of the compiled table
        #[arg(long)]
        response: Option<PathBuf>,
    },

    /// Validate a config response file
    Check {
        /// Response file (JSON)
        file: PathBuf,
    },

    /// Run a scripted multi-statue scenario in virtual time
    Simulate {
        /// Scenario file (TOML); the built-in scenario when omitted
        #[arg(long)]
        scenario: Option<PathBuf>,
    },

    /// Run one node in real time on simulated hardware
    Run {
        /// Node network address
        #[arg(long)]
        address: String,

        /// Config response served to the node
        #[arg(long)]
        response: Option<PathBuf>,

        /// Peer to hold in contact for the whole run (repeatable)
        #[arg(long = "touch")]
        touch: Vec<String>,

        /// Stop after this many seconds instead of waiting for ctrl-c
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

fn load_settings(cli: &Cli) -> Result<NodeSettings> {
    NodeSettings::resolve(cli.settings.as_deref()).context("failed to load settings")
}

fn read_response(path: &Path) -> Result<(String, ConfigResponse)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let response = ConfigResponse::parse_str(&text)
        .with_context(|| format!("{} is not a config response", path.display()))?;
    Ok((text, response))
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Identify { address, response } => cmd_identify(address, response.as_deref()),
        Commands::Check { file } => cmd_check(file),
        Commands::Simulate { scenario } => cmd_simulate(&cli, scenario.as_deref()),
        Commands::Run {
            address,
            response,
            touch,
            duration_secs,
        } => cmd_run(&cli, address, response.as_deref(), touch, *duration_secs).await,
    }
}

fn print_config(config: &NodeConfig, source: &str) {
    print!("{}", config.summary());
    if let Some(mac) = &config.mac_address {
        println!("mac:        {mac}");
    }
    println!("source:     {source}");
}

fn cmd_identify(address: &str, response: Option<&Path>) -> Result<()> {
    let (compiled, matched) = compiled_default(address);
    let Some(path) = response else {
        let source = if matched {
            "compiled table"
        } else {
            "compiled table (address not listed, baseline statue)"
        };
        print_config(&compiled, source);
        return Ok(());
    };

    let (_, response) = read_response(path)?;
    match response.resolve(address, &compiled) {
        Some(resolution) => {
            for rejection in &resolution.rejected {
                println!("rejected:   {rejection}");
            }
            print_config(&resolution.config, &path.display().to_string());
        }
        None => {
            println!("no record for {address} in {}", path.display());
            print_config(&compiled, "compiled table");
        }
    }
    Ok(())
}

fn cmd_check(file: &Path) -> Result<()> {
    let (_, response) = read_response(file)?;
    let reports = check::check_response(&response);

    let mut with_problems = 0;
    for report in &reports {
        if report.problems.is_empty() {
            println!("ok     {}", report.name);
        } else {
            with_problems += 1;
            for problem in &report.problems {
                println!("error  {}: {problem}", report.name);
            }
        }
    }
    println!(
        "{} records, {} with problems",
        reports.len(),
        with_problems
    );
    Ok(())
}

fn cmd_simulate(cli: &Cli, scenario: Option<&Path>) -> Result<()> {
    let settings = load_settings(cli)?;
    let scenario = match scenario {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Scenario::from_toml_str(&text)
                .with_context(|| format!("invalid scenario {}", path.display()))?
        }
        None => Scenario::default(),
    };

    let mut simulation =
        Simulation::new(scenario, settings).context("failed to set up simulation")?;
    for event in simulation.run() {
        println!("{event}");
    }
    println!("--- after {} ms ---", simulation.now_ms());
    for node in simulation.nodes() {
        println!("{}", node.status_line());
    }
    Ok(())
}

async fn cmd_run(
    cli: &Cli,
    address: &str,
    response: Option<&Path>,
    touch: &[String],
    duration_secs: Option<u64>,
) -> Result<()> {
    let settings = load_settings(cli)?;
    let (payload, table) = match response {
        Some(path) => read_response(path)?,
        None => (
            DEFAULT_CONFIG_JSON.to_string(),
            ConfigResponse::parse_str(DEFAULT_CONFIG_JSON).context("compiled table is invalid")?,
        ),
    };

    let bus = touchlink_node::MemoryBus::default();
    let world = SimWorld::new(0.2, 0.001, settings.detector_sample_rate);
    let local = settings
        .local_address
        .clone()
        .unwrap_or_else(|| address.to_string());
    for peer in touch {
        let Some((name, record)) = table.find_by_name(peer) else {
            bail!("no record for peer '{peer}'");
        };
        let (Some(peer_address), Some(frequency)) =
            (record.ip_address.as_deref(), record.emit_frequency())
        else {
            bail!("peer '{name}' needs an ip_address and an emit frequency");
        };
        world.set_frequency(peer_address, frequency);
        world.set_amplitude(peer_address, settings.tone_amplitude);
        world.touch(&local, peer_address);
    }

    let topics = Topics::new(settings.topic_namespace.clone());
    let period = Duration::from_millis(settings.sample_period_ms);
    let mut responder = ConfigResponder::new(&bus, topics, payload)?;
    let mut node = sim_node(settings, &local, &world, &bus, SimClock::wall(), 30_000, 1)
        .context("failed to start node")?;

    let cancel = CancellationToken::new();
    let stopper = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("ctrl-c handler failed: {e}");
                }
            }
        }
        cancel.cancel();
    };
    tokio::join!(
        node.run(cancel.clone()),
        responder.serve(cancel.clone(), period),
        stopper,
    );

    println!("{}", node.status_line());
    Ok(())
}
