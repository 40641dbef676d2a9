use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use glam::Vec3;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use worldtick_common::SessionId;
use worldtick_kernel::bodies::{Drifter, Resting};
use worldtick_kernel::{Entity, EntityKind, EventBus, InstanceManager, LoginEvent, SpawnEvent, WorldRegistry};
use worldtick_sched::{OnboardingState, SchedulerConfig, TickDriver, TickScheduler, WaitingParticipant};
use worldtick_stream::GeneratedCellSource;

#[derive(Parser)]
#[command(name = "worldtick-server", about = "Multi-instance world tick scheduler")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML scheduler configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the general pool size
    #[arg(long, global = true)]
    general_threads: Option<usize>,

    /// Override the participant pool size
    #[arg(long, global = true)]
    participant_threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration
    Info,
    /// Run a demo world for a number of ticks
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Number of ticks to drive
    #[arg(short, long, default_value = "100")]
    ticks: u64,
    /// Creatures in the starting instance
    #[arg(long, default_value = "200")]
    creatures: usize,
    /// Inert objects in the starting instance
    #[arg(long, default_value = "50")]
    objects: usize,
    /// Participants that join while the world runs
    #[arg(short, long, default_value = "20")]
    participants: usize,
    /// Simulated cell generation latency in milliseconds
    #[arg(long, default_value = "5")]
    cell_latency_ms: u64,
    /// Terrain seed
    #[arg(short, long, default_value = "42")]
    seed: u64,
}

fn load_config(cli: &Cli) -> anyhow::Result<SchedulerConfig> {
    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SchedulerConfig::default(),
    };
    if let Some(n) = cli.general_threads {
        config.general_pool_size = n;
    }
    if let Some(n) = cli.participant_threads {
        config.participant_pool_size = n;
    }
    config.validate()?;
    Ok(config)
}

/// Deterministic scatter over a 256x256 area around the origin.
fn scatter(i: usize, seed: u64) -> Vec3 {
    let h = (i as u64 ^ seed).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let x = (h & 0xFF) as f32 - 128.0;
    let z = ((h >> 8) & 0xFF) as f32 - 128.0;
    Vec3::new(x, 64.0, z)
}

fn run_demo(config: SchedulerConfig, args: RunArgs) -> anyhow::Result<()> {
    let RunArgs {
        ticks,
        creatures,
        objects,
        participants,
        cell_latency_ms,
        seed,
    } = args;
    let source = GeneratedCellSource::new(2, seed, Duration::from_millis(cell_latency_ms))
        .context("building cell generator")?;
    let registry = Arc::new(InstanceManager::new(Arc::new(source)));
    let events = Arc::new(EventBus::new());

    let overworld = registry.create_instance();
    for i in 0..creatures {
        let velocity = Vec3::new(((i % 7) as f32 - 3.0) * 0.05, 0.0, ((i % 5) as f32 - 2.0) * 0.05);
        overworld.spawn(Entity::new(EntityKind::Creature, Drifter::new(scatter(i, seed), velocity)))?;
    }
    for i in 0..objects {
        overworld.spawn(Entity::new(EntityKind::Object, Resting::at(scatter(creatures + i, seed))))?;
    }

    // Every other participant joins the overworld; the rest get a fresh instance.
    let counter = AtomicUsize::new(0);
    let target = Arc::clone(&overworld);
    events.listen::<LoginEvent>(move |event| {
        if counter.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
            event.set_spawning_instance(Arc::clone(&target));
        }
        Ok(())
    });
    events.listen::<SpawnEvent>(|event| {
        tracing::info!(session = %event.session, instance = %event.instance, "participant joined");
        Ok(())
    });

    let interval = config.tick_interval();
    let scheduler = Arc::new(TickScheduler::new(config, registry.clone(), events)?);
    let driver = TickDriver::new(Arc::clone(&scheduler));
    let handle = driver.spawn(Some(ticks)).context("starting tick driver")?;

    let sender = scheduler.sender();
    let tickets: Vec<_> = (0..participants)
        .map(|i| {
            std::thread::sleep(interval);
            let body = Resting::at(scatter(10_000 + i, seed));
            sender.enqueue(WaitingParticipant::new(SessionId::new(), body))
        })
        .collect();

    let report = handle
        .join()
        .map_err(|_| anyhow::anyhow!("tick driver panicked"))??;
    if !scheduler.wait_idle(Duration::from_secs(5)) {
        tracing::warn!("worker pools still busy at shutdown");
    }

    let placed = tickets.iter().filter(|t| t.state() == OnboardingState::Placed).count();
    let stats = scheduler.stats();
    println!(
        "Ran {} ticks ({} overruns), avg submit {:?}, max {:?}",
        report.ticks, report.overruns, report.average, report.max
    );
    println!("Instances: {}", registry.len());
    for instance in registry.active_instances() {
        println!(
            "  {}: creatures={} objects={} participants={} cells={}",
            instance.id(),
            instance.creatures().len(),
            instance.objects().len(),
            instance.participants().len(),
            instance.cells().stats().resident
        );
    }
    println!("Participants placed: {placed}/{participants}");
    println!("Stats: {stats}");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Info => {
            println!("worldtick-server v{}", env!("CARGO_PKG_VERSION"));
            print!("{}", config.to_yaml()?);
        }
        Commands::Run(args) => run_demo(config, args)?,
    }

    Ok(())
}
