//! gscale: drive the scaling engine against the simulated backend.
//!
//! Useful for poking at the submission pipeline without hardware: dump the
//! capability record for a silicon revision, run a single job from a JSON
//! file, or stress the arbiter with concurrent clients.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use gscale_core::stubs::{ScriptedOracle, StubBehavior, StubMapper, StubScaler};
use gscale_core::{Capability, ChipVariant, ClientId, DeviceContext, EngineConfig, JobConfig, Rect};

#[derive(Parser)]
#[command(name = "gscale", about = "Scaling-engine diagnostic driver")]
struct Cli {
    /// Log filter, e.g. "debug" or "gscale_core=trace".
    #[arg(long, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Variant {
    Gen1,
    Gen1VideoQuirk,
    Gen2BlackLine,
    Gen2,
    Gen3,
    Unknown,
}

impl From<Variant> for ChipVariant {
    fn from(v: Variant) -> Self {
        match v {
            Variant::Gen1 => ChipVariant::Gen1,
            Variant::Gen1VideoQuirk => ChipVariant::Gen1VideoQuirk,
            Variant::Gen2BlackLine => ChipVariant::Gen2BlackLine,
            Variant::Gen2 => ChipVariant::Gen2,
            Variant::Gen3 => ChipVariant::Gen3,
            Variant::Unknown => ChipVariant::Unknown,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the capability record for a silicon revision.
    Caps {
        #[arg(long, value_enum, default_value_t = Variant::Gen3)]
        variant: Variant,
    },
    /// Submit one job from a JSON file through the full pipeline.
    Submit {
        /// Path to a JobConfig JSON document.
        #[arg(long)]
        job: PathBuf,
        #[arg(long, value_enum, default_value_t = Variant::Gen3)]
        variant: Variant,
        /// Completion-wait budget in milliseconds.
        #[arg(long, default_value_t = 500)]
        timeout_ms: u64,
        /// Simulated job duration in milliseconds.
        #[arg(long, default_value_t = 2)]
        duration_ms: u64,
    },
    /// Hammer the arbiter with concurrent clients.
    Stress {
        #[arg(long, default_value_t = 4)]
        clients: u32,
        #[arg(long, default_value_t = 25)]
        jobs: u32,
        /// Simulated job duration in milliseconds.
        #[arg(long, default_value_t = 1)]
        duration_ms: u64,
    },
}

fn wired_device(
    variant: ChipVariant,
    behavior: StubBehavior,
    timeout_ms: u64,
) -> Result<(Arc<DeviceContext>, Arc<StubScaler>)> {
    let hw = Arc::new(StubScaler::with_behavior(behavior));
    let device = DeviceContext::probe(
        EngineConfig {
            wait_timeout_ms: timeout_ms,
            ..EngineConfig::default()
        },
        variant,
        hw.clone(),
        Arc::new(StubMapper::new()),
        Arc::new(ScriptedOracle::all_alive()),
    )
    .context("device probe failed")?;
    let dev = Arc::clone(&device);
    hw.set_irq_handler(move || dev.on_interrupt());
    Ok((device, hw))
}

fn cmd_caps(variant: ChipVariant) -> Result<()> {
    let cap = Capability::for_variant(variant);
    println!("{}", serde_json::to_string_pretty(&cap)?);
    Ok(())
}

fn cmd_submit(
    path: &PathBuf,
    variant: ChipVariant,
    timeout_ms: u64,
    duration_ms: u64,
) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let (device, _hw) = wired_device(
        variant,
        StubBehavior::CompleteAfter(Duration::from_millis(duration_ms)),
        timeout_ms,
    )?;

    let session = device.open(ClientId::current()).context("open failed")?;
    let started = Instant::now();
    match session.submit_raw(&bytes) {
        Ok(()) => {
            println!("job completed in {:?}", started.elapsed());
            println!("{}", session.status_line());
        }
        Err(e) => {
            println!("job failed: {}", e);
            while let Some(fault) = device.pop_fault() {
                println!("fault: code {:#x} busy {}", fault.error_code, fault.busy);
            }
            anyhow::bail!("submission failed");
        }
    }
    Ok(())
}

fn stress_job(seed: u32) -> JobConfig {
    let mut job = JobConfig::default();
    job.primary.enabled = true;
    job.primary.clip_rect = Rect::new(0, 0, 1280 + (seed % 4) * 64, 720);
    job.primary.dest_rect = Rect::new(0, 0, 640, 360);
    job
}

fn cmd_stress(clients: u32, jobs: u32, duration_ms: u64) -> Result<()> {
    let (device, hw) = wired_device(
        ChipVariant::Gen3,
        StubBehavior::CompleteAfter(Duration::from_millis(duration_ms)),
        500,
    )?;

    tracing::info!(clients, jobs, duration_ms, "starting stress run");
    let started = Instant::now();
    let mut workers = Vec::new();
    for client in 0..clients {
        let device = Arc::clone(&device);
        workers.push(thread::spawn(move || -> Result<()> {
            let session = device
                .open(ClientId(1000 + client))
                .context("open failed")?;
            for job in 0..jobs {
                session
                    .submit(&stress_job(client + job))
                    .with_context(|| format!("client {} job {}", client, job))?;
            }
            Ok(())
        }));
    }
    for worker in workers {
        worker.join().expect("worker panicked")?;
    }

    let elapsed = started.elapsed();
    let total = device.jobs_completed();
    println!(
        "{} jobs across {} clients in {:?} ({:.0} jobs/s)",
        total,
        clients,
        elapsed,
        total as f64 / elapsed.as_secs_f64()
    );
    println!("max concurrent triggered jobs: {}", hw.max_concurrent());
    println!("{}", device.status_line());
    anyhow::ensure!(hw.max_concurrent() == 1, "exclusion violated");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Command::Caps { variant } => cmd_caps(variant.into()),
        Command::Submit {
            job,
            variant,
            timeout_ms,
            duration_ms,
        } => cmd_submit(&job, variant.into(), timeout_ms, duration_ms),
        Command::Stress {
            clients,
            jobs,
            duration_ms,
        } => cmd_stress(clients, jobs, duration_ms),
    }
}
