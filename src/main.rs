use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use common::{cli::GlobalOpts, logging, HostFeatures};
use microvu::{MicroVuConfig, StaleProgramPolicy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ps2::{ExecutionEngine, RecordingEngine, Unit, VuContext};
use tracing::info;

mod workload;

use workload::Microprogram;

/// Replays a synthetic microcode workload through the microVU program cache
#[derive(Parser)]
#[command(name = "microvu-rec", version, disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts<Unit>,

    /// Frames to replay
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Distinct microprograms per unit
    #[arg(long, default_value_t = 24)]
    programs: usize,

    /// Entry points per microprogram
    #[arg(long, default_value_t = 4)]
    entries: usize,

    /// Microcode uploads per unit and frame
    #[arg(long, default_value_t = 8)]
    uploads: usize,

    /// Cycles handed to VU0 per execute
    #[arg(long, default_value_t = 8192)]
    cycles: u32,

    /// Code cache size in MB (default 16)
    #[arg(long)]
    cache_mb: Option<usize>,

    /// Program slots per unit (default 64)
    #[arg(long)]
    max_programs: Option<usize>,

    /// Raw microcode image to add to the workload. Must match the memory size of every
    /// selected unit, so pair it with --unit.
    #[arg(long)]
    image: Option<PathBuf>,

    /// Kill programs that were not used for this many frames
    #[arg(long)]
    kill_after: Option<u32>,

    #[arg(long, default_value_t = 0x2545_f491_4f6c_dd1d)]
    seed: u64,

    /// Call the compiled blocks on the host instead of only recording them
    #[arg(long)]
    native: bool,
}

impl Cli {
    fn config(&self, unit: Unit) -> MicroVuConfig {
        let mut config = MicroVuConfig::for_unit(unit.index());
        if let Some(mb) = self.cache_mb {
            config.cache_size = mb << 20;
        }
        if let Some(max) = self.max_programs {
            config.max_programs = max;
        }
        if let Some(frames) = self.kill_after {
            config.stale_policy = StaleProgramPolicy::KillAfterFrames(frames);
        }
        config
    }

    fn units(&self) -> Vec<Unit> {
        Unit::ALL.into_iter().filter(|u| self.global.selects(*u)).collect()
    }

    fn engine(&self) -> anyhow::Result<Box<dyn ExecutionEngine>> {
        if self.native {
            native_engine()
        } else {
            Ok(Box::new(RecordingEngine::default()))
        }
    }
}

#[cfg(all(target_arch = "x86_64", unix))]
fn native_engine() -> anyhow::Result<Box<dyn ExecutionEngine>> {
    // Safety: the context compiles with TraceTranslator
    Ok(Box::new(unsafe { ps2::engine::NativeEngine::new() }))
}

#[cfg(not(all(target_arch = "x86_64", unix)))]
fn native_engine() -> anyhow::Result<Box<dyn ExecutionEngine>> {
    bail!("--native needs an x86_64 unix host")
}

fn workload(cli: &Cli, unit: Unit, mem_size: usize, rng: &mut StdRng) -> anyhow::Result<Vec<Microprogram>> {
    let mut programs: Vec<_> = (0..cli.programs.max(1))
        .map(|_| workload::generate(rng, mem_size, cli.entries))
        .collect();

    if let Some(path) = &cli.image {
        let image = std::fs::read(path)
            .with_context(|| format!("failed to read microcode image {}", path.display()))?;
        if image.len() != mem_size {
            bail!("{} is {} bytes, {} microcode memory is {} bytes", path.display(), image.len(), unit, mem_size);
        }
        programs.push(Microprogram::from_image(image));
    }
    Ok(programs)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.global.log_level)?;

    let host = HostFeatures::detect();
    let mut vu: VuContext = VuContext::new(cli.config(Unit::Vu0), cli.config(Unit::Vu1));
    let units = cli.units();
    for &unit in &units {
        vu.allocate(unit, host)?;
    }

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let mut programs = Vec::new();
    for &unit in &units {
        let mem_size = vu.regs(unit).micro.len();
        programs.push((unit, workload(&cli, unit, mem_size, &mut rng)?));
    }
    let mut engine = cli.engine()?;

    info!("replaying {} frames, {} programs per unit", cli.frames, cli.programs);
    for _ in 0..cli.frames {
        for _ in 0..cli.uploads {
            for (unit, programs) in &programs {
                // Games mostly stick to a few hot programs
                let pick = if rng.gen_range(0..4) != 0 {
                    rng.gen_range(0..programs.len().div_ceil(4))
                } else {
                    rng.gen_range(0..programs.len())
                };
                let program = &programs[pick];
                vu.write_micro(*unit, 0, &program.image)?;

                for _ in 0..program.entries.len() {
                    let tpc = program.entries[rng.gen_range(0..program.entries.len())];
                    vu.start(*unit, tpc);
                    vu.execute(*unit, cli.cycles, engine.as_mut())?;
                }
            }
        }
        vu.vsync();
    }

    for &unit in &units {
        let rec = vu.rec(unit);
        if let (Some(stats), Some(mvu)) = (rec.stats(), rec.vu()) {
            info!("{}: {}", unit, stats);
            info!("{}: {}/{} programs live, {} of code",
                unit, mvu.programs().live(), mvu.programs().capacity(),
                common::util::format_size(mvu.code_cache().used()));
        }
    }
    vu.shutdown();
    Ok(())
}
