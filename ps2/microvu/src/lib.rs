//! microVU: the recompiler for the PS2's two vector units.
//!
//! Compiled code is cached per "program", a snapshot of the whole microcode memory. Lookups
//! go through one bucket per entry point, each remembering the last program that matched
//! there, so a unit that keeps running the same microcode never compares anything.

use common::util::align_down;
use common::HostFeatures;
use tracing::{info, trace, warn};

pub mod code_cache;
pub mod compare;
pub mod config;
pub mod error;
pub mod instructions;
pub mod program;
pub mod program_list;
pub mod programs;
pub mod stats;
pub mod translator;

pub use code_cache::{CodeCache, CodePtr};
pub use config::{MicroVuConfig, StaleProgramPolicy};
pub use error::MicroVuError;
pub use program::{Age, Block, Program, Range, Ranges};
pub use program_list::{ProgramList, QuickRef};
pub use programs::Programs;
pub use stats::Stats;
pub use translator::{CompileJob, Compiled, Dispatchers, PipelineState, TraceTranslator, Translator};

use compare::Comparison;

/// How much of the current program is known to equal the live microcode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sameness {
    Unknown,
    /// Just compiled, or the whole image compared equal
    Full,
}

pub struct MicroVu<T: Translator = TraceTranslator> {
    index: usize,
    config: MicroVuConfig,
    cache: CodeCache,
    dispatchers: Dispatchers,
    translator: T,
    prog: Programs,
    lp_state: PipelineState,
    /// Microcode changed since the last lookup, quick references are gone
    cleared: bool,
    cur: Option<usize>,
    is_same: Sameness,
    stats: Stats,
}

impl<T: Translator> MicroVu<T> {
    /// Only run this once per unit
    pub fn new(index: usize, config: MicroVuConfig, mut translator: T, host: HostFeatures) -> Result<MicroVu<T>, MicroVuError> {
        config.validate()?;
        if let Some(extension) = host.first_missing(translator.required_features()) {
            return Err(MicroVuError::HardwareDeficiency { index, extension });
        }

        let mut cache = CodeCache::allocate(index, config.cache_size, config.dispatcher_size, config.safe_zone)?;

        // Setup entrance/exit points in the first page
        let dispatchers = translator.emit_dispatchers(&mut cache)?;
        if cache.cursor().addr() > cache.start().addr() {
            return Err(MicroVuError::InvalidConfig(format!(
                "dispatcher stubs don't fit in {:#x} bytes", config.dispatcher_size)));
        }

        info!(index, "microVU{}: init", index);
        let prog = Programs::new(&config);
        let mut vu = MicroVu {
            index,
            config,
            cache,
            dispatchers,
            translator,
            prog,
            lp_state: PipelineState::default(),
            cleared: true,
            cur: None,
            is_same: Sameness::Unknown,
            stats: Stats::default(),
        };
        vu.reset();
        Ok(vu)
    }

    /// Throws away every program and rewinds the code cache. The mapping is kept.
    pub fn reset(&mut self) {
        info!(index = self.index, "microVU{}: reset", self.index);
        self.lp_state.clear();
        self.cleared = true;
        self.is_same = Sameness::Unknown;
        self.cur = None;
        self.cache.reset();
        self.prog.reset();
    }

    /// Called when the guest writes microcode memory
    pub fn clear(&mut self, addr: u32, size: u32) {
        if self.cleared {
            return;
        }
        trace!(index = self.index, "microVU{}: clear {:#06x}+{:#x}", self.index, addr, size);
        self.lp_state.clear();
        // Next execution searches/creates a new microprogram
        self.cleared = true;
        self.prog.invalidate_quick();
    }

    /// Finds (or compiles) the code for `start_pc` in the current microcode image
    pub fn resolve(&mut self, micro: &[u8], start_pc: u32) -> Result<CodePtr, MicroVuError> {
        if micro.len() != self.config.micro_mem_size {
            return Err(MicroVuError::ImageSize { expected: self.config.micro_mem_size, actual: micro.len() });
        }
        let start_pc = self.canonical_pc(start_pc);
        let bucket = start_pc as usize / self.config.granularity;

        // Already found (or compiled) since the last write
        if let Some(quick) = self.prog.bucket(bucket).quick() {
            self.stats.quick_hits += 1;
            self.cur = Some(quick.prog);
            self.is_same = Sameness::Unknown;
            self.prog.touch(quick.prog);
            return Ok(quick.entry);
        }

        let hit = self.prog.search(bucket, micro, self.config.compare_slack, self.index, &mut self.stats);
        if let Some(hit) = hit {
            self.stats.search_hits += 1;
            self.cleared = false;
            self.cur = Some(hit.prog);
            self.is_same = match hit.comparison {
                Comparison::Full => Sameness::Full,
                _ => Sameness::Unknown,
            };
            return Ok(hit.entry);
        }

        self.stats.misses += 1;
        self.compile(micro, start_pc, bucket)
    }

    fn canonical_pc(&self, start_pc: u32) -> u32 {
        let mask = self.config.micro_mem_size as u32 - 1;
        let pc = align_down(start_pc & mask, self.config.granularity as u32);
        if pc != start_pc {
            warn!(index = self.index, "microVU{}: startPC {:#x} outside microcode or misaligned, using {:#x}",
                self.index, start_pc, pc);
        }
        pc
    }

    fn compile(&mut self, micro: &[u8], start_pc: u32, bucket: usize) -> Result<CodePtr, MicroVuError> {
        let mut retried = false;
        loop {
            if self.cache.is_full() {
                info!(index = self.index, "microVU{}: code cache full ({} used), resetting",
                    self.index, common::util::format_size(self.cache.used()));
                self.stats.cache_resets += 1;
                self.reset();
            }

            let slot = self.prog.find_least_used(self.index, micro, &mut self.stats);
            let job = CompileJob {
                index: self.index,
                micro,
                start_pc,
                state: &mut self.lp_state,
            };
            match self.translator.compile(job, &mut self.cache) {
                Ok(compiled) => {
                    let entry = self.prog.install(slot, bucket, compiled, self.config.max_ranges);
                    self.cur = Some(slot);
                    self.cleared = false;
                    self.is_same = Sameness::Full;
                    return Ok(entry);
                }
                Err(MicroVuError::CodeCacheOverflow { requested, available }) if !retried => {
                    warn!(index = self.index, "microVU{}: program needed {} bytes with {} left, resetting cache",
                        self.index, requested, available);
                    retried = true;
                    self.stats.cache_resets += 1;
                    self.reset();
                }
                Err(e) => {
                    self.prog.evict(slot, self.index);
                    return Err(e);
                }
            }
        }
    }

    /// Once per frame: drops the `used` latch, and applies the stale policy
    pub fn vsync_update(&mut self) {
        let killed = self.prog.vsync(self.config.stale_policy, self.cur, self.index);
        self.stats.evictions += killed as u64;
    }

    /// Releases the code cache and every program
    pub fn close(self) {
        info!(index = self.index, "microVU{}: close", self.index);
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn config(&self) -> &MicroVuConfig {
        &self.config
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Slot of the last program found or compiled
    pub fn current(&self) -> Option<usize> {
        self.cur
    }

    pub fn is_same(&self) -> Sameness {
        self.is_same
    }

    pub fn programs(&self) -> &Programs {
        &self.prog
    }

    pub fn code_cache(&self) -> &CodeCache {
        &self.cache
    }

    pub fn dispatchers(&self) -> Dispatchers {
        self.dispatchers
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.lp_state
    }

    pub fn translator(&self) -> &T {
        &self.translator
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use common::HostFeature;
    use crate::instructions::{encode_branch, encode_upper};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const MEM: usize = 0x100;

    fn config() -> MicroVuConfig {
        MicroVuConfig {
            cache_size: 0x10000,
            safe_zone: 0x1000,
            micro_mem_size: MEM,
            max_programs: 8,
            ..MicroVuConfig::vu0()
        }
    }

    fn put(micro: &mut [u8], pc: usize, lower: u32, upper: u32) {
        micro[pc..pc + 4].copy_from_slice(&lower.to_le_bytes());
        micro[pc + 4..pc + 8].copy_from_slice(&upper.to_le_bytes());
    }

    /// Image whose lower words all carry `seed`, with the end flag at `end_pc` (if any)
    fn routine(seed: u32, end_pc: Option<usize>) -> Vec<u8> {
        let mut micro = vec![0u8; MEM];
        for pc in (0..MEM).step_by(8) {
            put(&mut micro, pc, seed, 0);
        }
        if let Some(pc) = end_pc {
            put(&mut micro, pc, seed, encode_upper(0, true, false));
        }
        micro
    }

    fn vu() -> MicroVu {
        MicroVu::new(0, config(), TraceTranslator::default(), HostFeatures::all()).unwrap()
    }

    /// Guest upload: new bytes, then the clear notification
    fn load<T: Translator>(vu: &mut MicroVu<T>, micro: &mut Vec<u8>, image: &[u8]) {
        micro.copy_from_slice(image);
        vu.clear(0, image.len() as u32);
    }

    #[derive(Default)]
    struct Scripted {
        compiles: usize,
        /// Popped one per compile before emitting anything
        failures: Vec<MicroVuError>,
        ranges: Vec<Range>,
    }

    impl Translator for Scripted {
        fn emit_dispatchers(&mut self, cache: &mut CodeCache) -> Result<Dispatchers, MicroVuError> {
            let start = cache.emit(&[0xc3])?;
            let exit = cache.emit(&[0xc3])?;
            Ok(Dispatchers { start, exit })
        }

        fn compile(&mut self, job: CompileJob<'_>, cache: &mut CodeCache) -> Result<Compiled, MicroVuError> {
            self.compiles += 1;
            if let Some(e) = self.failures.pop() {
                return Err(e);
            }
            let entry = cache.emit(&[0x90, 0xc3])?;
            Ok(Compiled {
                entry,
                blocks: vec![(job.start_pc, Block { entry, size: 2 })],
                ranges: self.ranges.clone(),
            })
        }
    }

    fn scripted(translator: Scripted) -> MicroVu<Scripted> {
        MicroVu::new(0, config(), translator, HostFeatures::all()).unwrap()
    }

    #[test]
    fn init_layout() {
        let vu = vu();
        let cache = vu.code_cache();
        assert_eq!(cache.offset_of(vu.dispatchers().start), Some(0));
        assert_eq!(cache.cursor(), cache.start());
        assert_eq!(vu.programs().capacity(), 8);
        assert_eq!(vu.programs().live(), 0);
        assert!(vu.is_cleared());
        assert_eq!(vu.current(), None);
        assert_eq!(vu.stats(), Stats::default());
    }

    #[test]
    fn missing_host_feature_fails_init() {
        let host = HostFeatures::all().without(HostFeature::Sse2);
        let err = MicroVu::new(1, MicroVuConfig::vu1(), TraceTranslator::default(), host).err().unwrap();
        assert!(matches!(err, MicroVuError::HardwareDeficiency { index: 1, extension: HostFeature::Sse2 }));
        assert!(err.is_fatal());

        // Checked in order, the first missing one is reported
        let host = HostFeatures::all().without(HostFeature::Sse).without(HostFeature::Mmx);
        let err = MicroVu::new(0, config(), TraceTranslator::default(), host).err().unwrap();
        assert!(matches!(err, MicroVuError::HardwareDeficiency { extension: HostFeature::Mmx, .. }));

        // SSE4.1 is not required
        let host = HostFeatures::all().without(HostFeature::Sse41);
        assert!(MicroVu::new(0, config(), TraceTranslator::default(), host).is_ok());
    }

    #[test]
    fn rejects_bad_config() {
        let bad = MicroVuConfig { granularity: 3, ..config() };
        let err = MicroVu::new(0, bad, TraceTranslator::default(), HostFeatures::all()).err().unwrap();
        assert!(matches!(err, MicroVuError::InvalidConfig(_)));
    }

    #[test]
    fn compile_then_quick_hit() {
        let mut vu = vu();
        let micro = routine(1, Some(0x18));

        let entry = vu.resolve(&micro, 0).unwrap();
        assert_eq!(vu.stats().misses, 1);
        assert_eq!(vu.current(), Some(0));
        assert_eq!(vu.is_same(), Sameness::Full);
        assert!(!vu.is_cleared());
        assert!(vu.code_cache().contains(entry));
        assert_eq!(vu.programs().get(0).ranges(), &Ranges::Known(vec![Range::new(0, 0x20)]));

        assert_eq!(vu.resolve(&micro, 0).unwrap(), entry);
        assert_eq!(vu.stats().quick_hits, 1);
        assert_eq!(vu.stats().comparisons, 0);
        assert_eq!(vu.is_same(), Sameness::Unknown);
        assert_eq!(vu.translator().compiled(), 1);
        assert_eq!(vu.stats().lookups(), 2);
    }

    #[test]
    fn misaligned_start_pc_is_canonicalized() {
        let mut vu = vu();
        let micro = routine(1, Some(0x18));
        let entry = vu.resolve(&micro, 0).unwrap();
        // Wraps around microcode memory and rounds down to the pair
        assert_eq!(vu.resolve(&micro, MEM as u32 + 3).unwrap(), entry);
        assert_eq!(vu.stats().quick_hits, 1);
    }

    #[test]
    fn wrong_image_size() {
        let mut vu = vu();
        let err = vu.resolve(&[0u8; 0x80], 0).unwrap_err();
        assert!(matches!(err, MicroVuError::ImageSize { expected: MEM, actual: 0x80 }));
        assert_eq!(vu.stats().lookups(), 0);
    }

    #[test]
    fn clear_is_idempotent() {
        let mut vu = vu();
        let mut micro = routine(1, Some(0x48));
        let entry = vu.resolve(&micro, 0x40).unwrap();
        assert_eq!(vu.pipeline_state().0[0], 0x40);

        vu.clear(0, 8);
        assert!(vu.is_cleared());
        assert_eq!(vu.pipeline_state(), PipelineState::default());
        assert!(vu.programs().buckets().all(|b| b.quick().is_none()));
        let snapshot = |vu: &MicroVu| {
            let quick: Vec<_> = vu.programs().buckets().map(|b| b.quick()).collect();
            let order: Vec<Vec<_>> = vu.programs().buckets().map(|b| b.iter().collect()).collect();
            (quick, order, vu.pipeline_state(), vu.current(), vu.code_cache().used())
        };
        let first = snapshot(&vu);
        vu.clear(0x10, 8);
        assert!(vu.is_cleared());
        assert_eq!(snapshot(&vu), first);
        assert_eq!(first.1[8], vec![0]);

        // Same bytes: found by search, not compiled
        let image = micro.clone();
        load(&mut vu, &mut micro, &image);
        assert_eq!(vu.resolve(&micro, 0x40).unwrap(), entry);
        assert_eq!(vu.stats().search_hits, 1);
        assert_eq!(vu.stats().comparisons, 1);
        assert_eq!(vu.is_same(), Sameness::Unknown);
        assert!(!vu.is_cleared());
        assert_eq!(vu.translator().compiled(), 1);
        assert_eq!(vu.programs().bucket(8).quick().map(|q| q.entry), Some(entry));
    }

    #[test]
    fn writes_outside_ranges_still_match() {
        let mut vu = vu();
        let mut micro = routine(1, Some(0x18));
        let entry = vu.resolve(&micro, 0).unwrap();

        // Ranges cover [0, 0x20] plus slack
        let mut image = micro.clone();
        image[0x80] ^= 0xff;
        load(&mut vu, &mut micro, &image);
        assert_eq!(vu.resolve(&micro, 0).unwrap(), entry);
        assert_eq!(vu.stats().misses, 1);

        image[0x10] ^= 0xff;
        load(&mut vu, &mut micro, &image);
        let recompiled = vu.resolve(&micro, 0).unwrap();
        assert_ne!(recompiled, entry);
        assert_eq!(vu.stats().misses, 2);
        assert_eq!(vu.programs().live(), 2);
        assert_eq!(vu.programs().bucket(0).iter().collect::<Vec<_>>(), vec![1, 0]);
    }

    #[test]
    fn alternating_images_share_a_bucket() {
        let mut vu = vu();
        let a = routine(1, Some(0x18));
        let b = routine(2, Some(0x18));
        let mut micro = a.clone();

        let entry_a = vu.resolve(&micro, 0).unwrap();
        load(&mut vu, &mut micro, &b);
        let entry_b = vu.resolve(&micro, 0).unwrap();
        assert_ne!(entry_a, entry_b);

        for _ in 0..3 {
            load(&mut vu, &mut micro, &a);
            assert_eq!(vu.resolve(&micro, 0).unwrap(), entry_a);
            assert_eq!(vu.current(), Some(0));
            load(&mut vu, &mut micro, &b);
            assert_eq!(vu.resolve(&micro, 0).unwrap(), entry_b);
            assert_eq!(vu.current(), Some(1));
        }
        // No duplicates were compiled
        assert_eq!(vu.translator().compiled(), 2);
        assert_eq!(vu.programs().live(), 2);
        assert_eq!(vu.programs().bucket(0).len(), 2);
        assert_eq!(vu.stats().search_hits, 6);
    }

    #[test]
    fn live_programs_stay_within_capacity() {
        let mut vu = vu();
        let mut micro = vec![0u8; MEM];
        for seed in 0..20 {
            load(&mut vu, &mut micro, &routine(seed + 1, Some(0x18)));
            let entry = vu.resolve(&micro, 0).unwrap();
            assert!(vu.programs().live() <= vu.programs().capacity());
            assert_eq!(vu.resolve(&micro, 0).unwrap(), entry);
            vu.vsync_update();
        }
        assert_eq!(vu.translator().compiled(), 20);
        assert!(vu.stats().evictions > 0);
        // Every listed program is alive and listed under its own bucket
        for (bucket, list) in vu.programs().buckets().enumerate() {
            for slot in list.iter() {
                let prog = vu.programs().get(slot);
                assert!(!prog.is_dead());
                assert_eq!(prog.start_pc(), Some(bucket));
            }
        }
    }

    #[test]
    fn all_programs_in_use_forces_eviction() {
        let mut vu = vu();
        let mut micro = vec![0u8; MEM];
        // No vsync, so everything compiled stays in use
        for seed in 0..9 {
            load(&mut vu, &mut micro, &routine(seed + 1, Some(0x18)));
            vu.resolve(&micro, 0).unwrap();
        }
        assert_eq!(vu.programs().live(), 8);
        assert_eq!(vu.translator().compiled(), 9);
        assert_eq!(vu.programs().get(0).data(), &routine(9, Some(0x18))[..]);
        assert_eq!(vu.programs().bucket(0).len(), 8);
    }

    #[test]
    fn full_cache_resets_before_compiling() {
        let config = MicroVuConfig { cache_size: 0x2000, safe_zone: 0x1000, max_programs: 16, ..config() };
        let mut vu = MicroVu::new(0, config, TraceTranslator::default(), HostFeatures::all()).unwrap();
        let mut micro = vec![0u8; MEM];

        // No end flag: each program covers the whole image, 321 bytes of code
        for seed in 0..20 {
            load(&mut vu, &mut micro, &routine(seed + 1, None));
            let entry = vu.resolve(&micro, 0).unwrap();
            assert!(vu.code_cache().contains(entry));
        }
        assert_eq!(vu.stats().cache_resets, 1);
        assert_eq!(vu.stats().evictions, 0);
        assert_eq!(vu.programs().live(), 7);
        assert_eq!(vu.code_cache().used(), 7 * 321);
    }

    #[test]
    fn overflow_retries_once() {
        let mut vu = scripted(Scripted {
            failures: vec![MicroVuError::CodeCacheOverflow { requested: 2, available: 0 }],
            ranges: vec![Range::new(0, 0x10)],
            ..Scripted::default()
        });
        let micro = routine(1, None);
        let entry = vu.resolve(&micro, 0).unwrap();
        assert_eq!(vu.code_cache().offset_of(entry), vu.code_cache().offset_of(vu.code_cache().start()));
        assert_eq!(vu.translator().compiles, 2);
        assert_eq!(vu.stats().cache_resets, 1);
        assert_eq!(vu.stats().misses, 1);
        assert_eq!(vu.programs().live(), 1);
    }

    #[test]
    fn compile_errors_surface() {
        let overflow = || MicroVuError::CodeCacheOverflow { requested: 2, available: 0 };
        let mut vu = scripted(Scripted {
            failures: vec![overflow(), overflow()],
            ..Scripted::default()
        });
        let micro = routine(1, None);
        assert!(matches!(vu.resolve(&micro, 0), Err(MicroVuError::CodeCacheOverflow { .. })));
        assert_eq!(vu.programs().live(), 0);

        let mut vu = scripted(Scripted {
            failures: vec![MicroVuError::Translator("unsupported opcode".to_string())],
            ..Scripted::default()
        });
        assert!(matches!(vu.resolve(&micro, 0), Err(MicroVuError::Translator(_))));
        assert_eq!(vu.programs().live(), 0);
        assert!(vu.programs().bucket(0).is_empty());

        // The failed slot doesn't stick around, the next try compiles cleanly
        vu.resolve(&micro, 0).unwrap();
        assert_eq!(vu.programs().live(), 1);
    }

    #[test]
    fn unknown_ranges_compare_everything() {
        // No ranges recorded
        let mut vu = scripted(Scripted::default());
        let mut micro = routine(1, None);
        let entry = vu.resolve(&micro, 0).unwrap();
        assert_eq!(vu.programs().get(0).ranges(), &Ranges::Indeterminate);

        let image = micro.clone();
        load(&mut vu, &mut micro, &image);
        assert_eq!(vu.resolve(&micro, 0).unwrap(), entry);
        assert_eq!(vu.is_same(), Sameness::Full);

        let mut image = micro.clone();
        image[MEM - 1] ^= 1;
        load(&mut vu, &mut micro, &image);
        assert_ne!(vu.resolve(&micro, 0).unwrap(), entry);
        assert_eq!(vu.translator().compiles, 2);
    }

    #[test]
    fn vsync_kills_stale_programs() {
        let config = MicroVuConfig { stale_policy: StaleProgramPolicy::KillAfterFrames(2), ..config() };
        let mut vu = MicroVu::new(0, config, TraceTranslator::default(), HostFeatures::all()).unwrap();
        let mut micro = routine(1, Some(0x18));
        vu.resolve(&micro, 0).unwrap();
        load(&mut vu, &mut micro, &routine(2, Some(0x18)));
        vu.resolve(&micro, 8).unwrap();

        for _ in 0..3 {
            vu.vsync_update();
        }
        assert_eq!(vu.stats().evictions, 1);
        assert!(vu.programs().get(0).is_dead());
        assert!(vu.programs().bucket(0).is_empty());
        // Still current
        assert!(!vu.programs().get(1).is_dead());
        assert_eq!(vu.current(), Some(1));
    }

    #[test]
    fn reset_drops_programs() {
        let mut vu = vu();
        let micro = routine(1, Some(0x18));
        vu.resolve(&micro, 0).unwrap();
        vu.resolve(&micro, 0x20).unwrap();
        assert_eq!(vu.programs().live(), 2);

        vu.reset();
        assert_eq!(vu.programs().live(), 0);
        assert!(vu.is_cleared());
        assert_eq!(vu.current(), None);
        assert_eq!(vu.code_cache().used(), 0);

        vu.resolve(&micro, 0).unwrap();
        assert_eq!(vu.translator().compiled(), 3);
        vu.close();
    }

    #[test]
    fn random_uploads_resolve_to_matching_code() {
        let config = MicroVuConfig { cache_size: 0x2000, ..config() };
        let slack = config.compare_slack;
        let mut vu = MicroVu::new(0, config, TraceTranslator::default(), HostFeatures::all()).unwrap();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut micro = routine(1, Some(0x18));
        let mut lookups = 0;

        for _ in 0..2000 {
            for _ in 0..rng.gen_range(0..3) {
                let pc = rng.gen_range(0..MEM / 8) * 8;
                let lower = match rng.gen_range(0..8) {
                    // B, JR, IBNE
                    0 => encode_branch(0x20, rng.gen_range(-8..8)),
                    1 => encode_branch(0x24, 0),
                    2 => encode_branch(0x29, rng.gen_range(-8..8)),
                    _ => rng.gen::<u32>() & 0x01ff_ffff,
                };
                let upper = encode_upper(rng.gen(), rng.gen_ratio(1, 6), rng.gen_ratio(1, 16));
                put(&mut micro, pc, lower, upper);
                vu.clear(pc as u32, 8);
            }
            if rng.gen_ratio(1, 10) {
                vu.vsync_update();
            }

            // A few hot entry points, and the odd random one
            let pc = match rng.gen_range(0..4) {
                0 => 0,
                1 => 0x40,
                _ => rng.gen_range(0..MEM / 8) * 8,
            };
            let entry = vu.resolve(&micro, pc as u32).unwrap();
            lookups += 1;

            let bucket = pc / 8;
            let slot = vu.current().unwrap();
            let prog = vu.programs().get(slot);
            assert!(!prog.is_dead());
            assert_eq!(prog.start_pc(), Some(bucket));
            assert!(vu.programs().bucket(bucket).contains(slot));
            assert_eq!(prog.block(bucket).map(|b| b.entry), Some(entry));
            assert!(vu.code_cache().contains(entry));

            match prog.ranges() {
                Ranges::Known(list) if list.iter().all(|r| r.span().is_some()) => {
                    for range in list {
                        let (begin, end) = range.span().unwrap();
                        let (begin, stop) = (begin as usize, (end as usize + slack).min(MEM));
                        assert_eq!(&prog.data()[begin..stop], &micro[begin..stop], "range {:?}", range);
                    }
                }
                _ => assert_eq!(prog.data(), &micro[..]),
            }
            assert!(vu.programs().live() <= vu.programs().capacity());
        }

        let stats = vu.stats();
        assert_eq!(stats.lookups(), lookups);
        assert!(stats.quick_hits > 0 && stats.search_hits > 0 && stats.misses > 0);
        assert!(stats.cache_resets > 0);
    }

    #[test]
    fn can_move_between_threads() {
        fn assert_send<T: Send>() {}
        assert_send::<MicroVu>();
        assert_send::<MicroVu<Scripted>>();
    }
}
