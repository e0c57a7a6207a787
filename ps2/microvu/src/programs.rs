use common::util::wrap_next;
use tracing::{debug, warn};

use crate::code_cache::CodePtr;
use crate::compare::{self, Comparison};
use crate::config::{MicroVuConfig, StaleProgramPolicy};
use crate::program::{Block, Program, Ranges};
use crate::program_list::{ProgramList, QuickRef};
use crate::stats::Stats;
use crate::translator::Compiled;

pub(crate) struct SearchHit {
    pub prog: usize,
    pub entry: CodePtr,
    pub comparison: Comparison,
}

/// The program slot table plus the per-entry-point lookup index into it
pub struct Programs {
    prog: Vec<Program>,
    list: Vec<ProgramList>,
    granularity: usize,
    /// Where the next eviction pass starts. Survives across passes.
    clear_idx: usize,
    cur_frame: u32,
}

impl Programs {
    pub(crate) fn new(config: &MicroVuConfig) -> Programs {
        let buckets = config.buckets();
        Programs {
            prog: (0..config.max_programs)
                .map(|i| Program::new(i, config.micro_mem_size, buckets))
                .collect(),
            list: (0..buckets).map(|_| ProgramList::default()).collect(),
            granularity: config.granularity,
            clear_idx: 0,
            cur_frame: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.prog.len()
    }

    /// Programs that are not dead
    pub fn live(&self) -> usize {
        self.prog.iter().filter(|p| !p.is_dead()).count()
    }

    pub fn get(&self, slot: usize) -> &Program {
        &self.prog[slot]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Program> {
        self.prog.iter()
    }

    pub fn bucket(&self, bucket: usize) -> &ProgramList {
        &self.list[bucket]
    }

    pub fn buckets(&self) -> impl Iterator<Item = &ProgramList> {
        self.list.iter()
    }

    pub fn frame(&self) -> u32 {
        self.cur_frame
    }

    pub fn clear_idx(&self) -> usize {
        self.clear_idx
    }

    pub(crate) fn reset(&mut self) {
        self.cur_frame = 0;
        self.clear_idx = 0;
        for list in self.list.iter_mut() {
            list.clear();
        }
        for (i, prog) in self.prog.iter_mut().enumerate() {
            prog.clear(0);
            prog.index = i;
        }
    }

    pub(crate) fn invalidate_quick(&mut self) {
        for list in self.list.iter_mut() {
            list.invalidate_quick();
        }
    }

    pub(crate) fn touch(&mut self, slot: usize) {
        self.prog[slot].touch();
    }

    /// Scans a bucket for a program matching `micro`. The match moves to the front of the
    /// bucket and becomes its quick reference.
    pub(crate) fn search(&mut self, bucket: usize, micro: &[u8], slack: usize, index: usize, stats: &mut Stats) -> Option<SearchHit> {
        let granularity = self.granularity;
        let Programs { prog, list, .. } = self;

        let mut found = None;
        for (pos, slot) in list[bucket].iter().enumerate() {
            stats.comparisons += 1;
            let comparison = compare::compare(&prog[slot], micro, slack, index);
            if comparison.matched() {
                found = Some((pos, slot, comparison));
                break;
            }
        }
        let (pos, slot, comparison) = found?;

        let Some(entry) = self.prog[slot].block(bucket).map(|block| block.entry) else {
            warn!(index, "microVU{}: program [{:03}] is listed under {:#06x} but has no block there",
                index, slot + 1, bucket * granularity);
            self.evict(slot, index);
            stats.evictions += 1;
            return None;
        };
        let list = &mut self.list[bucket];
        list.promote(pos);
        list.set_quick(QuickRef { prog: slot, entry });
        self.prog[slot].touch();

        Some(SearchHit { prog: slot, entry, comparison })
    }

    /// Returns a slot holding a fresh snapshot of `micro`, marked young and in use.
    ///
    /// Takes the first dead slot. If there is none, one eviction pass visits a quarter of
    /// the table starting at `clear_idx`, clearing every slot not in use.
    pub(crate) fn find_least_used(&mut self, index: usize, micro: &[u8], stats: &mut Stats) -> usize {
        if let Some(slot) = self.prog.iter().position(Program::is_dead) {
            return self.cache_into(slot, index, micro);
        }

        // Every slot is taken, delete old ones
        let max = self.prog.len();
        let walk_start = self.clear_idx;
        let mut first_freed = None;
        for _ in 0..max / 4 {
            let slot = self.clear_idx;
            self.clear_idx = wrap_next(slot, max);
            if self.prog[slot].used {
                continue; // Might be executing
            }
            self.evict(slot, index);
            stats.evictions += 1;
            first_freed.get_or_insert(slot);
        }

        let slot = if !self.prog[walk_start].used {
            walk_start
        } else if let Some(slot) = first_freed {
            slot
        } else if let Some(slot) = (0..max)
                .map(|k| (self.clear_idx + k) % max)
                .find(|slot| !self.prog[*slot].used) {
            slot
        } else {
            warn!(index, "microVU{}: all {} programs in use, reusing [{:03}]", index, max, walk_start + 1);
            walk_start
        };

        if !self.prog[slot].is_dead() {
            self.evict(slot, index);
            stats.evictions += 1;
        }
        self.cache_into(slot, index, micro)
    }

    fn cache_into(&mut self, slot: usize, index: usize, micro: &[u8]) -> usize {
        self.prog[slot].cache(micro);
        self.prog[slot].frame = self.cur_frame;
        debug!(index, "microVU{}: Cached MicroPrograms = [{:03}] [{:03}]", index, slot + 1, self.live());
        slot
    }

    /// Unlinks a program from its bucket and kills it
    pub(crate) fn evict(&mut self, slot: usize, index: usize) {
        if let Some(start) = self.prog[slot].start_pc {
            match self.list.get_mut(start) {
                Some(list) => {
                    if list.remove(slot) {
                        debug!(index, "microVU{}: Deleting List Reference! [{:03}]", index, slot + 1);
                    } else {
                        warn!(index, "microVU{}: program [{:03}] missing from list {:#06x}",
                            index, slot + 1, start * self.granularity);
                    }
                }
                None => warn!(index, "microVU{}: program [{:03}] has startPC {:#x} outside the bucket range",
                    index, slot + 1, start),
            }
        }
        let frame = self.cur_frame;
        self.prog[slot].clear(frame);
    }

    /// Records compiled code in `slot` and publishes it under `bucket`
    pub(crate) fn install(&mut self, slot: usize, bucket: usize, compiled: Compiled, max_ranges: usize) -> CodePtr {
        let granularity = self.granularity;
        let prog = &mut self.prog[slot];
        prog.start_pc = Some(bucket);
        prog.ranges = Ranges::from_observed(compiled.ranges, max_ranges);
        for (pc, block) in compiled.blocks {
            if let Some(entry) = prog.blocks.get_mut(pc as usize / granularity) {
                *entry = Some(block);
            }
        }
        if prog.blocks[bucket].is_none() {
            prog.blocks[bucket] = Some(Block { entry: compiled.entry, size: 0 });
        }

        let list = &mut self.list[bucket];
        list.push_front(slot);
        list.set_quick(QuickRef { prog: slot, entry: compiled.entry });
        debug!("List[{}].Size = {}", bucket, list.len());
        compiled.entry
    }

    /// Per-frame sweep. Returns how many programs were killed by the stale policy.
    pub(crate) fn vsync(&mut self, policy: StaleProgramPolicy, cur: Option<usize>, index: usize) -> usize {
        let mut killed = 0;
        for slot in 0..self.prog.len() {
            let prog = &mut self.prog[slot];
            if prog.is_dead() {
                continue;
            }
            if prog.used {
                prog.used = false;
                prog.frame = self.cur_frame;
            } else if let StaleProgramPolicy::KillAfterFrames(frames) = policy {
                let idle = self.cur_frame.wrapping_sub(prog.frame);
                if idle >= frames && cur != Some(slot) {
                    self.evict(slot, index);
                    killed += 1;
                    debug!(index, "microVU{}: Killing Dead Program [{:03}]", index, slot + 1);
                }
            }
        }
        self.cur_frame = self.cur_frame.wrapping_add(1);
        killed
    }
}
