use common::HostFeature;
use tracing::trace;

use crate::code_cache::{CodeCache, CodePtr};
use crate::instructions::{self, Flow, Upper};
use crate::program::{Block, Range};
use crate::MicroVuError;

/// Pipeline state carried between compiled blocks. Opaque to the cache.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineState(pub [u32; 4]);

impl PipelineState {
    pub fn clear(&mut self) {
        *self = PipelineState::default();
    }
}

/// Entry and exit stubs living in the dispatcher page
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Dispatchers {
    /// Called with the block entry as its first argument
    pub start: CodePtr,
    /// Where a block's `ret` lands
    pub exit: CodePtr,
}

pub struct CompileJob<'a> {
    pub index: usize,
    pub micro: &'a [u8],
    pub start_pc: u32,
    pub state: &'a mut PipelineState,
}

pub struct Compiled {
    /// Where execution of `start_pc` begins
    pub entry: CodePtr,
    /// Extra entry points discovered while compiling, by byte offset
    pub blocks: Vec<(u32, Block)>,
    /// Microcode spans the code depends on
    pub ranges: Vec<Range>,
}

/// The instruction translator: turns microcode into host code inside the code cache
pub trait Translator {
    /// Host extensions the emitted code relies on
    fn required_features(&self) -> &'static [HostFeature] {
        &[]
    }

    /// Emits the dispatcher stubs. Called once, with the cursor at the dispatcher page.
    fn emit_dispatchers(&mut self, cache: &mut CodeCache) -> Result<Dispatchers, MicroVuError>;

    fn compile(&mut self, job: CompileJob<'_>, cache: &mut CodeCache) -> Result<Compiled, MicroVuError>;
}

const PAIR: u32 = 8;

const DISPATCHER: [u8; 8] = [0x55, 0x48, 0x89, 0xe5, 0xff, 0xd7, 0x5d, 0xc3];
const DISPATCHER_EXIT: usize = 6;

/// Straight-line trace translator.
///
/// Follows the microcode from the start offset until the end flag (plus its delay slot),
/// queueing branch targets as additional entry points. Each pair becomes a pair of
/// `mov r32, imm32` carrying the two instruction words, and every block ends in `ret`,
/// so entries are callable but do not emulate anything.
#[derive(Debug, Default)]
pub struct TraceTranslator {
    compiled: usize,
}

impl TraceTranslator {
    pub fn compiled(&self) -> usize {
        self.compiled
    }
}

fn pair_at(micro: &[u8], pc: u32) -> (u32, u32) {
    let pc = pc as usize;
    let lower = u32::from_le_bytes([micro[pc], micro[pc + 1], micro[pc + 2], micro[pc + 3]]);
    let upper = u32::from_le_bytes([micro[pc + 4], micro[pc + 5], micro[pc + 6], micro[pc + 7]]);
    (lower, upper)
}

struct Trace {
    code: Vec<u8>,
    ranges: Vec<Range>,
    /// (entry pc, offset into `code`)
    entries: Vec<(u32, usize)>,
}

impl Trace {
    fn emit_pair(&mut self, lower: u32, upper: u32) {
        self.code.push(0xb8); // mov eax, imm32
        self.code.extend_from_slice(&lower.to_le_bytes());
        self.code.push(0xba); // mov edx, imm32
        self.code.extend_from_slice(&upper.to_le_bytes());
    }

    fn emit_ret(&mut self) {
        self.code.push(0xc3);
    }
}

impl TraceTranslator {
    fn trace(micro: &[u8], start_pc: u32) -> Trace {
        let mem_mask = micro.len() as u32 - 1;
        let pairs = micro.len() / PAIR as usize;
        let mut visited = vec![false; pairs];
        let mut pending = vec![start_pc];
        let mut trace = Trace { code: Vec::new(), ranges: Vec::new(), entries: Vec::new() };

        while let Some(entry) = pending.pop() {
            if visited[(entry / PAIR) as usize] {
                continue;
            }
            trace.entries.push((entry, trace.code.len()));

            let mut pc = entry;
            let mut begin = pc;
            // Pairs left to emit before the block ends (delay slots)
            let mut remaining: Option<u32> = None;
            let mut open = false;

            loop {
                let slot = (pc / PAIR) as usize;
                if visited[slot] {
                    // Ran into code that is already part of the trace
                    if pc != begin {
                        trace.ranges.push(Range::new(begin, pc - PAIR));
                    }
                    break;
                }
                visited[slot] = true;

                let (lower, upper_word) = pair_at(micro, pc);
                trace.emit_pair(lower, upper_word);
                let upper = Upper::decode(upper_word);

                if let Some(n) = remaining {
                    if n == 0 {
                        trace.ranges.push(Range::new(begin, pc));
                        break;
                    }
                    remaining = Some(n - 1);
                } else {
                    match instructions::flow(pc, upper, lower, mem_mask) {
                        Flow::Next => {}
                        Flow::Branch { target } => pending.push(target),
                        Flow::Jump { target } => {
                            pending.push(target);
                            remaining = Some(0);
                        }
                        Flow::JumpRegister => {
                            open = true;
                            remaining = Some(0);
                        }
                    }
                    if upper.e() {
                        remaining = Some(0);
                    }
                }

                let next = (pc + PAIR) & mem_mask;
                if next == 0 {
                    // Wrapped past the end of microcode memory
                    trace.ranges.push(Range::new(begin, pc));
                    begin = 0;
                }
                pc = next;
            }

            if open {
                if let Some(last) = trace.ranges.last_mut() {
                    last.end = None;
                }
            }
            trace.emit_ret();
        }
        trace
    }
}

impl Translator for TraceTranslator {
    fn required_features(&self) -> &'static [HostFeature] {
        &[HostFeature::Mmx, HostFeature::Sse, HostFeature::Sse2]
    }

    fn emit_dispatchers(&mut self, cache: &mut CodeCache) -> Result<Dispatchers, MicroVuError> {
        // push rbp; mov rbp, rsp; call rdi
        let start = cache.emit(&DISPATCHER[..DISPATCHER_EXIT])?;
        // pop rbp; ret
        let exit = cache.emit(&DISPATCHER[DISPATCHER_EXIT..])?;
        Ok(Dispatchers { start, exit })
    }

    fn compile(&mut self, job: CompileJob<'_>, cache: &mut CodeCache) -> Result<Compiled, MicroVuError> {
        if job.micro.len() < PAIR as usize || !job.micro.len().is_power_of_two() {
            return Err(MicroVuError::Translator(format!("bad microcode size {:#x}", job.micro.len())));
        }
        let start_pc = job.start_pc & (job.micro.len() as u32 - 1) & !(PAIR - 1);
        let trace = Self::trace(job.micro, start_pc);
        let base = cache.emit(&trace.code)?;

        let blocks = trace.entries.iter().enumerate().map(|(i, &(pc, offset))| {
            let end = trace.entries.get(i + 1).map_or(trace.code.len(), |e| e.1);
            // Safety: offsets lie within the code we just emitted at `base`
            let entry = unsafe { base.add(offset) };
            (pc, Block { entry, size: end - offset })
        }).collect();

        job.state.0[0] = start_pc;
        self.compiled += 1;
        trace!(index = job.index, "microVU{}: traced {:#06x} into {} bytes, {} ranges",
            job.index, start_pc, trace.code.len(), trace.ranges.len());

        Ok(Compiled {
            entry: base,
            blocks,
            ranges: trace.ranges,
        })
    }
}
