use microvu::{CodePtr, Dispatchers};

use crate::vu::Unit;

/// Runs compiled microcode. Engines run until the program's end flag.
pub trait ExecutionEngine {
    /// `entry` is entered through `dispatchers.start` and returns through `dispatchers.exit`
    fn run(&mut self, unit: Unit, dispatchers: Dispatchers, entry: CodePtr, cycles: u32) -> anyhow::Result<()>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Run {
    pub unit: Unit,
    pub dispatcher: CodePtr,
    pub entry: CodePtr,
    pub cycles: u32,
}

/// Doesn't execute anything, just remembers what it was asked to run
#[derive(Debug, Default)]
pub struct RecordingEngine {
    runs: Vec<Run>,
}

impl RecordingEngine {
    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn take(&mut self) -> Vec<Run> {
        std::mem::take(&mut self.runs)
    }
}

impl ExecutionEngine for RecordingEngine {
    fn run(&mut self, unit: Unit, dispatchers: Dispatchers, entry: CodePtr, cycles: u32) -> anyhow::Result<()> {
        self.runs.push(Run { unit, dispatcher: dispatchers.start, entry, cycles });
        Ok(())
    }
}

/// Calls compiled blocks on the host through the start dispatcher
#[cfg(all(target_arch = "x86_64", unix))]
pub struct NativeEngine {
    calls: u64,
}

#[cfg(all(target_arch = "x86_64", unix))]
impl NativeEngine {
    /// # Safety
    /// Every entry and dispatcher handed to this engine must come from
    /// [`microvu::TraceTranslator`]: register moves ending in `ret`, called by a stub
    /// that takes the entry in `rdi`.
    pub unsafe fn new() -> NativeEngine {
        NativeEngine { calls: 0 }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

#[cfg(all(target_arch = "x86_64", unix))]
impl ExecutionEngine for NativeEngine {
    fn run(&mut self, _unit: Unit, dispatchers: Dispatchers, entry: CodePtr, _cycles: u32) -> anyhow::Result<()> {
        // Safety: guaranteed by the contract of NativeEngine::new. The stub saves rbp and
        // the block only touches eax/edx, which are caller saved.
        let dispatch: extern "C" fn(*const u8) = unsafe { std::mem::transmute(dispatchers.start.as_ptr()) };
        dispatch(entry.as_ptr());
        self.calls += 1;
        Ok(())
    }
}
