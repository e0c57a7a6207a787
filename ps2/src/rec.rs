use anyhow::{anyhow, Context};
use common::HostFeatures;
use microvu::{CodePtr, MicroVu, MicroVuConfig, Stats, TraceTranslator, Translator};
use tracing::{error, trace};

use crate::engine::ExecutionEngine;
use crate::vu::{Unit, VuRegs};

/// CPU provider for one vector unit, backed by the microVU recompiler
pub struct RecMicroVu<T: Translator + Default = TraceTranslator> {
    unit: Unit,
    config: MicroVuConfig,
    alloc_count: u32,
    vu: Option<MicroVu<T>>,
}

impl<T: Translator + Default> RecMicroVu<T> {
    pub fn new(unit: Unit, config: MicroVuConfig) -> RecMicroVu<T> {
        RecMicroVu {
            unit,
            config,
            alloc_count: 0,
            vu: None,
        }
    }

    /// Only the first call does anything
    pub fn allocate(&mut self, host: HostFeatures) -> anyhow::Result<()> {
        if self.alloc_count == 0 {
            let vu = MicroVu::new(self.unit.index(), self.config.clone(), T::default(), host)
                .with_context(|| format!("failed to allocate the {} recompiler", self.unit))?;
            self.vu = Some(vu);
            self.alloc_count += 1;
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        if self.alloc_count > 0 {
            self.alloc_count -= 1;
            if let Some(vu) = self.vu.take() {
                vu.close();
            }
        }
    }

    pub fn reset(&mut self) {
        match self.vu.as_mut() {
            Some(vu) => vu.reset(),
            None => error!("MicroVU{} CPU Provider has not been allocated prior to reset!", self.unit.index()),
        }
    }

    /// Runs the unit from `TPC` if its `VPU_STAT` run bit is set.
    /// Returns the entry point that was handed to the engine.
    pub fn execute(&mut self, regs: &VuRegs, vpu_stat: u32, cycles: u32, engine: &mut dyn ExecutionEngine) -> anyhow::Result<Option<CodePtr>> {
        if vpu_stat & self.unit.run_bit() == 0 {
            return Ok(None);
        }
        let unit = self.unit;
        let vu = self.vu.as_mut().ok_or_else(|| anyhow!("{} executed before it was allocated", unit))?;
        let entry = vu.resolve(&regs.micro, regs.tpc)
            .with_context(|| format!("{} failed to resolve TPC {:#06x}", unit, regs.tpc))?;

        engine.run(unit, vu.dispatchers(), entry, cycles)
            .with_context(|| format!("{} execution failed at TPC {:#06x}", unit, regs.tpc))?;
        Ok(Some(entry))
    }

    /// Guest wrote microcode memory
    pub fn clear(&mut self, addr: u32, size: u32) {
        match self.vu.as_mut() {
            Some(vu) => vu.clear(addr, size),
            None => trace!("{}: clear before allocation ignored", self.unit),
        }
    }

    pub fn vsync(&mut self) {
        if let Some(vu) = self.vu.as_mut() {
            vu.vsync_update();
        }
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn is_allocated(&self) -> bool {
        self.vu.is_some()
    }

    pub fn alloc_count(&self) -> u32 {
        self.alloc_count
    }

    pub fn vu(&self) -> Option<&MicroVu<T>> {
        self.vu.as_ref()
    }

    pub fn stats(&self) -> Option<Stats> {
        self.vu.as_ref().map(MicroVu::stats)
    }
}
