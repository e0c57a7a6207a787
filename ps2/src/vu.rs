use core::fmt;

use anyhow::bail;
use clap::ValueEnum;
use common::HostFeatures;
use microvu::{CodePtr, MicroVuConfig, TraceTranslator, Translator};
use tracing::debug;

use crate::engine::ExecutionEngine;
use crate::rec::RecMicroVu;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum)]
pub enum Unit {
    Vu0,
    Vu1,
}

impl Unit {
    pub const ALL: [Unit; 2] = [Unit::Vu0, Unit::Vu1];

    pub fn index(self) -> usize {
        match self {
            Unit::Vu0 => 0,
            Unit::Vu1 => 1,
        }
    }

    /// This unit's bit in VPU_STAT
    pub fn run_bit(self) -> u32 {
        match self {
            Unit::Vu0 => 0x001,
            Unit::Vu1 => 0x100,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VU{}", self.index())
    }
}

/// The parts of a vector unit's state the recompiler cares about
pub struct VuRegs {
    pub micro: Box<[u8]>,
    pub tpc: u32,
}

impl VuRegs {
    pub fn new(micro_mem_size: usize) -> VuRegs {
        VuRegs {
            micro: vec![0; micro_mem_size].into_boxed_slice(),
            tpc: 0,
        }
    }
}

/// VU1 always gets this many cycles per execute call
pub const VU1_RUN_CYCLES: u32 = 3_000_000;

/// Both vector units and their recompilers
pub struct VuContext<T: Translator + Default = TraceTranslator> {
    // VPU_STAT lives in VU0's integer registers, but covers both units
    vpu_stat: u32,
    regs: [VuRegs; 2],
    rec: [RecMicroVu<T>; 2],
    vu1_run_cycles: u32,
}

impl<T: Translator + Default> VuContext<T> {
    pub fn new(vu0: MicroVuConfig, vu1: MicroVuConfig) -> VuContext<T> {
        VuContext {
            vpu_stat: 0,
            regs: [VuRegs::new(vu0.micro_mem_size), VuRegs::new(vu1.micro_mem_size)],
            rec: [RecMicroVu::new(Unit::Vu0, vu0), RecMicroVu::new(Unit::Vu1, vu1)],
            vu1_run_cycles: VU1_RUN_CYCLES,
        }
    }

    pub fn allocate(&mut self, unit: Unit, host: HostFeatures) -> anyhow::Result<()> {
        self.rec[unit.index()].allocate(host)
    }

    pub fn allocate_all(&mut self, host: HostFeatures) -> anyhow::Result<()> {
        for unit in Unit::ALL {
            self.allocate(unit, host)?;
        }
        Ok(())
    }

    /// Guest store into microcode memory
    pub fn write_micro(&mut self, unit: Unit, addr: u32, data: &[u8]) -> anyhow::Result<()> {
        let regs = &mut self.regs[unit.index()];
        let start = addr as usize;
        let end = start + data.len();
        if end > regs.micro.len() {
            bail!("{} microcode write {:#06x}+{:#x} is past the end of {:#x} byte memory",
                unit, addr, data.len(), regs.micro.len());
        }
        regs.micro[start..end].copy_from_slice(data);
        self.rec[unit.index()].clear(addr, data.len() as u32);
        Ok(())
    }

    /// Sets TPC and the run bit
    pub fn start(&mut self, unit: Unit, tpc: u32) {
        self.regs[unit.index()].tpc = tpc;
        self.vpu_stat |= unit.run_bit();
    }

    pub fn is_running(&self, unit: Unit) -> bool {
        self.vpu_stat & unit.run_bit() != 0
    }

    /// Runs `unit` if it was started. VU1 ignores `cycles` and runs for its fixed budget.
    ///
    /// The engine runs up to the end flag, so the unit is stopped afterwards.
    pub fn execute(&mut self, unit: Unit, cycles: u32, engine: &mut dyn ExecutionEngine) -> anyhow::Result<Option<CodePtr>> {
        let cycles = match unit {
            Unit::Vu0 => cycles,
            Unit::Vu1 => self.vu1_run_cycles,
        };
        let i = unit.index();
        let entry = self.rec[i].execute(&self.regs[i], self.vpu_stat, cycles, engine)?;
        if entry.is_some() {
            debug!("{}: ran from TPC {:#06x}", unit, self.regs[i].tpc);
            self.vpu_stat &= !unit.run_bit();
        }
        Ok(entry)
    }

    pub fn vsync(&mut self) {
        for rec in self.rec.iter_mut() {
            rec.vsync();
        }
    }

    pub fn reset(&mut self) {
        self.vpu_stat = 0;
        for rec in self.rec.iter_mut() {
            rec.reset();
        }
    }

    pub fn shutdown(&mut self) {
        for rec in self.rec.iter_mut() {
            rec.shutdown();
        }
    }

    pub fn vpu_stat(&self) -> u32 {
        self.vpu_stat
    }

    pub fn regs(&self, unit: Unit) -> &VuRegs {
        &self.regs[unit.index()]
    }

    pub fn rec(&self, unit: Unit) -> &RecMicroVu<T> {
        &self.rec[unit.index()]
    }

    pub fn set_vu1_run_cycles(&mut self, cycles: u32) {
        self.vu1_run_cycles = cycles;
    }
}
