use crate::MicroVuError;

const KB: usize = 1 << 10;
const MB: usize = 1 << 20;

/// What vsync does with programs that were not touched during the frame
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum StaleProgramPolicy {
    /// Only drop the `used` latch. Slots are reclaimed when the table fills up.
    #[default]
    Lazy,
    /// Also kill programs that have not been used for this many frames
    KillAfterFrames(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MicroVuConfig {
    /// Bytes of code cache available to compiled programs (excludes the dispatcher page)
    pub cache_size: usize,
    /// Capacity of the program slot table
    pub max_programs: usize,
    /// Size of the unit's microcode memory
    pub micro_mem_size: usize,
    /// Bytes per entry point. One lookup bucket exists per granule.
    pub granularity: usize,
    /// Bytes reserved at the start of the cache for the dispatcher stubs
    pub dispatcher_size: usize,
    /// Headroom kept below the end of the cache so a compile never runs off the end
    pub safe_zone: usize,
    /// Extra bytes compared past the end of each recorded range
    pub compare_slack: usize,
    /// Maximum ranges a program records before falling back to whole-image compares
    pub max_ranges: usize,
    pub stale_policy: StaleProgramPolicy,
}

impl MicroVuConfig {
    pub fn vu0() -> MicroVuConfig {
        MicroVuConfig {
            micro_mem_size: 4 * KB,
            ..Self::base()
        }
    }

    pub fn vu1() -> MicroVuConfig {
        MicroVuConfig {
            micro_mem_size: 16 * KB,
            ..Self::base()
        }
    }

    pub fn for_unit(index: usize) -> MicroVuConfig {
        if index == 0 { Self::vu0() } else { Self::vu1() }
    }

    fn base() -> MicroVuConfig {
        MicroVuConfig {
            cache_size: 16 * MB,
            max_programs: 64,
            micro_mem_size: 4 * KB,
            granularity: 8,
            dispatcher_size: 4 * KB,
            safe_zone: 3 * MB,
            compare_slack: 8,
            max_ranges: 32,
            stale_policy: StaleProgramPolicy::Lazy,
        }
    }

    /// Number of lookup buckets (entry points) in the microcode image
    pub fn buckets(&self) -> usize {
        self.micro_mem_size / self.granularity
    }

    /// Slots visited by one eviction pass
    pub fn eviction_quota(&self) -> usize {
        self.max_programs / 4
    }

    pub fn validate(&self) -> Result<(), MicroVuError> {
        let fail = |msg: String| Err(MicroVuError::InvalidConfig(msg));

        if !self.micro_mem_size.is_power_of_two() {
            return fail(format!("microcode size {:#x} is not a power of two", self.micro_mem_size));
        }
        if self.granularity == 0 || !self.granularity.is_power_of_two()
            || self.granularity > self.micro_mem_size {
            return fail(format!("granularity {} does not divide microcode size {:#x}",
                self.granularity, self.micro_mem_size));
        }
        if self.max_programs < 4 {
            return fail(format!("slot table needs at least 4 programs, got {}", self.max_programs));
        }
        if self.safe_zone >= self.cache_size {
            return fail(format!("safe zone {:#x} leaves no room in a {:#x} byte cache",
                self.safe_zone, self.cache_size));
        }
        if self.dispatcher_size == 0 {
            return fail("dispatcher page can't be empty".to_string());
        }
        if self.max_ranges == 0 {
            return fail("max_ranges must be at least 1".to_string());
        }
        if self.stale_policy == StaleProgramPolicy::KillAfterFrames(0) {
            return fail("programs must be allowed to live for at least one frame".to_string());
        }
        Ok(())
    }
}
