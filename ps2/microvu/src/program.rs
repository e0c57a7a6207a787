use crate::code_cache::CodePtr;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Age {
    /// Slot is free
    Dead,
    Young,
}

/// Span of microcode a compiled program read, as byte offsets of the first and last
/// instruction pair. `None` means the translator could not determine that end.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Range {
    pub begin: Option<u32>,
    pub end: Option<u32>,
}

impl Range {
    pub fn new(begin: u32, end: u32) -> Range {
        Range { begin: Some(begin), end: Some(end) }
    }

    /// A range whose end is unknown (e.g. a register jump left the trace)
    pub fn open(begin: u32) -> Range {
        Range { begin: Some(begin), end: None }
    }

    pub fn span(&self) -> Option<(u32, u32)> {
        match (self.begin, self.end) {
            (Some(begin), Some(end)) if begin <= end => Some((begin, end)),
            _ => None,
        }
    }
}

/// The ranges a program depends on.
///
/// `Indeterminate` forces a whole-image compare.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Ranges {
    #[default]
    Indeterminate,
    Known(Vec<Range>),
}

impl Ranges {
    pub fn from_observed(observed: Vec<Range>, max: usize) -> Ranges {
        if observed.is_empty() || observed.len() > max {
            Ranges::Indeterminate
        } else {
            Ranges::Known(observed)
        }
    }

    /// Number of recorded ranges, `None` when indeterminate
    pub fn total(&self) -> Option<usize> {
        match self {
            Ranges::Indeterminate => None,
            Ranges::Known(list) => Some(list.len()),
        }
    }
}

/// Compiled code for one entry point of a program
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub entry: CodePtr,
    pub size: usize,
}

/// A cached snapshot of the microcode image and the code compiled from it
pub struct Program {
    pub(crate) index: usize,
    pub(crate) used: bool,
    pub(crate) age: Age,
    pub(crate) frame: u32,
    pub(crate) start_pc: Option<usize>,
    pub(crate) data: Box<[u8]>,
    pub(crate) ranges: Ranges,
    pub(crate) blocks: Box<[Option<Block>]>,
}

impl Program {
    pub(crate) fn new(index: usize, micro_mem_size: usize, buckets: usize) -> Program {
        Program {
            index,
            used: false,
            age: Age::Dead,
            frame: 0,
            start_pc: None,
            data: vec![0; micro_mem_size].into_boxed_slice(),
            ranges: Ranges::Indeterminate,
            blocks: vec![None; buckets].into_boxed_slice(),
        }
    }

    /// Returns the slot to the dead state
    pub(crate) fn clear(&mut self, frame: u32) {
        self.used = false;
        self.age = Age::Dead;
        self.frame = frame;
        self.start_pc = None;
        self.data.fill(0);
        self.ranges = Ranges::Indeterminate;
        self.blocks.fill(None);
    }

    /// Snapshot the live microcode into this slot and mark it as in use
    pub(crate) fn cache(&mut self, micro: &[u8]) {
        self.data.copy_from_slice(micro);
        self.age = Age::Young;
        self.used = true;
    }

    pub(crate) fn touch(&mut self) {
        self.used = true;
        self.age = Age::Young;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn used(&self) -> bool {
        self.used
    }

    pub fn age(&self) -> Age {
        self.age
    }

    pub fn is_dead(&self) -> bool {
        self.age == Age::Dead
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Bucket this program is listed under
    pub fn start_pc(&self) -> Option<usize> {
        self.start_pc
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn ranges(&self) -> &Ranges {
        &self.ranges
    }

    pub fn block(&self, bucket: usize) -> Option<Block> {
        self.blocks.get(bucket).copied().flatten()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }
}
