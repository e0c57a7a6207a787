use tracing::warn;

use crate::program::{Program, Ranges};

/// Outcome of comparing a cached program against the live microcode
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Comparison {
    Mismatch,
    /// Every recorded range matched
    Partial,
    /// The whole image matched
    Full,
}

impl Comparison {
    pub fn matched(self) -> bool {
        self != Comparison::Mismatch
    }
}

/// Whole-image compare
pub fn compare_full(prog: &Program, micro: &[u8]) -> bool {
    prog.data[..] == micro[..]
}

/// Compares only the recorded ranges, each extended by `slack` bytes and clamped to the image.
///
/// Returns `None` if any range is undetermined; the caller has to fall back to a full compare.
pub fn compare_partial(prog: &Program, micro: &[u8], slack: usize, index: usize) -> Option<bool> {
    let list = match &prog.ranges {
        Ranges::Known(list) => list,
        Ranges::Indeterminate => return None,
    };

    let len = micro.len().min(prog.data.len());
    for (i, range) in list.iter().enumerate() {
        let Some((begin, end)) = range.span() else {
            warn!(index, "microVU{}: Negative Range![{}][{}]", index, i, list.len());
            return None;
        };
        let begin = begin as usize;
        let stop = (end as usize + slack).min(len);
        if begin >= stop {
            continue;
        }
        if prog.data[begin..stop] != micro[begin..stop] {
            return Some(false);
        }
    }
    Some(true)
}

/// Compare a cached program against the live microcode. Dead programs never match.
pub fn compare(prog: &Program, micro: &[u8], slack: usize, index: usize) -> Comparison {
    if prog.is_dead() {
        return Comparison::Mismatch;
    }
    match compare_partial(prog, micro, slack, index) {
        Some(true) => Comparison::Partial,
        Some(false) => Comparison::Mismatch,
        None if compare_full(prog, micro) => Comparison::Full,
        None => Comparison::Mismatch,
    }
}
