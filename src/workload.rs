use microvu::instructions::{encode_branch, encode_upper};
use rand::rngs::StdRng;
use rand::Rng;

/// A full microcode image and the entry points a game would start it at
pub struct Microprogram {
    pub image: Vec<u8>,
    pub entries: Vec<u32>,
}

impl Microprogram {
    /// Single entry at 0
    pub fn from_image(image: Vec<u8>) -> Microprogram {
        Microprogram { image, entries: vec![0] }
    }
}

const PAIR: usize = 8;
// IBNE
const BRANCH_OP: u8 = 0x29;

fn put(image: &mut [u8], pair: usize, lower: u32, upper: u32) {
    let pc = pair * PAIR;
    image[pc..pc + 4].copy_from_slice(&lower.to_le_bytes());
    image[pc + 4..pc + 8].copy_from_slice(&upper.to_le_bytes());
}

/// Splits memory into `entries` routines. Each routine ends with the end flag
/// and a delay pair, and sometimes starts with a forward branch into itself.
pub fn generate(rng: &mut StdRng, mem_size: usize, entries: usize) -> Microprogram {
    let pairs = mem_size / PAIR;
    let entries = entries.clamp(1, pairs / 4);
    let segment = pairs / entries;

    let mut image = vec![0u8; mem_size];
    for pair in 0..pairs {
        // Lower opcode bits stay clear so filler never decodes as a branch
        let lower = rng.gen::<u32>() & 0x01ff_ffff;
        let upper = encode_upper(rng.gen::<u32>(), false, false);
        put(&mut image, pair, lower, upper);
    }

    let mut starts = Vec::with_capacity(entries);
    for k in 0..entries {
        let start = k * segment;
        let end = start + 1 + rng.gen_range(0..segment - 2);
        put(&mut image, end, rng.gen::<u32>() & 0x01ff_ffff, encode_upper(rng.gen::<u32>(), true, false));

        if rng.gen_range(0..4) == 0 {
            let offset = rng.gen_range(0..end - start) as i32;
            put(&mut image, start, encode_branch(BRANCH_OP, offset), encode_upper(0, false, false));
        }
        starts.push((start * PAIR) as u32);
    }

    Microprogram { image, entries: starts }
}
