/// Advances a ring index, wrapping back to 0 at `len`
#[inline(always)]
pub fn wrap_next(index: usize, len: usize) -> usize {
    if index + 1 >= len { 0 } else { index + 1 }
}

#[inline(always)]
pub fn align_down(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

#[inline(always)]
pub fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Formats a byte count the way the logs print cache sizes
pub fn format_size(bytes: usize) -> String {
    const MB: usize = 1 << 20;
    const KB: usize = 1 << 10;
    if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping() {
        assert_eq!(wrap_next(0, 4), 1);
        assert_eq!(wrap_next(3, 4), 0);
        assert_eq!(wrap_next(0, 1), 0);
    }

    #[test]
    fn alignment() {
        assert_eq!(align_down(0x1234, 8), 0x1230);
        assert_eq!(align_up(4097, 4096), 8192);
        assert_eq!(align_up(4096, 4096), 4096);
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(3 << 20), "3MB");
        assert_eq!(format_size(0x4000), "16KB");
        assert_eq!(format_size(100), "100B");
    }
}
