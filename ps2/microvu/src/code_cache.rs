use core::fmt;
use core::ptr::NonNull;

use tracing::info;

use common::util::align_up;

use crate::MicroVuError;

const PAGE_SIZE: usize = 4096;

/// Trap fill for unused cache memory (int3 on x86)
pub const TRAP_FILL: u8 = 0xcc;

/// Address of host code inside a [`CodeCache`]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct CodePtr(NonNull<u8>);

// A CodePtr is only an address. Executing it is the engine's business.
unsafe impl Send for CodePtr {}
unsafe impl Sync for CodePtr {}

impl CodePtr {
    pub fn as_ptr(self) -> *const u8 {
        self.0.as_ptr()
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// # Safety
    /// `self + offset` must stay inside the cache mapping this pointer came from
    pub unsafe fn add(self, offset: usize) -> CodePtr {
        CodePtr(NonNull::new_unchecked(self.0.as_ptr().add(offset)))
    }
}

impl fmt::Debug for CodePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodePtr({:#x})", self.addr())
    }
}

/// Preallocated executable memory for one vector unit.
///
/// Layout: `[dispatcher page][compiled programs ... soft end][safe zone]`.
/// Code is only ever appended; the only way to reclaim space is [`CodeCache::reset`].
pub struct CodeCache {
    base: NonNull<u8>,
    mapped: usize,
    /// offset of the first byte past the dispatcher page
    start: usize,
    /// write cursor (offset)
    ptr: usize,
    /// soft end (offset). Past this, the cache counts as full.
    end: usize,
}

unsafe impl Send for CodeCache {}

impl CodeCache {
    /// Maps `dispatcher_size + cache_size` bytes (rounded up to a page) and fills them with traps.
    ///
    /// The cursor starts at the dispatcher page so the dispatcher stubs can be emitted;
    /// call [`CodeCache::reset`] afterwards to move it to the program region.
    pub fn allocate(index: usize, cache_size: usize, dispatcher_size: usize, safe_zone: usize) -> Result<CodeCache, MicroVuError> {
        if safe_zone >= cache_size {
            return Err(MicroVuError::InvalidConfig(format!(
                "safe zone {:#x} does not fit in a {:#x} byte cache", safe_zone, cache_size)));
        }
        let Some(total) = dispatcher_size.checked_add(cache_size) else {
            return Err(MicroVuError::InvalidConfig(format!(
                "cache size {:#x} plus dispatcher {:#x} overflows", cache_size, dispatcher_size)));
        };
        let mapped = align_up(total, PAGE_SIZE);
        let base = map(mapped).ok_or(MicroVuError::OutOfMemory { index, size: mapped })?;

        // Safety: `map` returned `mapped` writable bytes
        unsafe { core::ptr::write_bytes(base.as_ptr(), TRAP_FILL, mapped) };

        info!(index, size = mapped, "microVU{}: mapped {} of code cache", index, common::util::format_size(mapped));

        Ok(CodeCache {
            base,
            mapped,
            start: dispatcher_size,
            ptr: 0,
            end: total - safe_zone,
        })
    }

    /// Rewinds the cursor to the start of the program region. The mapping is kept.
    pub fn reset(&mut self) {
        self.ptr = self.start;
    }

    /// Appends `code` at the cursor and returns where it landed
    pub fn emit(&mut self, code: &[u8]) -> Result<CodePtr, MicroVuError> {
        let available = self.mapped - self.ptr;
        if code.len() > available {
            return Err(MicroVuError::CodeCacheOverflow { requested: code.len(), available });
        }
        let at = self.cursor();
        // Safety: bounds checked above, and `code` can't alias our private mapping
        unsafe {
            core::ptr::copy_nonoverlapping(code.as_ptr(), self.base.as_ptr().add(self.ptr), code.len());
        }
        self.ptr += code.len();
        Ok(at)
    }

    pub fn cursor(&self) -> CodePtr {
        self.at(self.ptr)
    }

    pub fn start(&self) -> CodePtr {
        self.at(self.start)
    }

    pub fn end(&self) -> CodePtr {
        self.at(self.end)
    }

    /// True once the cursor passed the soft end. The owner must reset before compiling again.
    pub fn is_full(&self) -> bool {
        self.ptr > self.end
    }

    /// Bytes of program code emitted since the last reset
    pub fn used(&self) -> usize {
        self.ptr.saturating_sub(self.start)
    }

    pub fn contains(&self, code: CodePtr) -> bool {
        let base = self.base.as_ptr() as usize;
        (base..base + self.mapped).contains(&code.addr())
    }

    /// Offset of `code` from the start of the mapping
    pub fn offset_of(&self, code: CodePtr) -> Option<usize> {
        self.contains(code).then(|| code.addr() - self.base.as_ptr() as usize)
    }

    /// Read back emitted bytes
    pub fn bytes(&self, code: CodePtr, len: usize) -> Option<&[u8]> {
        let offset = self.offset_of(code)?;
        if offset + len > self.mapped {
            return None;
        }
        // Safety: range checked against the mapping, and we hold &self so no emit is in flight
        Some(unsafe { core::slice::from_raw_parts(self.base.as_ptr().add(offset), len) })
    }

    fn at(&self, offset: usize) -> CodePtr {
        debug_assert!(offset <= self.mapped);
        // Safety: offset is within (or one past) the mapping, so it's non-null
        CodePtr(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) })
    }
}

impl Drop for CodeCache {
    fn drop(&mut self) {
        unmap(self.base, self.mapped);
    }
}

#[cfg(unix)]
fn map(size: usize) -> Option<NonNull<u8>> {
    // Safety: anonymous private mapping, no file descriptor involved
    let ptr = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return None;
    }
    NonNull::new(ptr as *mut u8)
}

#[cfg(unix)]
fn unmap(base: NonNull<u8>, size: usize) {
    // Safety: base/size are exactly what mmap gave us
    unsafe {
        libc::munmap(base.as_ptr() as *mut libc::c_void, size);
    }
}

// Non-unix hosts get plain page-aligned memory. Good enough to build and test the cache,
// but the engine can't execute from it.
#[cfg(not(unix))]
fn map(size: usize) -> Option<NonNull<u8>> {
    let layout = std::alloc::Layout::from_size_align(size, PAGE_SIZE).ok()?;
    NonNull::new(unsafe { std::alloc::alloc(layout) })
}

#[cfg(not(unix))]
fn unmap(base: NonNull<u8>, size: usize) {
    if let Ok(layout) = std::alloc::Layout::from_size_align(size, PAGE_SIZE) {
        unsafe { std::alloc::dealloc(base.as_ptr(), layout) };
    }
}
