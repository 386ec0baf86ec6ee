/*!
code_buf.rs - Anonymous read/write/execute mapping for generated code.

The buffer is pre-filled with 0xCC (int3) so a stray jump into
untranslated space traps instead of executing garbage. It is mapped with an
address hint near the host service routines: translated code reaches them
with 32-bit pc-relative calls, so the mapping must land within ±2 GiB of
the routine addresses. Reachability is verified per call site during
emission; an unlucky mapping surfaces as a displacement error, not as
corrupt code.
*/

use crate::error::Error;

const PAGE: usize = 4096;

/// Hints tried, in order, relative to the anchor routine address.
const HINT_DELTAS: [i64; 4] = [-0x1000_0000, -0x4000_0000, 0x1000_0000, 0x4000_0000];

pub(crate) struct CodeBuf {
    ptr: *mut u8,
    len: usize,
}

impl CodeBuf {
    /// Map `len` bytes of RWX memory, preferring addresses near `anchor`.
    pub(crate) fn map_near(anchor: usize, len: usize) -> Result<CodeBuf, Error> {
        for delta in HINT_DELTAS {
            let hint = (anchor as i64).saturating_add(delta).max(PAGE as i64) as usize & !(PAGE - 1);
            if let Some(buf) = Self::map_at(hint as *mut libc::c_void, len) {
                let distance = (buf.ptr as i64).wrapping_sub(anchor as i64).unsigned_abs();
                if distance < 0x7000_0000 {
                    return Ok(buf);
                }
                // The kernel ignored the hint and placed us out of call
                // range; give the next hint a chance.
                drop(buf);
            }
        }
        // Last resort: let the kernel choose. Call emission still checks
        // every displacement.
        Self::map_at(std::ptr::null_mut(), len)
            .ok_or_else(|| Error::CodeBufferMap(std::io::Error::last_os_error().to_string()))
    }

    fn map_at(hint: *mut libc::c_void, len: usize) -> Option<CodeBuf> {
        let ptr = unsafe {
            libc::mmap(
                hint,
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return None;
        }
        let ptr = ptr as *mut u8;
        // Trap byte fill: jumps into untranslated space raise SIGTRAP.
        unsafe { std::ptr::write_bytes(ptr, 0xcc, len) };
        Some(CodeBuf { ptr, len })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Absolute host address of `offset`.
    #[inline]
    pub(crate) fn addr(&self, offset: usize) -> usize {
        debug_assert!(offset <= self.len);
        self.ptr as usize + offset
    }

    /// Copy `bytes` into the buffer; the caller has already bounds-checked
    /// against `len()`.
    pub(crate) fn write(&mut self, offset: usize, bytes: &[u8]) {
        assert!(offset + bytes.len() <= self.len);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len());
        }
    }

    /// Patch a 32-bit little-endian value (relocation or immediate).
    pub(crate) fn patch32(&mut self, offset: usize, value: i32) {
        self.write(offset, &value.to_le_bytes());
    }
}

impl Drop for CodeBuf {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}
