//! Executable memory
//!
//! Each compiled function gets its own anonymous mapping. The code is copied
//! in while the pages are read-write, then the mapping is switched to
//! read-execute before anyone can call it, so no page is ever writable and
//! executable at the same time.

use std::io;

/// A read-execute mapping holding one compiled function.
pub struct ExecutableMemory {
    ptr: *mut u8,
    /// Mapping length (whole pages).
    len: usize,
    /// Bytes of code at the start of the mapping.
    code_len: usize,
}

// SAFETY: the mapping is immutable once constructed and freed only on drop.
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

impl ExecutableMemory {
    /// Map `code` as executable.
    pub fn new(code: &[u8]) -> io::Result<Self> {
        if code.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "refusing to map empty code",
            ));
        }
        let len = round_to_pages(code.len())?;
        let ptr = map_writable(len)?;

        // SAFETY: `ptr` is a fresh writable mapping of `len >= code.len()` bytes.
        unsafe { std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len()) };

        let memory = ExecutableMemory {
            ptr,
            len,
            code_len: code.len(),
        };
        // On failure `memory` is dropped and the mapping released.
        protect_executable(memory.ptr, memory.len)?;
        Ok(memory)
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn code_len(&self) -> usize {
        self.code_len
    }

    /// Size of the mapping in bytes.
    pub fn mapped_len(&self) -> usize {
        self.len
    }

    /// The mapped machine code.
    pub fn code(&self) -> &[u8] {
        // SAFETY: the first `code_len` bytes were initialized in `new` and the
        // mapping stays readable for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.code_len) }
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unmap(self.ptr, self.len);
    }
}

impl std::fmt::Debug for ExecutableMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableMemory")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("code_len", &self.code_len)
            .finish()
    }
}

fn round_to_pages(bytes: usize) -> io::Result<usize> {
    let page = page_size();
    bytes
        .checked_next_multiple_of(page)
        .ok_or_else(|| io::Error::new(io::ErrorKind::OutOfMemory, "code size overflow"))
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

#[cfg(unix)]
fn map_writable(len: usize) -> io::Result<*mut u8> {
    // SAFETY: anonymous private mapping; no existing memory is affected.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr as *mut u8)
}

#[cfg(unix)]
fn protect_executable(ptr: *mut u8, len: usize) -> io::Result<()> {
    // SAFETY: `ptr..ptr+len` is a mapping we own.
    let rc = unsafe { libc::mprotect(ptr as *mut libc::c_void, len, libc::PROT_READ | libc::PROT_EXEC) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(unix)]
fn unmap(ptr: *mut u8, len: usize) {
    // SAFETY: `ptr..ptr+len` is a mapping we own and nobody references it
    // any more.
    let rc = unsafe { libc::munmap(ptr as *mut libc::c_void, len) };
    if rc != 0 {
        tracing::warn!(
            "munmap of {} bytes failed: {}",
            len,
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    4096
}

#[cfg(not(unix))]
fn map_writable(_len: usize) -> io::Result<*mut u8> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "executable memory is not implemented for this platform",
    ))
}

#[cfg(not(unix))]
fn protect_executable(_ptr: *mut u8, _len: usize) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unmap(_ptr: *mut u8, _len: usize) {}
