// src/sema/target.rs
//! Target ABI description.
//!
//! The analysis core needs only a handful of target facts: pointer width,
//! the C `int` width (extern enum tags), and whether error-return tracing
//! is compiled in (it adds fields to async frames).

/// Target facts consulted during layout and frame synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Pointer size in bytes.
    pub ptr_bytes: u64,
    /// Width of C `int` in bits, used for extern enum tag types.
    pub c_int_bits: u32,
    /// Whether error-return tracing is enabled for this build.
    pub err_ret_tracing: bool,
}

impl Target {
    /// A 64-bit target with 32-bit C int and tracing off.
    pub fn x86_64() -> Self {
        Self {
            ptr_bytes: 8,
            c_int_bits: 32,
            err_ret_tracing: false,
        }
    }

    pub fn ptr_bits(&self) -> u64 {
        self.ptr_bytes * 8
    }

    /// ABI alignment of a pointer-sized value.
    pub fn ptr_align(&self) -> u32 {
        self.ptr_bytes as u32
    }

    /// Largest integer alignment the target guarantees.
    pub fn max_int_align(&self) -> u32 {
        16
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::x86_64()
    }
}
