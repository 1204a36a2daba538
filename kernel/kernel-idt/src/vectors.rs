//! # CPU Exception Vectors
//!
//! Vectors 0–31 are architecturally reserved for CPU exceptions; 32–255 are
//! free for software and device use. Each defined exception carries a
//! *nature* that decides what a handler may legally do afterwards:
//!
//! - [`VectorNature::Fault`] — resumable; `iretq` re-executes the faulting
//!   instruction (page fault, division error, protection violations).
//! - [`VectorNature::Trap`] — resumable; execution continues at the *next*
//!   instruction (breakpoint, overflow).
//! - [`VectorNature::Abort`] — not resumable (double fault, machine check).
//!
//! Some vectors additionally push an error code, shifting every later field
//! of the interrupt frame by one machine word; entry stubs must normalize
//! this before sharing a common handler body.

/// Division error (#DE).
pub const DIVIDE_ERROR_VECTOR: usize = 0x00;
/// Debug exception (#DB).
pub const DEBUG_VECTOR: usize = 0x01;
/// Non-maskable interrupt.
pub const NMI_VECTOR: usize = 0x02;
/// Breakpoint (#BP) — the `int3` trap.
pub const BREAKPOINT_VECTOR: usize = 0x03;
/// Overflow (#OF) — the `into` trap.
pub const OVERFLOW_VECTOR: usize = 0x04;
/// BOUND range exceeded (#BR).
pub const BOUND_RANGE_VECTOR: usize = 0x05;
/// Invalid opcode (#UD).
pub const INVALID_OPCODE_VECTOR: usize = 0x06;
/// Device not available (#NM).
pub const DEVICE_NOT_AVAILABLE_VECTOR: usize = 0x07;
/// Double fault (#DF). Abort; error code always zero.
pub const DOUBLE_FAULT_VECTOR: usize = 0x08;
/// Invalid TSS (#TS).
pub const INVALID_TSS_VECTOR: usize = 0x0A;
/// Segment not present (#NP).
pub const SEGMENT_NOT_PRESENT_VECTOR: usize = 0x0B;
/// Stack-segment fault (#SS).
pub const STACK_SEGMENT_FAULT_VECTOR: usize = 0x0C;
/// General protection fault (#GP).
pub const GENERAL_PROTECTION_VECTOR: usize = 0x0D;
/// Page fault (#PF); faulting address in CR2.
pub const PAGE_FAULT_VECTOR: usize = 0x0E;
/// x87 floating-point error (#MF).
pub const X87_FP_VECTOR: usize = 0x10;
/// Alignment check (#AC).
pub const ALIGNMENT_CHECK_VECTOR: usize = 0x11;
/// Machine check (#MC). Abort.
pub const MACHINE_CHECK_VECTOR: usize = 0x12;
/// SIMD floating-point exception (#XM).
pub const SIMD_FP_VECTOR: usize = 0x13;
/// Virtualization exception (#VE).
pub const VIRTUALIZATION_VECTOR: usize = 0x14;
/// Control protection exception (#CP).
pub const CONTROL_PROTECTION_VECTOR: usize = 0x15;

/// How a vector relates to the interrupted instruction stream.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VectorNature {
    /// Resumable; return re-executes the faulting instruction.
    Fault,
    /// Resumable; return continues at the next instruction.
    Trap,
    /// Not resumable; the machine state is unreliable.
    Abort,
}

/// The nature of a CPU-defined vector, `None` for reserved or
/// software-assigned slots.
#[must_use]
pub const fn nature(vector: usize) -> Option<VectorNature> {
    Some(match vector {
        0x01 => VectorNature::Fault, // #DB is fault or trap; treated as fault
        0x03 | 0x04 => VectorNature::Trap,
        0x08 | 0x12 => VectorNature::Abort,
        0x00 | 0x02 | 0x05..=0x07 | 0x0A..=0x0E | 0x10 | 0x11 | 0x13..=0x15 => VectorNature::Fault,
        _ => return None,
    })
}

/// True when the CPU pushes an error code for `vector`, displacing the rest
/// of the interrupt frame by one word.
#[must_use]
pub const fn pushes_error_code(vector: usize) -> bool {
    matches!(vector, 0x08 | 0x0A..=0x0E | 0x11 | 0x15)
}

/// Short mnemonic for diagnostics.
#[must_use]
pub const fn mnemonic(vector: usize) -> &'static str {
    match vector {
        0x00 => "#DE divide error",
        0x01 => "#DB debug",
        0x02 => "NMI",
        0x03 => "#BP breakpoint",
        0x04 => "#OF overflow",
        0x05 => "#BR bound range",
        0x06 => "#UD invalid opcode",
        0x07 => "#NM device not available",
        0x08 => "#DF double fault",
        0x0A => "#TS invalid TSS",
        0x0B => "#NP segment not present",
        0x0C => "#SS stack-segment fault",
        0x0D => "#GP general protection",
        0x0E => "#PF page fault",
        0x10 => "#MF x87 floating point",
        0x11 => "#AC alignment check",
        0x12 => "#MC machine check",
        0x13 => "#XM SIMD floating point",
        0x14 => "#VE virtualization",
        0x15 => "#CP control protection",
        _ => "unknown vector",
    }
}

/// CPU-defined exception vectors a kernel installs handlers for, in
/// ascending order, skipping the reserved slots (9, 15, 22–31).
pub const CPU_EXCEPTION_VECTORS: [usize; 20] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x10,
    0x11, 0x12, 0x13, 0x14, 0x15,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natures_match_the_manual() {
        assert_eq!(nature(PAGE_FAULT_VECTOR), Some(VectorNature::Fault));
        assert_eq!(nature(GENERAL_PROTECTION_VECTOR), Some(VectorNature::Fault));
        assert_eq!(nature(BREAKPOINT_VECTOR), Some(VectorNature::Trap));
        assert_eq!(nature(OVERFLOW_VECTOR), Some(VectorNature::Trap));
        assert_eq!(nature(DOUBLE_FAULT_VECTOR), Some(VectorNature::Abort));
        assert_eq!(nature(MACHINE_CHECK_VECTOR), Some(VectorNature::Abort));
        // Reserved slot.
        assert_eq!(nature(0x09), None);
    }

    #[test]
    fn error_code_set_matches_the_manual() {
        for v in [0x08, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x11, 0x15] {
            assert!(pushes_error_code(v), "vector {v:#x} pushes an error code");
        }
        for v in [0x00, 0x03, 0x06, 0x10, 0x12, 0x13] {
            assert!(!pushes_error_code(v), "vector {v:#x} has no error code");
        }
    }

    #[test]
    fn exception_bank_skips_reserved_vectors() {
        assert!(!CPU_EXCEPTION_VECTORS.contains(&0x09));
        assert!(!CPU_EXCEPTION_VECTORS.contains(&0x0F));
        for v in CPU_EXCEPTION_VECTORS {
            assert!(nature(v).is_some(), "vector {v:#x} must be classified");
        }
    }
}
