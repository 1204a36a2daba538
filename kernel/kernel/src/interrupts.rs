//! # Exception Handler Bank
//!
//! Entry stubs and the report-and-halt policy for the CPU-defined exception
//! vectors. The stubs obey the special calling discipline interrupt entry
//! imposes: no conventional prologue, because vectors that signal an error
//! code push an extra machine word that shifts every later frame field. Each
//! no-error-code stub pushes a zero placeholder so both classes converge on
//! one stack layout before the common path runs.
//!
//! The policy itself — record the vector identity, the error code, the
//! faulting address where applicable, then halt — lives in exactly one
//! function, [`exception_report`]. A deployment with a process model would
//! replace that single body with "terminate the offending task"; nothing
//! else changes.

use crate::halt;
use kernel_debugcon::debugcon_trace;
use kernel_gdt::KERNEL_CS;
use kernel_idt::vectors::{
    self, BREAKPOINT_VECTOR, DOUBLE_FAULT_VECTOR, PAGE_FAULT_VECTOR, VectorNature,
};
use kernel_idt::Idt;
use kernel_sync::SyncOnceCell;

/// The global interrupt descriptor table.
static IDT: SyncOnceCell<Idt> = SyncOnceCell::new();

/// Build the full fixed handler set: every defined CPU exception vector
/// (0–21, skipping reserved slots), supervisor-gated except the breakpoint
/// test vector, which user code must be able to raise explicitly.
#[cfg(target_arch = "x86_64")]
fn build_idt() -> Idt {
    let mut idt = Idt::new();

    macro_rules! gate {
        ($vector:expr, $stub:ident) => {
            idt.install($vector, stubs::$stub, KERNEL_CS, 0);
        };
    }

    gate!(vectors::DIVIDE_ERROR_VECTOR, vec00);
    gate!(vectors::DEBUG_VECTOR, vec01);
    gate!(vectors::NMI_VECTOR, vec02);
    gate!(vectors::OVERFLOW_VECTOR, vec04);
    gate!(vectors::BOUND_RANGE_VECTOR, vec05);
    gate!(vectors::INVALID_OPCODE_VECTOR, vec06);
    gate!(vectors::DEVICE_NOT_AVAILABLE_VECTOR, vec07);
    gate!(vectors::INVALID_TSS_VECTOR, vec0a);
    gate!(vectors::SEGMENT_NOT_PRESENT_VECTOR, vec0b);
    gate!(vectors::STACK_SEGMENT_FAULT_VECTOR, vec0c);
    gate!(vectors::GENERAL_PROTECTION_VECTOR, vec0d);
    gate!(vectors::PAGE_FAULT_VECTOR, vec0e);
    gate!(vectors::X87_FP_VECTOR, vec10);
    gate!(vectors::ALIGNMENT_CHECK_VECTOR, vec11);
    gate!(vectors::MACHINE_CHECK_VECTOR, vec12);
    gate!(vectors::SIMD_FP_VECTOR, vec13);
    gate!(vectors::VIRTUALIZATION_VECTOR, vec14);
    gate!(vectors::CONTROL_PROTECTION_VECTOR, vec15);

    // The abort-class double fault runs on the dedicated IST1 stack: its
    // trigger may be exactly "the main stack is unusable".
    idt[DOUBLE_FAULT_VECTOR]
        .set_handler(stubs::vec08)
        .selector(KERNEL_CS)
        .present(true)
        .gate_interrupt()
        .ist(1);

    // The user-invocable test vector: privilege floor 3, so an explicit
    // `int3` from CPL=3 enters instead of faulting.
    idt[BREAKPOINT_VECTOR]
        .set_handler(stubs::vec03)
        .selector(KERNEL_CS)
        .present(true)
        .user_callable()
        .gate_interrupt();

    idt
}

/// Install the exception bank and load the table into the processor.
///
/// Call exactly once during boot, before interrupts are enabled; the
/// set-once cell turns a second call into a reported bug.
#[cfg(target_arch = "x86_64")]
pub fn init() {
    IDT.set(build_idt())
        .unwrap_or_else(|_| panic!("IDT initialized twice"));
    let idt = IDT.expect("IDT just set");
    unsafe {
        idt.load();
    }
    log::info!("exception vectors installed");
}

/// The single policy body behind every installed vector: record diagnostic
/// context and halt.
///
/// Faults and traps are architecturally resumable, but this kernel has no
/// process model to kill-and-continue — rendering them fatal is a choice,
/// and this function is the seam where a real deployment would substitute
/// task termination.
#[unsafe(no_mangle)]
extern "C" fn exception_report(vector: u64, error_code: u64, cr2: u64, rip: u64) -> ! {
    let vector = vector as usize;
    let nature = match vectors::nature(vector) {
        Some(VectorNature::Fault) => "fault",
        Some(VectorNature::Trap) => "trap",
        Some(VectorNature::Abort) => "abort",
        None => "unclassified",
    };

    debugcon_trace!(
        "EXCEPTION {} ({nature}) at rip={rip:#018x}\n",
        vectors::mnemonic(vector)
    );
    if vectors::pushes_error_code(vector) {
        debugcon_trace!("  error code {error_code:#x}\n");
    }
    if vector == PAGE_FAULT_VECTOR {
        debugcon_trace!("  faulting address (cr2) {cr2:#018x}\n");
    }

    halt()
}

/// Naked entry stubs, one per vector.
///
/// Layout after the two pushes (error-code vectors get theirs from the CPU,
/// the rest push a zero placeholder):
///
/// ```text
/// [rsp]      vector number
/// [rsp + 8]  error code (or 0)
/// [rsp + 16] RIP ─┐
/// [rsp + 24] CS   │ hardware trap frame
/// ...             ┘
/// ```
#[cfg(target_arch = "x86_64")]
mod stubs {
    macro_rules! exception_stub {
        // The CPU pushed an error code for this vector.
        ($name:ident, $vector:expr, error_code) => {
            #[unsafe(naked)]
            pub extern "C" fn $name() {
                core::arch::naked_asm!(
                    "cli",
                    "push {vector}",
                    "jmp {common}",
                    vector = const $vector,
                    common = sym super::exception_common,
                );
            }
        };
        // No error code: push a placeholder to normalize the layout.
        ($name:ident, $vector:expr) => {
            #[unsafe(naked)]
            pub extern "C" fn $name() {
                core::arch::naked_asm!(
                    "cli",
                    "push 0",
                    "push {vector}",
                    "jmp {common}",
                    vector = const $vector,
                    common = sym super::exception_common,
                );
            }
        };
    }

    exception_stub!(vec00, 0x00);
    exception_stub!(vec01, 0x01);
    exception_stub!(vec02, 0x02);
    exception_stub!(vec03, 0x03);
    exception_stub!(vec04, 0x04);
    exception_stub!(vec05, 0x05);
    exception_stub!(vec06, 0x06);
    exception_stub!(vec07, 0x07);
    exception_stub!(vec08, 0x08, error_code);
    exception_stub!(vec0a, 0x0a, error_code);
    exception_stub!(vec0b, 0x0b, error_code);
    exception_stub!(vec0c, 0x0c, error_code);
    exception_stub!(vec0d, 0x0d, error_code);
    exception_stub!(vec0e, 0x0e, error_code);
    exception_stub!(vec10, 0x10);
    exception_stub!(vec11, 0x11, error_code);
    exception_stub!(vec12, 0x12);
    exception_stub!(vec13, 0x13);
    exception_stub!(vec14, 0x14);
    exception_stub!(vec15, 0x15, error_code);
}

/// Common tail of every stub: collect (vector, error code, CR2, RIP) and
/// call the policy body. Never returns, so no state is preserved.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
extern "C" fn exception_common() {
    core::arch::naked_asm!(
        "mov rdi, [rsp]",        // vector
        "mov rsi, [rsp + 8]",    // error code (or the placeholder)
        "mov rdx, cr2",          // faulting address, meaningful for #PF
        "mov rcx, [rsp + 16]",   // interrupted RIP from the hardware frame
        "and rsp, -16",          // SysV alignment for the call below
        "call {report}",
        // exception_report never returns; trap if it somehow does.
        "ud2",
        report = sym exception_report,
    );
}
