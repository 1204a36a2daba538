//! # Interrupt Descriptor Table (IDT)
//!
//! The IDT routes every interrupt, CPU exception and software trap to a
//! handler: 256 gate descriptors of 16 bytes each, located through the IDTR
//! (loaded via `lidt`). This crate owns the table representation and the
//! vector metadata; the handler bodies live with the kernel binary.
//!
//! ```ignore
//! // Install a gate userland may raise explicitly (privilege floor 3):
//! idt[BREAKPOINT_VECTOR]
//!     .set_handler(bp_entry)
//!     .selector(KERNEL_CS)     // run the handler on the kernel code segment
//!     .dpl(3)                  // allow ring-3 `int 3`
//!     .present(true)
//!     .gate_interrupt();       // mask IF on entry
//!
//! // Finally, load the IDT (must be done at CPL0):
//! unsafe { idt.load(); }
//! ```
//!
//! ## Acronyms
//! - **IDT** – *Interrupt Descriptor Table* (256 gates)
//! - **ISR** – *Interrupt Service Routine* (the handler)
//! - **DPL** – *Descriptor Privilege Level* (0=kernel … 3=user)
//! - **IST** – *Interrupt Stack Table* (per-gate alternate stack from the TSS)
//!
//! ## Privilege gating
//!
//! A gate's DPL is the **privilege floor for software invocation only**: an
//! explicit `int n` from CPL > DPL raises #GP instead of entering the
//! handler. Hardware-raised exceptions and external interrupts deliver
//! regardless of the DPL. [`Idt::check_software_invoke`] models exactly this
//! rule so the gating is testable off-target.
//!
//! ## Safety considerations
//! - Calling [`Idt::load`] requires CPL0, valid handler pointers, and a TSS
//!   whose `rsp0` points at a kernel stack for privilege transitions.
//! - Entries are only marked `.present(true)` once handler and selector are
//!   in place.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod vectors;

use bitfield_struct::bitfield;
use core::mem::size_of;
use core::ops::{Index, IndexMut};

// An IDT entry must be 16 bytes; the table is 16-byte aligned for the
// conventional IDTR limit calculation.
const _: () = assert!(size_of::<IdtEntry>() == 16);
const _: () = assert!(align_of::<Idt>() == 16);
const _: () = assert!(size_of::<Idt>() == 256 * 16);

/// Two bytes of an IDT entry that pack:
///
/// - **low byte**: `IST` (3 bits) + 5 reserved zero bits
/// - **high byte**: `| P | DPL(2) | S(0) | Type(4) |`
#[bitfield(u16)]
pub struct IdtGateAttr {
    /// **IST** – Interrupt Stack Table index (0 disables IST switching).
    ///
    /// Requires a properly initialized TSS with the indexed stack pointer.
    #[bits(3)]
    pub ist: u8,

    /// Must be zero (hardware-reserved).
    #[bits(5)]
    __zero0: u8,

    /// **Type** – 0xE = *Interrupt gate*, 0xF = *Trap gate*.
    #[bits(4)]
    pub typ: u8,

    /// **S** – System bit (must be `0` for interrupt/trap gates).
    #[bits(1)]
    pub s: bool,

    /// **DPL** – privilege floor for software invocation (0..=3).
    #[bits(2)]
    pub dpl: u8,

    /// **P** – Present bit. Must be `1` for a valid entry.
    #[bits(1)]
    pub present: bool,
}

impl IdtGateAttr {
    /// Convenience constructor for an **Interrupt Gate** (type 0xE, S=0).
    #[inline]
    #[must_use]
    pub const fn interrupt_gate() -> Self {
        Self::new().with_typ(0xE).with_s(false)
    }

    /// Convenience constructor for a **Trap Gate** (type 0xF, S=0).
    #[inline]
    #[must_use]
    pub const fn trap_gate() -> Self {
        Self::new().with_typ(0xF).with_s(false)
    }
}

/// Gate kinds supported by this IDT.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum GateType {
    /// Masks further maskable interrupts upon entry (clears `IF`).
    InterruptGate,
    /// Leaves `IF` unchanged; useful for debugging/tracing faults.
    TrapGate,
}

/// Rejection reasons from [`Idt::check_software_invoke`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SoftwareInvokeError {
    /// The slot holds no present gate; hardware raises #GP with the vector's
    /// selector error code.
    NotPresent,
    /// CPL exceeds the gate's privilege floor; hardware raises #GP.
    GeneralProtection,
}

/// A 256-entry **Interrupt Descriptor Table**.
///
/// Use [`Idt::new`] to create a cleared table (all gates non-present),
/// mutate entries via indexing, and finally load it with [`Idt::load`].
#[repr(C, align(16))]
pub struct Idt {
    entries: [IdtEntry; 256],
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Idt {
    /// Create a new, empty IDT with all gates marked **not present**.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::MISSING; 256],
        }
    }

    /// Write one gate: handler, handler code segment, and software-invoke
    /// privilege floor. The gate is an interrupt gate (IF masked on entry)
    /// and marked present.
    pub fn install(&mut self, vector: usize, handler: extern "C" fn(), selector: u16, floor: u8) {
        self[vector]
            .set_handler(handler)
            .selector(selector)
            .dpl(floor)
            .present(true)
            .gate_interrupt();
    }

    /// Model the CPU's software-invocation check for `int vector` executed at
    /// `cpl`: the gate must be present and `cpl ≤ DPL`. Hardware-raised
    /// events skip this check entirely.
    ///
    /// # Errors
    /// - [`SoftwareInvokeError::NotPresent`] for an empty slot.
    /// - [`SoftwareInvokeError::GeneralProtection`] when the floor rejects
    ///   the caller.
    pub fn check_software_invoke(&self, vector: usize, cpl: u8) -> Result<(), SoftwareInvokeError> {
        let attr = IdtGateAttr::from_bits(self.entries[vector].ist_type);
        if !attr.present() {
            return Err(SoftwareInvokeError::NotPresent);
        }
        if cpl > attr.dpl() {
            return Err(SoftwareInvokeError::GeneralProtection);
        }
        Ok(())
    }

    /// The 64-bit handler offset stored in `vector`'s gate.
    #[must_use]
    pub const fn handler_address(&self, vector: usize) -> u64 {
        let e = &self.entries[vector];
        (e.offset_hi as u64) << 32 | (e.offset_mid as u64) << 16 | e.offset_lo as u64
    }

    /// Load this IDT into the CPU's **IDTR** using `lidt`.
    ///
    /// # Safety
    /// - Must be called at **CPL0**.
    /// - All present entries must reference valid handler code.
    /// - Any gate callable from user mode requires a TSS with a valid `rsp0`.
    #[cfg(target_arch = "x86_64")]
    #[inline]
    pub unsafe fn load(&'static self) {
        let idtr = Idtr {
            limit: (size_of::<Self>() - 1) as u16,
            base: core::ptr::from_ref(self) as u64,
        };
        unsafe {
            core::arch::asm!(
                "lidt [{}]",
                in(reg) &raw const idtr,
                options(nostack, preserves_flags, readonly)
            );
        }
    }
}

impl Index<usize> for Idt {
    type Output = IdtEntry;
    fn index(&self, i: usize) -> &Self::Output {
        &self.entries[i]
    }
}

impl IndexMut<usize> for Idt {
    fn index_mut(&mut self, i: usize) -> &mut Self::Output {
        &mut self.entries[i]
    }
}

/// Operand format used by `lidt` (limit + base).
#[repr(C, packed)]
#[allow(dead_code)]
struct Idtr {
    limit: u16,
    base: u64,
}

/// One **16-byte** x86-64 IDT gate descriptor.
///
/// **Key fields**
/// - `selector`: code segment selector for the handler (the kernel CS)
/// - `dpl`: privilege floor for software invocation
/// - `present`: must be `true` for the CPU to accept the gate
/// - `type`: 0xE (*Interrupt*) or 0xF (*Trap*)
#[repr(C)]
#[derive(Copy, Clone)]
pub struct IdtEntry {
    offset_lo: u16,
    selector: u16,
    /// Two bytes packed via [`IdtGateAttr`] (IST + type/attrs).
    ist_type: u16,
    offset_mid: u16,
    offset_hi: u32,
    zero: u32,
}

impl IdtEntry {
    /// A zeroed, non-present entry.
    pub const MISSING: Self = Self {
        offset_lo: 0,
        selector: 0,
        ist_type: IdtGateAttr::new().into_bits(),
        offset_mid: 0,
        offset_hi: 0,
        zero: 0,
    };

    /// Initialize this entry with a handler and return a fluent builder.
    ///
    /// The entry is **not** marked present by default; call
    /// [`IdtEntryBuilder::present`] once selector and attributes are set.
    pub fn set_handler(&mut self, handler: extern "C" fn()) -> IdtEntryBuilder<'_> {
        let addr = handler as u64;
        self.offset_lo = (addr & 0xFFFF) as u16;
        self.offset_mid = ((addr >> 16) & 0xFFFF) as u16;
        self.offset_hi = (addr >> 32) as u32;

        // default: present=0, DPL=0, interrupt gate, IST=0
        self.ist_type = IdtGateAttr::interrupt_gate()
            .with_present(false)
            .with_dpl(0)
            .with_ist(0)
            .into_bits();

        IdtEntryBuilder { entry: self }
    }
}

/// Fluent builder for an [`IdtEntry`].
pub struct IdtEntryBuilder<'a> {
    entry: &'a mut IdtEntry,
}

impl IdtEntryBuilder<'_> {
    /// Set the **Present** bit. Must be `true` for a usable gate.
    #[inline]
    pub const fn present(self, p: bool) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.ist_type).with_present(p);
        self.entry.ist_type = bf.into_bits();
        self
    }

    /// Set **DPL**, the privilege floor for software invocation, 0..=3.
    #[inline]
    pub fn dpl(self, dpl: u8) -> Self {
        debug_assert!(dpl <= 3);
        let bf = IdtGateAttr::from_bits(self.entry.ist_type).with_dpl(dpl);
        self.entry.ist_type = bf.into_bits();
        self
    }

    /// Lower the floor to 3 so user code may raise this vector explicitly.
    #[inline]
    pub fn user_callable(self) -> Self {
        self.dpl(3)
    }

    /// Make this an **Interrupt Gate** (type 0xE, `S=0`).
    #[inline]
    pub const fn gate_interrupt(self) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.ist_type)
            .with_typ(0xE)
            .with_s(false);
        self.entry.ist_type = bf.into_bits();
        self
    }

    /// Make this a **Trap Gate** (type 0xF, `S=0`).
    #[inline]
    pub const fn gate_trap(self) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.ist_type)
            .with_typ(0xF)
            .with_s(false);
        self.entry.ist_type = bf.into_bits();
        self
    }

    /// Choose the gate type via an enum.
    #[inline]
    pub const fn gate_type(self, gate_type: GateType) -> Self {
        match gate_type {
            GateType::InterruptGate => self.gate_interrupt(),
            GateType::TrapGate => self.gate_trap(),
        }
    }

    /// Set the **IST** index (0 disables IST switching).
    #[inline]
    pub fn ist(self, idx: u8) -> Self {
        debug_assert!(idx <= 7);
        let bf = IdtGateAttr::from_bits(self.entry.ist_type).with_ist(idx);
        self.entry.ist_type = bf.into_bits();
        self
    }

    /// Set the code segment **selector** the handler runs on.
    #[inline]
    pub const fn selector(self, sel: u16) -> Self {
        self.entry.selector = sel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn nop_handler() {}

    #[test]
    fn builder_encodes_gate_attributes() {
        let mut idt = Idt::new();
        idt[0x80]
            .set_handler(nop_handler)
            .selector(0x08)
            .dpl(3)
            .present(true)
            .gate_interrupt();

        let attr = IdtGateAttr::from_bits(idt[0x80].ist_type);
        assert!(attr.present());
        assert_eq!(attr.dpl(), 3);
        assert_eq!(attr.typ(), 0xE);
        assert!(!attr.s());
        assert_eq!(idt[0x80].selector, 0x08);
        assert_eq!(idt.handler_address(0x80), nop_handler as u64);
    }

    #[test]
    fn install_writes_a_present_interrupt_gate() {
        let mut idt = Idt::new();
        idt.install(14, nop_handler, 0x08, 0);
        let attr = IdtGateAttr::from_bits(idt[14].ist_type);
        assert!(attr.present());
        assert_eq!(attr.dpl(), 0);
        assert_eq!(attr.typ(), 0xE);
    }

    #[test]
    fn software_invoke_respects_the_privilege_floor() {
        let mut idt = Idt::new();
        idt.install(0x80, nop_handler, 0x08, 3);
        idt.install(0x81, nop_handler, 0x08, 0);

        // Floor 3: CPL=3 succeeds.
        assert_eq!(idt.check_software_invoke(0x80, 3), Ok(()));
        // Floor 0: CPL=3 is a protection fault.
        assert_eq!(
            idt.check_software_invoke(0x81, 3),
            Err(SoftwareInvokeError::GeneralProtection)
        );
        // Kernel code passes either gate.
        assert_eq!(idt.check_software_invoke(0x81, 0), Ok(()));
        // Empty slots reject everyone.
        assert_eq!(
            idt.check_software_invoke(0x90, 0),
            Err(SoftwareInvokeError::NotPresent)
        );
    }

    #[test]
    fn ist_index_is_stored() {
        let mut idt = Idt::new();
        idt[8]
            .set_handler(nop_handler)
            .selector(0x08)
            .present(true)
            .gate_interrupt()
            .ist(1);
        assert_eq!(IdtGateAttr::from_bits(idt[8].ist_type).ist(), 1);
    }
}
