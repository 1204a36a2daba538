//! # Kernel Configuration and Boot Interface
//!
//! The authoritative source for the fixed virtual-memory layout and for the
//! `#[repr(C)]` hand-off structures the bootstrap stage passes to the kernel.
//! Everything the kernel consumes from firmware flows through
//! [`boot::KernelBootInfo`]; everything position-dependent in the address
//! space is a constant in [`memory`].

#![cfg_attr(not(test), no_std)]

pub mod boot;
pub mod memory;
