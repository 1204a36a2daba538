//! # System-Call Contract
//!
//! The argument and dispatch contract of the service-call surface. The entry
//! stub (kernel binary) assembles the call number and up to five register
//! arguments into one contiguous [`SyscallArgs`] record on the kernel stack,
//! then hands it to [`dispatch`].
//!
//! ## Register convention
//!
//! | Register | Role |
//! |---|---|
//! | `RAX` | call number in, return value / error code out |
//! | `RDI`, `RSI`, `RDX`, `R10`, `R8` | arguments 0–4 |
//!
//! `RCX` and `R11` are unavailable: the `syscall` instruction overwrites
//! them with the resume RIP and RFLAGS.
//!
//! ## Baseline surface
//!
//! | # | Call | Arguments |
//! |---|---|---|
//! | 1 | [`Sysno::Exit`] | status |
//! | 2 | [`Sysno::EmitBuffer`] | length, pointer |
//!
//! ## Failure semantics
//!
//! Argument validation failures come back as typed error codes in the
//! return-value register — never as a new fault. Pointer arguments get a
//! **bound check only** against the user address limit: a pointer that
//! passes the bound but targets an unmapped page is deliberately left to
//! fault through the ordinary page-fault path, trading a cheap check for a
//! best-effort safety net.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

/// Call numbers of the baseline surface.
#[repr(u64)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Sysno {
    /// Terminate the task with a status code and halt the machine — there is
    /// no process table, nothing more sophisticated remains to clean up.
    Exit = 1,
    /// Emit a `(length, pointer)` buffer to the diagnostic sink.
    EmitBuffer = 2,
}

/// The contiguous in-memory record the entry stub assembles before dispatch.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct SyscallArgs {
    /// Call number (from `RAX`).
    pub sysno: u64,
    /// Arguments 0–4 (from `RDI`, `RSI`, `RDX`, `R10`, `R8`).
    pub args: [u64; 5],
}

const _: () = assert!(core::mem::size_of::<SyscallArgs>() == 48);

/// Typed argument errors, encoded into the return-value register.
#[derive(Copy, Clone, Eq, PartialEq, Debug, thiserror::Error)]
pub enum SyscallError {
    /// Call number out of range or unregistered.
    #[error("invalid system call number")]
    InvalidSyscall,
    /// A pointer/length argument failed the user-range bound check.
    #[error("argument outside the user address range")]
    InvalidArg,
}

impl SyscallError {
    /// The value placed in the return register. Error codes occupy the top
    /// of the `u64` range so they cannot collide with byte counts.
    #[must_use]
    pub const fn into_return(self) -> u64 {
        match self {
            Self::InvalidSyscall => u64::MAX,
            Self::InvalidArg => u64::MAX - 1,
        }
    }
}

/// What the entry stub must do after a dispatched call.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SyscallDisposition {
    /// Resume the caller with this value in the return register.
    Return(u64),
    /// Stop executing: the task exited with this status.
    Exit(u64),
}

/// Destination of [`Sysno::EmitBuffer`] payloads.
pub trait ByteSink {
    fn write(&mut self, bytes: &[u8]);
}

/// Bound-check a user-supplied `(pointer, length)` range against the
/// exclusive user address limit.
///
/// This is a **bound check only** — no presence check. See the module
/// documentation for why.
///
/// # Errors
/// [`SyscallError::InvalidArg`] when the range overflows or reaches past
/// `user_limit`.
pub const fn validate_user_range(ptr: u64, len: u64, user_limit: u64) -> Result<(), SyscallError> {
    let Some(end) = ptr.checked_add(len) else {
        return Err(SyscallError::InvalidArg);
    };
    if ptr >= user_limit || end > user_limit {
        return Err(SyscallError::InvalidArg);
    }
    Ok(())
}

/// Look up and execute one call.
///
/// `user_limit` is the exclusive upper bound of the user address range;
/// every pointer argument is validated against it before any dereference.
pub fn dispatch<S: ByteSink>(
    args: &SyscallArgs,
    user_limit: u64,
    sink: &mut S,
) -> SyscallDisposition {
    match args.sysno {
        x if x == Sysno::Exit as u64 => SyscallDisposition::Exit(args.args[0]),

        x if x == Sysno::EmitBuffer as u64 => {
            let len = args.args[0];
            let ptr = args.args[1];

            if let Err(e) = validate_user_range(ptr, len, user_limit) {
                return SyscallDisposition::Return(e.into_return());
            }

            // The range passed the bound check; an unmapped page inside it
            // faults through the page-fault path, not here.
            let bytes = unsafe {
                core::slice::from_raw_parts(ptr as *const u8, usize::try_from(len).unwrap_or(0))
            };
            sink.write(bytes);
            SyscallDisposition::Return(len)
        }

        _ => SyscallDisposition::Return(SyscallError::InvalidSyscall.into_return()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    struct VecSink(Vec<u8>);

    impl ByteSink for VecSink {
        fn write(&mut self, bytes: &[u8]) {
            self.0.extend_from_slice(bytes);
        }
    }

    fn args(sysno: u64, a0: u64, a1: u64) -> SyscallArgs {
        SyscallArgs {
            sysno,
            args: [a0, a1, 0, 0, 0],
        }
    }

    #[test]
    fn record_is_contiguous_number_then_arguments() {
        assert_eq!(offset_of!(SyscallArgs, sysno), 0);
        assert_eq!(offset_of!(SyscallArgs, args), 8);
    }

    #[test]
    fn out_of_range_call_number_is_invalid_syscall() {
        let mut sink = VecSink(Vec::new());
        assert_eq!(
            dispatch(&args(999, 0, 0), u64::MAX, &mut sink),
            SyscallDisposition::Return(SyscallError::InvalidSyscall.into_return())
        );
        assert_eq!(
            dispatch(&args(0, 0, 0), u64::MAX, &mut sink),
            SyscallDisposition::Return(SyscallError::InvalidSyscall.into_return())
        );
        assert!(sink.0.is_empty());
    }

    #[test]
    fn emit_rejects_out_of_bound_pointer_without_dereferencing() {
        let mut sink = VecSink(Vec::new());
        // Pick a limit below the pointer; the pointer is dangling on purpose —
        // the call must fail on the bound check alone.
        let user_limit = 0x8000_0000_0000;
        let bad_ptr = user_limit + 1;

        assert_eq!(
            dispatch(&args(2, 16, bad_ptr), user_limit, &mut sink),
            SyscallDisposition::Return(SyscallError::InvalidArg.into_return())
        );
        assert!(sink.0.is_empty());
    }

    #[test]
    fn emit_rejects_length_overflow() {
        assert_eq!(
            validate_user_range(0x1000, u64::MAX, 0x8000_0000_0000),
            Err(SyscallError::InvalidArg)
        );
        // A range ending exactly at the limit is fine.
        assert_eq!(validate_user_range(0x1000, 0x1000, 0x2000), Ok(()));
        // One past is not.
        assert_eq!(
            validate_user_range(0x1000, 0x1001, 0x2000),
            Err(SyscallError::InvalidArg)
        );
    }

    #[test]
    fn emit_reproduces_exact_bytes_at_the_sink() {
        let payload = *b"switch stacks, not blame";
        let ptr = payload.as_ptr() as u64;
        // Host addresses are not kernel user addresses; place the limit just
        // past the buffer so the bound check passes.
        let user_limit = ptr + payload.len() as u64;

        let mut sink = VecSink(Vec::new());
        assert_eq!(
            dispatch(&args(2, payload.len() as u64, ptr), user_limit, &mut sink),
            SyscallDisposition::Return(payload.len() as u64)
        );
        assert_eq!(sink.0, payload);
    }

    #[test]
    fn exit_reports_the_status_for_the_host_to_act_on() {
        let mut sink = VecSink(Vec::new());
        assert_eq!(
            dispatch(&args(1, 42, 0), u64::MAX, &mut sink),
            SyscallDisposition::Exit(42)
        );
    }

    #[test]
    fn error_codes_are_distinct_and_high() {
        assert_ne!(
            SyscallError::InvalidSyscall.into_return(),
            SyscallError::InvalidArg.into_return()
        );
        assert!(SyscallError::InvalidArg.into_return() > (1 << 63));
    }
}
