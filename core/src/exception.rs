//! Architectural exceptions: synchronous traps raised by fetch, decode,
//! load/store, and address translation.

use thiserror::Error;

/// A synchronous trap. Variant order matches the RISC-V privileged spec's
/// `mcause`/`scause` exception codes (see [`Exception::code`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Exception {
    #[error("instruction address misaligned")]
    InstructionAddressMisaligned,
    #[error("instruction access fault")]
    InstructionAccessFault,
    #[error("illegal instruction")]
    IllegalInstruction,
    #[error("breakpoint")]
    Breakpoint,
    #[error("load address misaligned")]
    LoadAddressMisaligned,
    #[error("load access fault")]
    LoadAccessFault,
    #[error("store/AMO address misaligned")]
    StoreAMOAddressMisaligned,
    #[error("store/AMO access fault")]
    StoreAMOAccessFault,
    #[error("environment call from U-mode")]
    EnvironmentCallFromUMode,
    #[error("environment call from S-mode")]
    EnvironmentCallFromSMode,
    #[error("environment call from M-mode")]
    EnvironmentCallFromMMode,
    #[error("instruction page fault")]
    InstructionPageFault,
    #[error("load page fault")]
    LoadPageFault,
    #[error("store/AMO page fault")]
    StoreAMOPageFault,
}

impl Exception {
    /// The `mcause`/`scause` exception code (interrupt bit unset).
    pub fn code(&self) -> u64 {
        use Exception::*;
        match self {
            InstructionAddressMisaligned => 0,
            InstructionAccessFault => 1,
            IllegalInstruction => 2,
            Breakpoint => 3,
            LoadAddressMisaligned => 4,
            LoadAccessFault => 5,
            StoreAMOAddressMisaligned => 6,
            StoreAMOAccessFault => 7,
            EnvironmentCallFromUMode => 8,
            EnvironmentCallFromSMode => 9,
            EnvironmentCallFromMMode => 11,
            InstructionPageFault => 12,
            LoadPageFault => 13,
            StoreAMOPageFault => 15,
        }
    }

    /// Exceptions the driver loop cannot recover from: the hart has no
    /// sensible way to resume after one of these.
    pub fn is_fatal(&self) -> bool {
        use Exception::*;
        matches!(
            self,
            InstructionAddressMisaligned
                | InstructionAccessFault
                | LoadAccessFault
                | StoreAMOAddressMisaligned
                | StoreAMOAccessFault
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_riscv_privileged_spec() {
        assert_eq!(Exception::InstructionAddressMisaligned.code(), 0);
        assert_eq!(Exception::EnvironmentCallFromMMode.code(), 11);
        assert_eq!(Exception::StoreAMOPageFault.code(), 15);
    }

    #[test]
    fn only_access_and_misalignment_faults_are_fatal() {
        assert!(Exception::InstructionAccessFault.is_fatal());
        assert!(Exception::StoreAMOAccessFault.is_fatal());
        assert!(!Exception::IllegalInstruction.is_fatal());
        assert!(!Exception::LoadPageFault.is_fatal());
    }
}
