//! Architectural interrupts: asynchronous traps delivered between
//! instructions when an enabled `xIP` bit is pending.

/// An asynchronous trap. Variant order matches the RISC-V privileged spec's
/// `mcause`/`scause` interrupt codes (see [`Interrupt::code`]); the
/// interrupt bit itself is added by the caller when stacking the cause CSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    UserSoftwareInterrupt,
    SupervisorSoftwareInterrupt,
    MachineSoftwareInterrupt,
    UserTimerInterrupt,
    SupervisorTimerInterrupt,
    MachineTimerInterrupt,
    UserExternalInterrupt,
    SupervisorExternalInterrupt,
    MachineExternalInterrupt,
}

impl Interrupt {
    /// The `mcause`/`scause` interrupt code (interrupt bit unset).
    pub fn code(&self) -> u64 {
        use Interrupt::*;
        match self {
            UserSoftwareInterrupt => 0,
            SupervisorSoftwareInterrupt => 1,
            MachineSoftwareInterrupt => 3,
            UserTimerInterrupt => 4,
            SupervisorTimerInterrupt => 5,
            MachineTimerInterrupt => 7,
            UserExternalInterrupt => 8,
            SupervisorExternalInterrupt => 9,
            MachineExternalInterrupt => 11,
        }
    }
}
