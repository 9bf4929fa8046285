//! A single tagged union standing in for the original's exception/interrupt
//! class hierarchy: the delivery routine matches on it directly instead of
//! going through virtual dispatch.

use crate::exception::Exception;
use crate::interrupt::Interrupt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl Trap {
    /// The raw `mcause`/`scause` code, without the interrupt sign bit.
    pub fn code(&self) -> u64 {
        match self {
            Trap::Exception(e) => e.code(),
            Trap::Interrupt(i) => i.code(),
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Trap::Interrupt(_))
    }
}

impl From<Exception> for Trap {
    fn from(e: Exception) -> Self {
        Trap::Exception(e)
    }
}

impl From<Interrupt> for Trap {
    fn from(i: Interrupt) -> Self {
        Trap::Interrupt(i)
    }
}
