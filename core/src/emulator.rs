//! The driver loop: fetch, advance `pc`, execute, poll for an interrupt,
//! deliver whatever trap resulted.

use crate::cpu::Cpu;
use crate::exception::Exception;

pub struct Emulator {
    pub cpu: Cpu,
}

impl Emulator {
    pub fn new(kernel_image: Vec<u8>, disk_image: Vec<u8>) -> Self {
        Self {
            cpu: Cpu::new(kernel_image, disk_image),
        }
    }

    /// Runs until a fatal exception from fetch or execute (a graceful,
    /// zero-exit-code termination) or a disk-access I/O error (`Err`,
    /// which the caller must surface as a non-zero process exit).
    pub fn run(&mut self) -> Result<(), Exception> {
        loop {
            match self.cpu.fetch() {
                Ok(instruction) => {
                    self.cpu.pc = self.cpu.pc.wrapping_add(4);

                    if let Err(e) = self.cpu.execute(instruction) {
                        let fatal = e.is_fatal();
                        tracing::debug!("exception during execute: {e}");
                        self.cpu.take_trap(e.into());
                        if fatal {
                            return Ok(());
                        }
                    }

                    if let Some(interrupt) = self.cpu.check_pending_interrupt()? {
                        self.cpu.take_trap(interrupt.into());
                    }
                }
                Err(e) => {
                    let fatal = e.is_fatal();
                    tracing::debug!("exception during fetch: {e}");
                    self.cpu.take_trap(e.into());
                    if fatal {
                        return Ok(());
                    }
                }
            }
        }
    }
}
