//! A minimal 16550-like UART. A detached reader thread blocks on host
//! standard input and feeds bytes into the receive-holding register,
//! synchronized with the execution core through a mutex/condvar pair plus
//! a one-shot atomic interrupt flag.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::exception::Exception;

pub const UART_BASE: u64 = 0x1000_0000;
pub const UART_SIZE: u64 = 0x100;
pub const UART_IRQ: u64 = 10;

const UART_RHR: u64 = UART_BASE;
const UART_THR: u64 = UART_BASE;
const UART_LSR: u64 = UART_BASE + 5;
const UART_LSR_RX: u8 = 1;
const UART_LSR_TX: u8 = 1 << 5;

pub struct Uart {
    regs: Arc<(Mutex<[u8; UART_SIZE as usize]>, Condvar)>,
    interrupting: Arc<AtomicBool>,
}

impl Uart {
    pub fn new() -> Self {
        let regs = Arc::new((Mutex::new([0u8; UART_SIZE as usize]), Condvar::new()));
        let interrupting = Arc::new(AtomicBool::new(false));

        {
            let (lock, _) = &*regs;
            let mut regs = lock.lock().expect("UART mutex poisoned");
            regs[(UART_LSR - UART_BASE) as usize] |= UART_LSR_TX;
        }

        let reader_regs = regs.clone();
        let reader_interrupting = interrupting.clone();
        thread::spawn(move || {
            let mut byte = [0u8; 1];
            loop {
                match io::stdin().read(&mut byte) {
                    Ok(0) => break,
                    Ok(_) => {
                        let (lock, cvar) = &*reader_regs;
                        let mut regs = lock.lock().expect("UART mutex poisoned");
                        while regs[(UART_LSR - UART_BASE) as usize] & UART_LSR_RX != 0 {
                            regs = cvar.wait(regs).expect("UART mutex poisoned");
                        }
                        let c = match byte[0] {
                            b'_' => b' ',
                            b';' => b'\n',
                            other => other,
                        };
                        regs[(UART_RHR - UART_BASE) as usize] = c;
                        reader_interrupting.store(true, Ordering::Release);
                        regs[(UART_LSR - UART_BASE) as usize] |= UART_LSR_RX;
                    }
                    Err(e) => {
                        tracing::warn!("UART stdin read error: {e}");
                        break;
                    }
                }
            }
        });

        Self { regs, interrupting }
    }

    pub fn load(&self, addr: u64, size: u8) -> Result<u64, Exception> {
        if size != 1 {
            return Err(Exception::LoadAccessFault);
        }
        let (lock, cvar) = &*self.regs;
        let mut regs = lock.lock().expect("UART mutex poisoned");
        if addr == UART_RHR {
            cvar.notify_one();
            regs[(UART_LSR - UART_BASE) as usize] &= !UART_LSR_RX;
            return Ok(regs[(UART_RHR - UART_BASE) as usize] as u64);
        }
        Ok(regs[(addr - UART_BASE) as usize] as u64)
    }

    pub fn store(&self, addr: u64, size: u8, value: u64) -> Result<(), Exception> {
        if size != 1 {
            return Err(Exception::StoreAMOAccessFault);
        }
        let (lock, _) = &*self.regs;
        let mut regs = lock.lock().expect("UART mutex poisoned");
        if addr == UART_THR {
            print!("{}", value as u8 as char);
            use std::io::Write;
            io::stdout().flush().ok();
            return Ok(());
        }
        regs[(addr - UART_BASE) as usize] = value as u8;
        Ok(())
    }

    /// Returns whether a byte has arrived since the last call, consuming
    /// the flag.
    pub fn is_interrupting(&self) -> bool {
        self.interrupting.swap(false, Ordering::Acquire)
    }
}

impl Default for Uart {
    fn default() -> Self {
        Self::new()
    }
}
