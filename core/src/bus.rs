//! Address-range dispatch over the fixed set of four peripherals plus RAM.
//! The device set is closed, so this is plain field dispatch rather than a
//! trait-object table.

use crate::devices::clint::{Clint, CLINT_BASE, CLINT_SIZE};
use crate::devices::plic::{Plic, PLIC_BASE, PLIC_SIZE};
use crate::devices::ram::{Ram, RAM_BASE};
use crate::devices::uart::{Uart, UART_BASE, UART_SIZE};
use crate::devices::virtio::{Virtio, VIRTIO_BASE, VIRTIO_SIZE};
use crate::exception::Exception;

pub struct Bus {
    pub clint: Clint,
    pub plic: Plic,
    pub uart: Uart,
    pub virtio: Virtio,
    pub ram: Ram,
}

impl Bus {
    pub fn new(kernel_image: Vec<u8>, disk_image: Vec<u8>) -> Self {
        Self {
            clint: Clint::new(),
            plic: Plic::new(),
            uart: Uart::new(),
            virtio: Virtio::new(disk_image),
            ram: Ram::new(kernel_image),
        }
    }

    pub fn load(&self, addr: u64, size: u8) -> Result<u64, Exception> {
        if (CLINT_BASE..CLINT_BASE + CLINT_SIZE).contains(&addr) {
            return self.clint.load(addr, size);
        }
        if (PLIC_BASE..PLIC_BASE + PLIC_SIZE).contains(&addr) {
            return self.plic.load(addr, size);
        }
        if (UART_BASE..UART_BASE + UART_SIZE).contains(&addr) {
            return self.uart.load(addr, size);
        }
        if (VIRTIO_BASE..VIRTIO_BASE + VIRTIO_SIZE).contains(&addr) {
            return self.virtio.load(addr, size);
        }
        if addr >= RAM_BASE {
            return self.ram.load(addr, size);
        }
        Err(Exception::LoadAccessFault)
    }

    pub fn store(&mut self, addr: u64, size: u8, value: u64) -> Result<(), Exception> {
        if (CLINT_BASE..CLINT_BASE + CLINT_SIZE).contains(&addr) {
            return self.clint.store(addr, size, value);
        }
        if (PLIC_BASE..PLIC_BASE + PLIC_SIZE).contains(&addr) {
            return self.plic.store(addr, size, value);
        }
        if (UART_BASE..UART_BASE + UART_SIZE).contains(&addr) {
            return self.uart.store(addr, size, value);
        }
        if (VIRTIO_BASE..VIRTIO_BASE + VIRTIO_SIZE).contains(&addr) {
            return self.virtio.store(addr, size, value);
        }
        if addr >= RAM_BASE {
            return self.ram.store(addr, size, value);
        }
        Err(Exception::StoreAMOAccessFault)
    }
}
