//! Flat RAM, mapped at [`RAM_BASE`] and loaded with the guest kernel image
//! at construction time.

use crate::exception::Exception;

pub const RAM_BASE: u64 = 0x8000_0000;
pub const RAM_SIZE: u64 = 1024 * 1024 * 128;

pub struct Ram {
    data: Vec<u8>,
}

impl Ram {
    pub fn new(image: Vec<u8>) -> Self {
        let mut data = image;
        data.resize(RAM_SIZE as usize, 0);
        Self { data }
    }

    pub fn load(&self, addr: u64, size: u8) -> Result<u64, Exception> {
        let mut result: u64 = 0;
        for i in 0..size as u64 {
            let idx = (addr - RAM_BASE + i) as usize;
            let byte = *self.data.get(idx).ok_or(Exception::LoadAccessFault)?;
            result |= (byte as u64) << (i * 8);
        }
        Ok(result)
    }

    pub fn store(&mut self, addr: u64, size: u8, value: u64) -> Result<(), Exception> {
        for i in 0..size as u64 {
            let idx = (addr - RAM_BASE + i) as usize;
            if idx >= self.data.len() {
                return Err(Exception::StoreAMOAccessFault);
            }
            self.data[idx] = ((value >> (i * 8)) & 0xff) as u8;
        }
        Ok(())
    }
}
