//! The hart: general-purpose registers, privilege mode, and the
//! fetch/execute/trap pipeline.

use std::fmt;

use crate::bus::Bus;
use crate::csr::*;
use crate::devices::plic::PLIC_SCLAIM;
use crate::devices::uart::UART_IRQ;
use crate::devices::virtio::{VIRTIO_IRQ, VRING_DESC_SIZE};
use crate::exception::Exception;
use crate::interrupt::Interrupt;
use crate::mmu::{self, AccessType};
use crate::trap::Trap;

pub const REGISTERS_COUNT: usize = 32;
const SP: u64 = 2;

/// The current privilege level. `Debug` is unused by this subset; it
/// exists only because `MSTATUS.MPP == 0b10` must map to *something* when
/// restoring mode on `mret`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Copy, Clone)]
pub enum Mode {
    User = 0b00,
    Supervisor = 0b01,
    Machine = 0b11,
}

/// The 32 general-purpose integer registers. `x0` always reads as zero.
#[derive(Debug)]
pub struct XRegisters {
    xregs: [u64; REGISTERS_COUNT],
}

impl XRegisters {
    fn new(sp: u64) -> Self {
        let mut xregs = [0; REGISTERS_COUNT];
        xregs[SP as usize] = sp;
        Self { xregs }
    }

    pub fn read(&self, index: u64) -> u64 {
        self.xregs[index as usize]
    }

    pub fn write(&mut self, index: u64, value: u64) {
        if index != 0 {
            self.xregs[index as usize] = value;
        }
    }
}

impl fmt::Display for XRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..REGISTERS_COUNT).step_by(4) {
            writeln!(
                f,
                "x{:02}={:>#18x} x{:02}={:>#18x} x{:02}={:>#18x} x{:02}={:>#18x}",
                i,
                self.read(i as u64),
                i + 1,
                self.read(i as u64 + 1),
                i + 2,
                self.read(i as u64 + 2),
                i + 3,
                self.read(i as u64 + 3)
            )?;
        }
        Ok(())
    }
}

pub struct Cpu {
    pub xregs: XRegisters,
    pub csr: Csr,
    pub pc: u64,
    pub mode: Mode,
    pub bus: Bus,
    enable_paging: bool,
    page_table: u64,
}

impl Cpu {
    pub fn new(kernel_image: Vec<u8>, disk_image: Vec<u8>) -> Self {
        let bus = Bus::new(kernel_image, disk_image);
        let sp = crate::devices::ram::RAM_BASE + crate::devices::ram::RAM_SIZE;
        Self {
            xregs: XRegisters::new(sp),
            csr: Csr::new(),
            pc: crate::devices::ram::RAM_BASE,
            mode: Mode::Machine,
            bus,
            enable_paging: false,
            page_table: 0,
        }
    }

    fn translate(&self, addr: u64, access_type: AccessType) -> Result<u64, Exception> {
        mmu::translate(&self.bus, self.enable_paging, self.page_table, addr, access_type)
    }

    fn load(&self, addr: u64, size: u8) -> Result<u64, Exception> {
        let p_addr = self.translate(addr, AccessType::Load)?;
        self.bus.load(p_addr, size)
    }

    fn store(&mut self, addr: u64, size: u8, value: u64) -> Result<(), Exception> {
        let p_addr = self.translate(addr, AccessType::Store)?;
        self.bus.store(p_addr, size, value)
    }

    /// Fetches the 4-byte instruction at `pc`, translating it first.
    pub fn fetch(&self) -> Result<u32, Exception> {
        let p_pc = self.translate(self.pc, AccessType::Instruction)?;
        self.bus
            .load(p_pc, 4)
            .map(|v| v as u32)
            .map_err(|_| Exception::InstructionAccessFault)
    }

    /// Re-derives `page_table`/`enable_paging` after a write to `SATP`.
    fn update_paging(&mut self, csr_addr: u64) {
        if csr_addr != SATP {
            return;
        }
        let satp = self.csr.load(SATP);
        self.page_table = (satp & ((1u64 << 44) - 1)) * mmu::PAGE_SIZE;
        self.enable_paging = (satp >> 60) == 8;
    }

    /// Decodes and executes one instruction. `pc` must already have been
    /// advanced past `instruction` by the caller (see [`crate::emulator`]),
    /// since several immediate/branch computations recover the
    /// originating address via `pc - 4`.
    pub fn execute(&mut self, instruction: u32) -> Result<(), Exception> {
        self.xregs.write(0, 0);

        let opcode = instruction & 0x7f;
        let rd = ((instruction >> 7) & 0x1f) as u64;
        let rs1 = ((instruction >> 15) & 0x1f) as u64;
        let rs2 = ((instruction >> 20) & 0x1f) as u64;
        let funct3 = (instruction >> 12) & 0x7;
        let funct7 = (instruction >> 25) & 0x7f;

        match opcode {
            0x03 => {
                // loads
                let imm = ((instruction as i32) >> 20) as i64 as u64;
                let addr = self.xregs.read(rs1).wrapping_add(imm);
                match funct3 {
                    0x0 => {
                        let data = self.load(addr, 1)?;
                        self.xregs.write(rd, data as i8 as i64 as u64);
                    }
                    0x1 => {
                        let data = self.load(addr, 2)?;
                        self.xregs.write(rd, data as i16 as i64 as u64);
                    }
                    0x2 => {
                        let data = self.load(addr, 4)?;
                        self.xregs.write(rd, data as i32 as i64 as u64);
                    }
                    0x3 => {
                        let data = self.load(addr, 8)?;
                        self.xregs.write(rd, data);
                    }
                    0x4 => {
                        let data = self.load(addr, 1)?;
                        self.xregs.write(rd, data);
                    }
                    0x5 => {
                        let data = self.load(addr, 2)?;
                        self.xregs.write(rd, data);
                    }
                    0x6 => {
                        let data = self.load(addr, 4)?;
                        self.xregs.write(rd, data);
                    }
                    _ => return illegal(instruction),
                }
                Ok(())
            }
            0x0f => match funct3 {
                0x0 => Ok(()), // fence
                _ => illegal(instruction),
            },
            0x13 => {
                // register-immediate
                let imm = ((instruction as i32) >> 20) as i64 as u64;
                let shamt = (imm & 0x3f) as u32;
                match funct3 {
                    0x0 => {
                        self.xregs.write(rd, self.xregs.read(rs1).wrapping_add(imm));
                        Ok(())
                    }
                    0x1 => {
                        self.xregs.write(rd, self.xregs.read(rs1) << shamt);
                        Ok(())
                    }
                    0x2 => {
                        let v = (self.xregs.read(rs1) as i64) < (imm as i64);
                        self.xregs.write(rd, v as u64);
                        Ok(())
                    }
                    0x3 => {
                        let v = self.xregs.read(rs1) < imm;
                        self.xregs.write(rd, v as u64);
                        Ok(())
                    }
                    0x4 => {
                        self.xregs.write(rd, self.xregs.read(rs1) ^ imm);
                        Ok(())
                    }
                    0x5 => {
                        if funct7 >> 1 == 0x00 {
                            self.xregs.write(rd, self.xregs.read(rs1) >> shamt);
                            Ok(())
                        } else if funct7 >> 1 == 0x10 {
                            self.xregs
                                .write(rd, ((self.xregs.read(rs1) as i64) >> shamt) as u64);
                            Ok(())
                        } else {
                            illegal(instruction)
                        }
                    }
                    0x6 => {
                        self.xregs.write(rd, self.xregs.read(rs1) | imm);
                        Ok(())
                    }
                    0x7 => {
                        self.xregs.write(rd, self.xregs.read(rs1) & imm);
                        Ok(())
                    }
                    _ => illegal(instruction),
                }
            }
            0x17 => {
                // auipc
                let imm = (instruction & 0xffff_f000) as i32 as i64 as u64;
                self.xregs.write(rd, self.pc.wrapping_add(imm).wrapping_sub(4));
                Ok(())
            }
            0x1b => {
                // word-width register-immediate
                let imm = ((instruction as i32) >> 20) as i64 as u64;
                let shamt = (imm & 0x1f) as u32;
                match funct3 {
                    0x0 => {
                        let v = (self.xregs.read(rs1).wrapping_add(imm)) as i32;
                        self.xregs.write(rd, v as i64 as u64);
                        Ok(())
                    }
                    0x1 => {
                        let v = (self.xregs.read(rs1) as u32) << shamt;
                        self.xregs.write(rd, v as i32 as i64 as u64);
                        Ok(())
                    }
                    0x5 => {
                        if funct7 == 0x00 {
                            let v = (self.xregs.read(rs1) as u32) >> shamt;
                            self.xregs.write(rd, v as i32 as i64 as u64);
                            Ok(())
                        } else if funct7 == 0x20 {
                            let v = (self.xregs.read(rs1) as i32) >> shamt;
                            self.xregs.write(rd, v as i64 as u64);
                            Ok(())
                        } else {
                            illegal(instruction)
                        }
                    }
                    _ => illegal(instruction),
                }
            }
            0x23 => {
                // stores
                let imm = ((((instruction & 0xfe00_0000) as i32) >> 20) as u64)
                    | (((instruction >> 7) & 0x1f) as u64);
                let addr = self.xregs.read(rs1).wrapping_add(imm);
                match funct3 {
                    0x0 => self.store(addr, 1, self.xregs.read(rs2)),
                    0x1 => self.store(addr, 2, self.xregs.read(rs2)),
                    0x2 => self.store(addr, 4, self.xregs.read(rs2)),
                    0x3 => self.store(addr, 8, self.xregs.read(rs2)),
                    _ => illegal(instruction),
                }
            }
            0x2f => {
                // atomics
                let funct5 = (funct7 & 0b111_1100) >> 2;
                match (funct3, funct5) {
                    (0x2, 0x00) => {
                        // amoadd.w
                        let addr = self.xregs.read(rs1);
                        let temp = self.load(addr, 4)?;
                        self.store(addr, 4, temp.wrapping_add(self.xregs.read(rs2)))?;
                        self.xregs.write(rd, temp as i32 as i64 as u64);
                        Ok(())
                    }
                    (0x2, 0x01) => {
                        // amoswap.w
                        let addr = self.xregs.read(rs1);
                        let temp = self.load(addr, 4)?;
                        self.store(addr, 4, self.xregs.read(rs2))?;
                        self.xregs.write(rd, temp as i32 as i64 as u64);
                        Ok(())
                    }
                    (0x3, 0x00) => {
                        // amoadd.d
                        let addr = self.xregs.read(rs1);
                        let temp = self.load(addr, 8)?;
                        self.store(addr, 8, temp.wrapping_add(self.xregs.read(rs2)))?;
                        self.xregs.write(rd, temp);
                        Ok(())
                    }
                    (0x3, 0x01) => {
                        // amoswap.d
                        let addr = self.xregs.read(rs1);
                        let temp = self.load(addr, 8)?;
                        self.store(addr, 8, self.xregs.read(rs2))?;
                        self.xregs.write(rd, temp);
                        Ok(())
                    }
                    _ => illegal(instruction),
                }
            }
            0x33 => {
                // register-register
                let shamt = (self.xregs.read(rs2) & 0x3f) as u32;
                match funct3 {
                    0x0 => {
                        if funct7 == 0x00 {
                            self.xregs
                                .write(rd, self.xregs.read(rs1).wrapping_add(self.xregs.read(rs2)));
                            Ok(())
                        } else if funct7 == 0x01 {
                            self.xregs
                                .write(rd, self.xregs.read(rs1).wrapping_mul(self.xregs.read(rs2)));
                            Ok(())
                        } else if funct7 == 0x20 {
                            self.xregs
                                .write(rd, self.xregs.read(rs1).wrapping_sub(self.xregs.read(rs2)));
                            Ok(())
                        } else {
                            illegal(instruction)
                        }
                    }
                    0x1 => {
                        self.xregs.write(rd, self.xregs.read(rs1) << shamt);
                        Ok(())
                    }
                    0x2 => {
                        let v = (self.xregs.read(rs1) as i64) < (self.xregs.read(rs2) as i64);
                        self.xregs.write(rd, v as u64);
                        Ok(())
                    }
                    0x3 => {
                        let v = self.xregs.read(rs1) < self.xregs.read(rs2);
                        self.xregs.write(rd, v as u64);
                        Ok(())
                    }
                    0x4 => {
                        self.xregs.write(rd, self.xregs.read(rs1) ^ self.xregs.read(rs2));
                        Ok(())
                    }
                    0x5 => {
                        if funct7 == 0x00 {
                            self.xregs.write(rd, self.xregs.read(rs1) >> shamt);
                            Ok(())
                        } else if funct7 == 0x20 {
                            self.xregs
                                .write(rd, ((self.xregs.read(rs1) as i64) >> shamt) as u64);
                            Ok(())
                        } else {
                            illegal(instruction)
                        }
                    }
                    0x6 => {
                        self.xregs.write(rd, self.xregs.read(rs1) | self.xregs.read(rs2));
                        Ok(())
                    }
                    0x7 => {
                        self.xregs.write(rd, self.xregs.read(rs1) & self.xregs.read(rs2));
                        Ok(())
                    }
                    _ => illegal(instruction),
                }
            }
            0x37 => {
                // lui
                self.xregs.write(rd, (instruction & 0xffff_f000) as i32 as i64 as u64);
                Ok(())
            }
            0x3b => {
                // word-width register-register
                let shamt = (self.xregs.read(rs2) & 0x1f) as u32;
                match funct3 {
                    0x0 => {
                        if funct7 == 0x00 {
                            let v = (self.xregs.read(rs1) as u32).wrapping_add(self.xregs.read(rs2) as u32);
                            self.xregs.write(rd, v as i32 as i64 as u64);
                            Ok(())
                        } else if funct7 == 0x20 {
                            let v = (self.xregs.read(rs1) as u32).wrapping_sub(self.xregs.read(rs2) as u32);
                            self.xregs.write(rd, v as i32 as i64 as u64);
                            Ok(())
                        } else {
                            illegal(instruction)
                        }
                    }
                    0x1 => {
                        let v = (self.xregs.read(rs1) as u32) << shamt;
                        self.xregs.write(rd, v as i32 as i64 as u64);
                        Ok(())
                    }
                    0x5 => {
                        if funct7 == 0x00 {
                            let v = (self.xregs.read(rs1) as u32) >> shamt;
                            self.xregs.write(rd, v as i32 as i64 as u64);
                            Ok(())
                        } else if funct7 == 0x01 {
                            // divu: RV64M word op, operands masked to 32 bits (see DESIGN.md)
                            let dividend = self.xregs.read(rs1) as u32;
                            let divisor = self.xregs.read(rs2) as u32;
                            let v = dividend.checked_div(divisor).unwrap_or(u32::MAX);
                            self.xregs.write(rd, v as i32 as i64 as u64);
                            Ok(())
                        } else if funct7 == 0x20 {
                            let v = (self.xregs.read(rs1) as i32) >> (shamt as i32);
                            self.xregs.write(rd, v as i64 as u64);
                            Ok(())
                        } else {
                            illegal(instruction)
                        }
                    }
                    0x7 => {
                        // remuw
                        let divisor = self.xregs.read(rs2) as u32;
                        let dividend = self.xregs.read(rs1) as u32;
                        let v = if divisor == 0 { dividend } else { dividend % divisor };
                        self.xregs.write(rd, v as i32 as i64 as u64);
                        Ok(())
                    }
                    _ => illegal(instruction),
                }
            }
            0x63 => {
                // branches
                let imm = (((instruction & 0x8000_0000) as i32 as i64 as u64) >> 19)
                    | (((instruction & 0x80) as u64) << 4)
                    | (((instruction >> 20) & 0x7e0) as u64)
                    | (((instruction >> 7) & 0x1e) as u64);
                let taken = match funct3 {
                    0x0 => self.xregs.read(rs1) == self.xregs.read(rs2),
                    0x1 => self.xregs.read(rs1) != self.xregs.read(rs2),
                    0x4 => (self.xregs.read(rs1) as i64) < (self.xregs.read(rs2) as i64),
                    0x5 => (self.xregs.read(rs1) as i64) >= (self.xregs.read(rs2) as i64),
                    0x6 => self.xregs.read(rs1) < self.xregs.read(rs2),
                    0x7 => self.xregs.read(rs1) >= self.xregs.read(rs2),
                    _ => return illegal(instruction),
                };
                if taken {
                    self.pc = self.pc.wrapping_add(imm).wrapping_sub(4);
                }
                Ok(())
            }
            0x67 => {
                // jalr
                let temp = self.pc;
                let imm = ((instruction as i32) >> 20) as i64 as u64;
                self.pc = self.xregs.read(rs1).wrapping_add(imm) & !1;
                self.xregs.write(rd, temp);
                Ok(())
            }
            0x6f => {
                // jal
                self.xregs.write(rd, self.pc);
                let imm = (((instruction & 0x8000_0000) as i32 as i64 as u64) >> 11)
                    | ((instruction & 0xff000) as u64)
                    | (((instruction >> 9) & 0x800) as u64)
                    | (((instruction >> 20) & 0x7fe) as u64);
                self.pc = self.pc.wrapping_add(imm).wrapping_sub(4);
                Ok(())
            }
            0x73 => self.execute_system(instruction, rd, rs1, rs2, funct3, funct7),
            _ => illegal(instruction),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_system(
        &mut self,
        instruction: u32,
        rd: u64,
        rs1: u64,
        rs2: u64,
        funct3: u32,
        funct7: u32,
    ) -> Result<(), Exception> {
        let csr_addr = (instruction >> 20) as u64 & 0xfff;

        match funct3 {
            0x0 => {
                if rs2 == 0x0 && funct7 == 0x0 {
                    // ecall
                    Err(match self.mode {
                        Mode::User => Exception::EnvironmentCallFromUMode,
                        Mode::Supervisor => Exception::EnvironmentCallFromSMode,
                        Mode::Machine => Exception::EnvironmentCallFromMMode,
                    })
                } else if rs2 == 0x1 && funct7 == 0x0 {
                    Err(Exception::Breakpoint)
                } else if rs2 == 0x2 {
                    if funct7 == 0x8 {
                        self.exec_sret();
                        Ok(())
                    } else if funct7 == 0x18 {
                        self.exec_mret();
                        Ok(())
                    } else {
                        illegal(instruction)
                    }
                } else if funct7 == 0x9 {
                    // sfence.vma
                    Ok(())
                } else {
                    illegal(instruction)
                }
            }
            0x1 => {
                // csrrw
                let temp = self.csr.load(csr_addr);
                self.csr.store(csr_addr, self.xregs.read(rs1));
                self.xregs.write(rd, temp);
                self.update_paging(csr_addr);
                Ok(())
            }
            0x2 => {
                // csrrs
                let temp = self.csr.load(csr_addr);
                self.csr.store(csr_addr, temp | self.xregs.read(rs1));
                self.xregs.write(rd, temp);
                self.update_paging(csr_addr);
                Ok(())
            }
            0x3 => {
                // csrrc
                let temp = self.csr.load(csr_addr);
                self.csr.store(csr_addr, temp & !self.xregs.read(rs1));
                self.xregs.write(rd, temp);
                self.update_paging(csr_addr);
                Ok(())
            }
            0x5 => {
                // csrrwi
                let zimm = rs1;
                self.xregs.write(rd, self.csr.load(csr_addr));
                self.csr.store(csr_addr, zimm);
                self.update_paging(csr_addr);
                Ok(())
            }
            0x6 => {
                // csrrsi
                let zimm = rs1;
                let temp = self.csr.load(csr_addr);
                self.csr.store(csr_addr, temp | zimm);
                self.xregs.write(rd, temp);
                self.update_paging(csr_addr);
                Ok(())
            }
            0x7 => {
                // csrrci
                let zimm = rs1;
                let temp = self.csr.load(csr_addr);
                self.csr.store(csr_addr, temp & !zimm);
                self.xregs.write(rd, temp);
                self.update_paging(csr_addr);
                Ok(())
            }
            _ => illegal(instruction),
        }
    }

    fn exec_sret(&mut self) {
        self.pc = self.csr.load(SEPC);
        let sstatus = self.csr.load(SSTATUS);
        let spp = (sstatus >> 8) & 1;
        self.mode = if spp == 1 { Mode::Supervisor } else { Mode::User };

        let spie = (sstatus >> 5) & 1;
        let sstatus = self.csr.load(SSTATUS);
        let sstatus = if spie == 1 { sstatus | (1 << 1) } else { sstatus & !(1 << 1) };
        self.csr.store(SSTATUS, sstatus);
        self.csr.store(SSTATUS, self.csr.load(SSTATUS) | (1 << 5));
        self.csr.store(SSTATUS, self.csr.load(SSTATUS) & !(1 << 8));
    }

    fn exec_mret(&mut self) {
        self.pc = self.csr.load(MEPC);
        let mstatus = self.csr.load(MSTATUS);
        let mpp = (mstatus >> 11) & 0b11;
        self.mode = match mpp {
            0b11 => Mode::Machine,
            0b01 => Mode::Supervisor,
            _ => Mode::User,
        };

        let mpie = (mstatus >> 7) & 1;
        let mstatus = self.csr.load(MSTATUS);
        let mstatus = if mpie == 1 { mstatus | (1 << 3) } else { mstatus & !(1 << 3) };
        self.csr.store(MSTATUS, mstatus);
        self.csr.store(MSTATUS, self.csr.load(MSTATUS) | (1 << 7));
        self.csr.store(MSTATUS, self.csr.load(MSTATUS) & !(0b11 << 11));
    }

    /// Delivers `trap`, choosing Supervisor or Machine as the target mode
    /// per `MEDELEG` (used, per the original, for both exceptions and
    /// interrupts — see DESIGN.md Open Question 2).
    pub fn take_trap(&mut self, trap: Trap) {
        let exception_pc = self.pc.wrapping_sub(4);
        let previous_mode = self.mode;

        let mut cause = trap.code();
        if trap.is_interrupt() {
            cause |= 1 << 63;
        }

        let delegated =
            previous_mode <= Mode::Supervisor && (self.csr.load(MEDELEG) >> (cause & 0x3f)) & 1 != 0;

        if delegated {
            self.mode = Mode::Supervisor;

            let stvec = self.csr.load(STVEC);
            self.pc = if trap.is_interrupt() && stvec & 1 == 1 {
                (stvec & !1).wrapping_add(4u64.wrapping_mul(cause & !(1 << 63)))
            } else {
                stvec & !1
            };

            self.csr.store(SEPC, exception_pc & !1);
            self.csr.store(SCAUSE, cause);
            self.csr.store(STVAL, 0);

            let sstatus = self.csr.load(SSTATUS);
            let sstatus = if (sstatus >> 1) & 1 == 1 { sstatus | (1 << 5) } else { sstatus & !(1 << 5) };
            self.csr.store(SSTATUS, sstatus);
            self.csr.store(SSTATUS, self.csr.load(SSTATUS) & !(1 << 1));

            let sstatus = self.csr.load(SSTATUS);
            self.csr.store(
                SSTATUS,
                if previous_mode == Mode::User { sstatus & !(1 << 8) } else { sstatus | (1 << 8) },
            );
        } else {
            self.mode = Mode::Machine;

            let mtvec = self.csr.load(MTVEC);
            self.pc = if trap.is_interrupt() && mtvec & 1 == 1 {
                (mtvec & !1).wrapping_add(4u64.wrapping_mul(cause & !(1 << 63)))
            } else {
                mtvec & !1
            };

            self.csr.store(MEPC, exception_pc & !1);
            self.csr.store(MCAUSE, cause);
            self.csr.store(MTVAL, 0);

            let mstatus = self.csr.load(MSTATUS);
            let mstatus = if (mstatus >> 3) & 1 == 1 { mstatus | (1 << 7) } else { mstatus & !(1 << 7) };
            self.csr.store(MSTATUS, mstatus);
            self.csr.store(MSTATUS, self.csr.load(MSTATUS) & !(1 << 3));
            self.csr.store(MSTATUS, self.csr.load(MSTATUS) & !(0b11 << 11));
        }
    }

    /// Polls for a pending, enabled interrupt, running the disk-access
    /// transfer first if VIRTIO is the source. Clears the corresponding
    /// `MIP` bit and returns the interrupt to deliver, in priority order.
    ///
    /// A disk I/O error is process-fatal (see `disk_access`): it is
    /// surfaced here as `Err` rather than swallowed, so the driver loop
    /// can terminate with a non-zero exit instead of quietly delivering
    /// the VIRTIO interrupt anyway.
    pub fn check_pending_interrupt(&mut self) -> Result<Option<Interrupt>, Exception> {
        let globally_enabled = match self.mode {
            Mode::Machine => (self.csr.load(MSTATUS) >> 3) & 1 != 0,
            Mode::Supervisor => (self.csr.load(SSTATUS) >> 1) & 1 != 0,
            Mode::User => true,
        };
        if !globally_enabled {
            return Ok(None);
        }

        let irq = if self.bus.uart.is_interrupting() {
            UART_IRQ
        } else if self.bus.virtio.is_interrupting() {
            self.disk_access()
                .inspect_err(|e| tracing::error!("disk_access failed: {e}"))?;
            VIRTIO_IRQ
        } else {
            0
        };

        if irq != 0 {
            let _ = self.store(PLIC_SCLAIM, 4, irq);
            self.csr.store(MIP, self.csr.load(MIP) | MIP_SEIP);
        }

        let pending = self.csr.load(MIE) & self.csr.load(MIP);

        let take = |cpu: &mut Self, bit: u64, interrupt: Interrupt| -> Option<Interrupt> {
            cpu.csr.store(MIP, cpu.csr.load(MIP) & !bit);
            Some(interrupt)
        };

        if pending & MIP_MEIP != 0 {
            return Ok(take(self, MIP_MEIP, Interrupt::MachineExternalInterrupt));
        }
        if pending & MIP_MSIP != 0 {
            return Ok(take(self, MIP_MSIP, Interrupt::MachineSoftwareInterrupt));
        }
        if pending & MIP_MTIP != 0 {
            return Ok(take(self, MIP_MTIP, Interrupt::MachineTimerInterrupt));
        }
        if pending & MIP_SEIP != 0 {
            return Ok(take(self, MIP_SEIP, Interrupt::SupervisorExternalInterrupt));
        }
        if pending & MIP_SSIP != 0 {
            return Ok(take(self, MIP_SSIP, Interrupt::SupervisorSoftwareInterrupt));
        }
        if pending & MIP_STIP != 0 {
            return Ok(take(self, MIP_STIP, Interrupt::SupervisorTimerInterrupt));
        }
        Ok(None)
    }

    /// Walks the legacy split-virtqueue descriptor chain and performs the
    /// guest↔disk byte transfer it describes. Any I/O error here (an
    /// out-of-range guest address, in practice) is process-fatal; the
    /// caller is responsible for logging and terminating the driver loop.
    fn disk_access(&mut self) -> Result<(), Exception> {
        let desc_addr = self.bus.virtio.desc_addr();
        let avail_addr = desc_addr + 0x40;
        let used_addr = desc_addr + 0x1000;

        let offset = self.load(avail_addr + 1, 2)?;
        let index = self.load(avail_addr + (offset % crate::devices::virtio::DESC_NUM) + 2, 2)?;

        let desc_addr0 = desc_addr + VRING_DESC_SIZE * index;
        let addr0 = self.load(desc_addr0, 8)?;
        let next0 = self.load(desc_addr0 + 14, 2)?;

        let desc_addr1 = desc_addr + VRING_DESC_SIZE * next0;
        let addr1 = self.load(desc_addr1, 8)?;
        let len1 = self.load(desc_addr1 + 8, 4)?;
        let flags1 = self.load(desc_addr1 + 12, 2)?;

        let sector = self.load(addr0 + 8, 8)?;

        if flags1 & 2 == 0 {
            for i in 0..len1 {
                let data = self.load(addr1 + i, 1)? as u8;
                self.bus.virtio.write_disk(sector * 512 + i, data);
            }
        } else {
            for i in 0..len1 {
                let data = self.bus.virtio.read_disk(sector * 512 + i);
                self.store(addr1 + i, 1, data as u64)?;
            }
        }

        let new_id = self.bus.virtio.get_new_id();
        self.store(used_addr + 2, 2, new_id % 8)?;
        Ok(())
    }
}

fn illegal(instruction: u32) -> Result<(), Exception> {
    tracing::warn!("illegal instruction: {instruction:#010x}");
    Err(Exception::IllegalInstruction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::ram::RAM_BASE;

    fn new_cpu() -> Cpu {
        Cpu::new(Vec::new(), Vec::new())
    }

    fn run_one(cpu: &mut Cpu, instruction: u32) -> Result<(), Exception> {
        cpu.pc = cpu.pc.wrapping_add(4);
        cpu.execute(instruction)
    }

    #[test]
    fn addi_then_add() {
        let mut cpu = new_cpu();
        // addi x1, x0, 5
        run_one(&mut cpu, 0x0050_0093).unwrap();
        // addi x2, x0, 7
        run_one(&mut cpu, 0x0070_0113).unwrap();
        // add x3, x1, x2
        run_one(&mut cpu, 0x0020_81b3).unwrap();
        assert_eq!(cpu.xregs.read(1), 5);
        assert_eq!(cpu.xregs.read(2), 7);
        assert_eq!(cpu.xregs.read(3), 12);
    }

    #[test]
    fn auipc_adds_imm_to_originating_pc() {
        let mut cpu = new_cpu();
        cpu.pc = RAM_BASE;
        // auipc x5, 0x1
        run_one(&mut cpu, 0x0000_1297).unwrap();
        assert_eq!(cpu.xregs.read(5), RAM_BASE + 0x1000);
    }

    #[test]
    fn jal_forward_links_and_jumps() {
        let mut cpu = new_cpu();
        let start = RAM_BASE;
        cpu.pc = start;
        // jal x1, +8
        run_one(&mut cpu, 0x0080_00ef).unwrap();
        assert_eq!(cpu.xregs.read(1), start + 4);
        assert_eq!(cpu.pc, start + 8);
    }

    #[test]
    fn little_endian_store_then_load() {
        let mut cpu = new_cpu();
        cpu.xregs.write(1, 0x0102_0304_0506_0708);
        cpu.xregs.write(2, RAM_BASE + 0x100);
        // sd x1, 0(x2)
        run_one(&mut cpu, 0x0011_3023).unwrap();
        // ld x3, 0(x2)
        run_one(&mut cpu, 0x0001_3183).unwrap();
        assert_eq!(cpu.xregs.read(3), 0x0102_0304_0506_0708);
        assert_eq!(cpu.bus.load(RAM_BASE + 0x100, 1).unwrap(), 0x08);
    }

    #[test]
    fn csr_round_trip_via_csrrw() {
        let mut cpu = new_cpu();
        cpu.xregs.write(2, 0xabcd);
        // csrrw x1, mscratch, x2
        run_one(&mut cpu, 0x3401_10f3).unwrap();
        assert_eq!(cpu.xregs.read(1), 0);
        assert_eq!(cpu.csr.load(MSCRATCH), 0xabcd);

        cpu.xregs.write(2, 0x1234);
        run_one(&mut cpu, 0x3401_10f3).unwrap();
        assert_eq!(cpu.xregs.read(1), 0xabcd);
    }

    #[test]
    fn ecall_from_user_mode_is_delegated_to_supervisor() {
        let mut cpu = new_cpu();
        cpu.mode = Mode::User;
        cpu.csr.store(MEDELEG, 1 << 8);
        cpu.csr.store(STVEC, 0x8000_2000);
        cpu.pc = RAM_BASE + 4;
        // ecall
        let err = cpu.execute(0x0000_0073).unwrap_err();
        cpu.take_trap(err.into());
        assert_eq!(cpu.mode, Mode::Supervisor);
        assert_eq!(cpu.csr.load(SEPC), RAM_BASE);
        assert_eq!(cpu.csr.load(SCAUSE), 8);
        assert_eq!(cpu.pc, 0x8000_2000);
    }

    #[test]
    fn zero_register_always_reads_zero() {
        let mut cpu = new_cpu();
        // addi x0, x0, 5 (rd=0)
        run_one(&mut cpu, 0x0050_0013).unwrap();
        assert_eq!(cpu.xregs.read(0), 0);
    }

    #[test]
    fn divu_by_zero_yields_all_ones() {
        let mut cpu = new_cpu();
        cpu.xregs.write(1, 10);
        cpu.xregs.write(2, 0);
        // divu x3, x1, x2 (funct7=1, funct3=5, opcode=0x3b)
        run_one(&mut cpu, 0x0220_d1bb).unwrap();
        assert_eq!(cpu.xregs.read(3), 0xffff_ffff_ffff_ffff);
    }
}
