//! End-to-end Sv39 paging: a guest writes `SATP` through the real
//! `csrrw` instruction (exercising `Cpu::update_paging`, not just
//! `mmu::translate` in isolation) and a subsequent load is translated
//! through a hand-built three-level page table.

use rvemu64_core::cpu::Cpu;
use rvemu64_core::devices::ram::RAM_BASE;
use rvemu64_core::mmu::PAGE_SIZE;

fn ptr_pte(table_addr: u64) -> u64 {
    ((table_addr / PAGE_SIZE) << 10) | 0b0001 // V set, R/W/X clear: non-leaf
}

fn leaf_pte(ppn: u64) -> u64 {
    (ppn << 10) | 0b1111 // V|R|W|X set, A/D untracked
}

#[test]
fn satp_write_through_csrrw_enables_translation_for_the_next_load() {
    let mut cpu = Cpu::new(Vec::new(), Vec::new());

    // Three-level identity-ish mapping for VA 0x1000: vpn[2]=0, vpn[1]=0,
    // vpn[0]=1, landing on a leaf pointing at RAM_BASE + 0x3000.
    let root = RAM_BASE;
    let mid = RAM_BASE + 0x1000;
    let leaf_table = RAM_BASE + 0x2000;
    let target = RAM_BASE + 0x3000;

    cpu.bus.store(root, 8, ptr_pte(mid)).unwrap();
    cpu.bus.store(mid, 8, ptr_pte(leaf_table)).unwrap();
    cpu.bus.store(leaf_table + 8, 8, leaf_pte(target / PAGE_SIZE)).unwrap();
    cpu.bus.store(target, 8, 0xdead_beef_1234_5678).unwrap();

    // csrrw x0, satp, x1 -- x1 carries MODE=8 (Sv39) and the root's PPN.
    let satp_value = (8u64 << 60) | (root / PAGE_SIZE);
    cpu.xregs.write(1, satp_value);
    cpu.pc = cpu.pc.wrapping_add(4);
    cpu.execute(0x1800_9073).unwrap();

    // ld x2, 0(x3), with x3 holding the virtual address 0x1000.
    cpu.xregs.write(3, 0x1000);
    cpu.pc = cpu.pc.wrapping_add(4);
    cpu.execute(0x0001_b103).unwrap();

    assert_eq!(cpu.xregs.read(2), 0xdead_beef_1234_5678);
}
