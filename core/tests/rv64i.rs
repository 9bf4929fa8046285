//! RV64I instruction-sequence integration tests: assemble a handful of
//! instructions by hand (as raw little-endian words, annotated with the
//! assembly they encode), load them as a kernel image, and drive the
//! fetch/advance-pc/execute pipeline directly -- asserting on the
//! resulting hart state rather than unit testing `Cpu::execute` in
//! isolation.

use rvemu64_core::cpu::Cpu;
use rvemu64_core::devices::ram::RAM_BASE;

fn image(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn new_cpu(words: &[u32]) -> Cpu {
    Cpu::new(image(words), Vec::new())
}

/// Runs exactly `steps` fetch/advance-pc/execute cycles, matching the
/// driver loop's convention (see `emulator.rs`). A branch or jump that
/// redirects `pc` means fewer than `words.len()` instructions may
/// actually be fetched.
fn run_steps(cpu: &mut Cpu, steps: usize) {
    for _ in 0..steps {
        let instruction = cpu.fetch().expect("fetch should not trap");
        cpu.pc = cpu.pc.wrapping_add(4);
        cpu.execute(instruction).expect("execute should not trap");
    }
}

#[test]
fn register_register_arithmetic_and_logic() {
    let mut cpu = new_cpu(&[
        0x00a0_0093, // addi x1, x0, 10
        0x0030_0113, // addi x2, x0, 3
        0x0020_81b3, // add  x3, x1, x2
        0x4020_8233, // sub  x4, x1, x2
        0x0020_f2b3, // and  x5, x1, x2
        0x0020_e333, // or   x6, x1, x2
        0x0020_c3b3, // xor  x7, x1, x2
    ]);
    run_steps(&mut cpu, 7);

    assert_eq!(cpu.xregs.read(3), 13);
    assert_eq!(cpu.xregs.read(4), 7);
    assert_eq!(cpu.xregs.read(5), 2);
    assert_eq!(cpu.xregs.read(6), 11);
    assert_eq!(cpu.xregs.read(7), 9);
}

#[test]
fn signed_vs_unsigned_comparisons_and_shifts() {
    let mut cpu = new_cpu(&[
        0xfff0_0093, // addi x1, x0, -1  (x1 = 0xffff_ffff_ffff_ffff)
        0x0000_a113, // slti  x2, x1, 0  (signed: -1 < 0)
        0x0000_b193, // sltiu x3, x1, 0  (unsigned: huge < 0 is false)
        0x0040_9213, // slli  x4, x1, 4
        0x03c0_d293, // srli  x5, x1, 60 (logical: top bits are zero-filled)
        0x43c0_d313, // srai  x6, x1, 60 (arithmetic: sign-extends)
    ]);
    run_steps(&mut cpu, 6);

    assert_eq!(cpu.xregs.read(2), 1);
    assert_eq!(cpu.xregs.read(3), 0);
    assert_eq!(cpu.xregs.read(4), 0xffff_ffff_ffff_fff0);
    assert_eq!(cpu.xregs.read(5), 0xf);
    assert_eq!(cpu.xregs.read(6), 0xffff_ffff_ffff_ffff);
}

#[test]
fn word_store_then_word_load_round_trips_through_ram() {
    let mut cpu = new_cpu(&[
        0x0000_0117, // auipc x2, 0   (x2 = RAM_BASE, the originating pc)
        0x1230_0093, // addi  x1, x0, 0x123
        0x0011_2023, // sw    x1, 0(x2)
        0x0001_2183, // lw    x3, 0(x2)
    ]);
    run_steps(&mut cpu, 4);

    assert_eq!(cpu.xregs.read(2), RAM_BASE);
    assert_eq!(cpu.xregs.read(3), 0x123);
    assert_eq!(cpu.bus.load(RAM_BASE, 4).unwrap(), 0x123);
}

#[test]
fn taken_branch_skips_the_next_instruction() {
    let mut cpu = new_cpu(&[
        0x0050_0093, // addi x1, x0, 5
        0x0050_0113, // addi x2, x0, 5
        0x0020_8463, // beq  x1, x2, +8  (taken: jumps past the next addi)
        0x06f0_0193, // addi x3, x0, 111 (never fetched)
        0x0de0_0213, // addi x4, x0, 222
    ]);
    run_steps(&mut cpu, 4); // addi, addi, beq, addi x4 (addi x3 is skipped)

    assert_eq!(cpu.xregs.read(3), 0);
    assert_eq!(cpu.xregs.read(4), 222);
}

#[test]
fn jalr_links_pre_jump_pc_and_jumps_to_masked_target() {
    let mut cpu = new_cpu(&[
        0x0000_0097, // auipc x1, 0      (x1 = RAM_BASE)
        0x0040_82e7, // jalr  x5, 4(x1)
    ]);
    let link_pc = RAM_BASE + 4; // pc after the auipc, before the jalr
    run_steps(&mut cpu, 2);

    assert_eq!(cpu.xregs.read(5), link_pc + 4);
    assert_eq!(cpu.pc, RAM_BASE + 4);
}
