//! End-to-end scenarios
//!
//! Small programs executed through the real pipeline, plus property suites
//! checking the flag algebra, the misalignment rotates, the FIFO, and the
//! memory round trips against independent oracles.

use crate::cartridge::RomSource;
use crate::core::{test_core, test_rom, Core, CoreConfig};
use crate::cpu::psr;
use crate::scheduler::Task;
use proptest::prelude::*;
use std::path::PathBuf;

/// Place a program in main RAM and run it instruction by instruction
fn run_program(core: &mut Core, id: usize, address: u32, program: &[u32]) {
    for (i, &opcode) in program.iter().enumerate() {
        core.mem_write::<u32>(id, address + (i as u32) * 4, opcode);
    }
    core.cpus[id].regs[15] = address;
    core.flush_pipeline(id);
    for _ in 0..program.len() {
        core.run_opcode(id);
    }
}

fn flags(core: &Core, id: usize) -> (bool, bool, bool, bool) {
    let cpsr = core.cpus[id].cpsr;
    (
        cpsr & psr::N != 0,
        cpsr & psr::Z != 0,
        cpsr & psr::C != 0,
        cpsr & psr::V != 0,
    )
}

fn missing_files_config() -> CoreConfig {
    CoreConfig {
        bios9_path: PathBuf::from("/nonexistent/bios9.bin"),
        bios7_path: PathBuf::from("/nonexistent/bios7.bin"),
        firmware_path: PathBuf::from("/nonexistent/firmware.bin"),
        gba_bios_path: PathBuf::from("/nonexistent/gba_bios.bin"),
        ..CoreConfig::default()
    }
}

// ========== Scenario tests ==========

#[test]
fn test_subs_overflow_scenario() {
    let mut core = test_core();
    run_program(
        &mut core,
        0,
        0x2000000,
        &[
            0xE3A00102, // MOV R0, #0x80000000
            0xE3A01001, // MOV R1, #1
            0xE0502001, // SUBS R2, R0, R1
        ],
    );
    assert_eq!(core.cpus[0].regs[2], 0x7FFFFFFF);
    assert_eq!(flags(&core, 0), (false, false, true, true));
}

#[test]
fn test_lsr_zero_means_32_scenario() {
    let mut core = test_core();
    run_program(
        &mut core,
        0,
        0x2000000,
        &[
            0xE3A0020F, // MOV R0, #0xF0000000
            0xE1B01020, // MOVS R1, R0, LSR #0
        ],
    );
    assert_eq!(core.cpus[0].regs[1], 0);
    let (n, z, c, _) = flags(&core, 0);
    assert!(!n);
    assert!(z);
    assert!(c); // bit 31 of the operand
}

#[test]
fn test_fifo_fill_and_drain_scenario() {
    let mut core = test_core();
    core.mem_write::<u16>(0, 0x4000184, 0x8000); // enable ARM9 send
    core.mem_write::<u16>(1, 0x4000184, 0x8000); // enable ARM7 side

    for word in 0..16u32 {
        core.mem_write::<u32>(0, 0x4000188, 0x1000 + word);
    }
    assert_eq!(core.mem_read::<u16>(0, 0x4000184) & 0x4000, 0);
    core.mem_write::<u32>(0, 0x4000188, 0xDEAD); // 17th write
    assert_ne!(core.mem_read::<u16>(0, 0x4000184) & 0x4000, 0);

    for word in 0..16u32 {
        assert_eq!(core.mem_read::<u32>(1, 0x4100000), 0x1000 + word);
    }
    // Acknowledge the ARM9-side error, then underflow the ARM7 side
    core.mem_write::<u16>(0, 0x4000184, 0xC000);
    assert_eq!(core.mem_read::<u32>(1, 0x4100000), 0x1000 + 15);
    assert_ne!(core.mem_read::<u16>(1, 0x4000184) & 0x4000, 0);
}

#[test]
fn test_vram_overlap_broadcast_scenario() {
    let mut core = test_core();
    core.mem_write::<u8>(0, 0x4000240, 0x81); // bank A -> background plane A, slot 0
    core.mem_write::<u8>(0, 0x4000241, 0x81); // bank B -> background plane A, slot 0

    core.mem_write::<u32>(0, 0x6000000, 0xAABBCCDD);
    assert_eq!(core.mem_read::<u32>(0, 0x6000000), 0xAABBCCDD);
    assert_eq!(core.vram.bank(0)[0], 0xDD);
    assert_eq!(core.vram.bank(1)[0], 0xDD);

    // Distinct values OR together on the shared bus
    core.mem_write::<u8>(0, 0x4000241, 0x00); // unmap bank B
    core.mem_write::<u32>(0, 0x6000000, 0x0F0F0F0F);
    core.mem_write::<u8>(0, 0x4000241, 0x81);
    core.mem_write::<u8>(0, 0x4000240, 0x00);
    core.mem_write::<u32>(0, 0x6000000, 0xF0F0F000);
    core.mem_write::<u8>(0, 0x4000240, 0x81);
    assert_eq!(core.mem_read::<u32>(0, 0x6000000), 0xFFFFFF0F);
}

#[test]
fn test_scheduler_drain_scenario() {
    let mut core = test_core();
    core.scheduler.schedule(Task::NdsScanline256, 100); // E1
    core.scheduler.schedule(Task::NdsScanline355, 50); // E2
    core.scheduler.schedule(Task::NdsSpuSample, 75); // E3

    core.scheduler.global_cycles = 80;
    let mut popped = Vec::new();
    while let Some(task) = core.scheduler.pop_due() {
        popped.push(task);
    }
    assert_eq!(popped, vec![Task::NdsScanline355, Task::NdsSpuSample]);
    assert!(core.scheduler.is_scheduled(Task::NdsScanline256));
    assert_eq!(core.scheduler.next_deadline(), 100);
}

#[test]
fn test_gba_direct_boot_scenario() {
    // A GBA image whose entry is an endless loop
    let mut rom = vec![0u8; 0x4000];
    rom[0..4].copy_from_slice(&0xEAFFFFFEu32.to_le_bytes()); // b .
    let config = CoreConfig {
        gba_rom: Some(RomSource::Buffer(rom)),
        ..missing_files_config()
    };
    let mut core = Core::new(config).unwrap();

    assert!(core.is_gba_mode());
    assert_ne!(core.cpus[0].halted, 0);
    assert_eq!(core.cpus[1].pc(), 0x8000004); // entry + pipeline

    // Exactly the compatibility-mode tasks (plus the rebase sentinel)
    assert!(core.scheduler.is_scheduled(Task::GbaScanline240));
    assert!(core.scheduler.is_scheduled(Task::GbaScanline308));
    assert!(core.scheduler.is_scheduled(Task::GbaSpuSample));
    assert!(core.scheduler.is_scheduled(Task::ResetCycles));
    assert_eq!(core.scheduler.len(), 4);

    // The whole on-chip WRAM block belongs to the ARM7 now
    core.mem_write::<u32>(1, 0x3000000, 0x11223344);
    core.mem_write::<u32>(1, 0x3007FFC, 0x55667788);
    assert_eq!(core.mem_read::<u32>(1, 0x3000000), 0x11223344);
    assert_eq!(core.mem_read::<u32>(1, 0x3007FFC), 0x55667788);

    // And a frame runs to the GBA vblank
    core.run_frame();
    assert_eq!(core.frames(), 1);
    assert_eq!(core.gpu.read_vcount(), 160);
}

// ========== Pipeline and quirk tests ==========

#[test]
fn test_pc_reads_ahead_with_register_shift() {
    let mut core = test_core();
    // AND R2, PC, R0, LSL R1 with R0 = ~0 and R1 = 0: R2 = PC as the
    // shifter saw it, which is the instruction address + 12
    core.cpus[0].regs[0] = 0xFFFFFFFF;
    core.cpus[0].regs[1] = 0;
    run_program(&mut core, 0, 0x2000000, &[0xE00F2110]); // AND R2, PC, R0, LSL R1
    assert_eq!(core.cpus[0].regs[2], 0x2000000 + 12);
}

#[test]
fn test_pc_reads_normal_without_register_shift() {
    let mut core = test_core();
    run_program(&mut core, 0, 0x2000000, &[0xE1A0200F]); // MOV R2, PC
    assert_eq!(core.cpus[0].regs[2], 0x2000000 + 8);
}

#[test]
fn test_rotate_right_extend() {
    let mut core = test_core();
    // MOVS R1, R0, ROR #0 is rotate-right-with-extend
    core.cpus[0].regs[0] = 0x00000001;
    core.cpus[0].cpsr |= psr::C;
    run_program(&mut core, 0, 0x2000000, &[0xE1B01060]); // MOVS R1, R0, RRX
    assert_eq!(core.cpus[0].regs[1], 0x80000000);
    assert!(core.cpus[0].cpsr & psr::C != 0); // carry out = old bit 0
}

#[test]
fn test_misaligned_word_load_rotates() {
    let mut core = test_core();
    core.mem_write::<u32>(0, 0x2000100, 0x11223344);
    core.cpus[0].regs[1] = 0x2000102;
    run_program(&mut core, 0, 0x2000000, &[0xE5912000]); // LDR R2, [R1]
    assert_eq!(core.cpus[0].regs[2], 0x11223344u32.rotate_right(16));
}

#[test]
fn test_arm7_ldrsh_odd_address_quirk() {
    let mut core = test_core();
    core.mem_write::<u16>(1, 0x2000100, 0x80FF);
    core.cpus[1].regs[1] = 0x2000101;
    run_program(&mut core, 1, 0x2000000, &[0xE1D120F0]); // LDRSH R2, [R1]
    // The upper byte shifts in with sign extension
    assert_eq!(core.cpus[1].regs[2], 0xFFFFFF80);

    // The ARM9 is unaffected by the quirk
    core.mem_write::<u16>(0, 0x2000100, 0x80FF);
    core.cpus[0].regs[1] = 0x2000101;
    run_program(&mut core, 0, 0x2000000, &[0xE1D120F0]);
    assert_eq!(core.cpus[0].regs[2], 0xFFFF80FF);
}

#[test]
fn test_block_transfer_writeback_quirks() {
    // ARM9 load with the base mid-list reloads the writeback value
    let mut core = test_core();
    core.mem_write::<u32>(0, 0x2000100, 0xAAAA);
    core.mem_write::<u32>(0, 0x2000104, 0xBBBB);
    core.mem_write::<u32>(0, 0x2000108, 0xCCCC);
    core.cpus[0].regs[1] = 0x2000100;
    run_program(&mut core, 0, 0x2000000, &[0xE8B10013]); // LDMIA R1!, {R0,R1,R4}
    assert_eq!(core.cpus[0].regs[0], 0xAAAA);
    assert_eq!(core.cpus[0].regs[4], 0xCCCC);
    assert_eq!(core.cpus[0].regs[1], 0x200010C); // writeback wins over the load

    // ARM7 store with the base first in the list stores the old base
    let mut core = test_core();
    core.cpus[1].regs[1] = 0x2000200;
    core.cpus[1].regs[2] = 0x12345678;
    run_program(&mut core, 1, 0x2000000, &[0xE8A10006]); // STMIA R1!, {R1,R2}
    assert_eq!(core.mem_read::<u32>(1, 0x2000200), 0x2000200);
    assert_eq!(core.mem_read::<u32>(1, 0x2000204), 0x12345678);

    // ARM7 store with the base second stores the written-back base
    let mut core = test_core();
    core.cpus[1].regs[0] = 0x11111111;
    core.cpus[1].regs[1] = 0x2000300;
    run_program(&mut core, 1, 0x2000000, &[0xE8A10003]); // STMIA R1!, {R0,R1}
    assert_eq!(core.mem_read::<u32>(1, 0x2000304), 0x2000308);
}

#[test]
fn test_saturating_add_sets_sticky_q() {
    let mut core = test_core();
    core.cpus[0].regs[0] = 0x7FFFFFFF;
    core.cpus[0].regs[1] = 0x7FFFFFFF;
    run_program(&mut core, 0, 0x2000000, &[0xE1012050]); // QADD R2, R0, R1
    assert_eq!(core.cpus[0].regs[2], 0x7FFFFFFF);
    assert!(core.cpus[0].cpsr & psr::Q != 0);

    // QDADD clamps the doubling step separately
    core.cpus[0].cpsr &= !psr::Q;
    core.cpus[0].regs[0] = 0;
    core.cpus[0].regs[1] = 0x40000000;
    run_program(&mut core, 0, 0x2000100, &[0xE1412050]); // QDADD R2, R0, R1
    assert_eq!(core.cpus[0].regs[2], 0x7FFFFFFF);
    assert!(core.cpus[0].cpsr & psr::Q != 0);
}

#[test]
fn test_thumb_pipeline_and_branch() {
    let mut core = test_core();
    // Enter THUMB through BX with bit 0 set
    core.cpus[0].regs[0] = 0x2000101;
    run_program(&mut core, 0, 0x2000000, &[0xE12FFF10]); // BX R0
    assert!(core.cpus[0].is_thumb());
    assert_eq!(core.cpus[0].pc(), 0x2000102); // thumb pipeline reads one ahead

    // MOV R1, #42 in THUMB
    core.mem_write::<u16>(0, 0x2000100, 0x212A);
    core.cpus[0].regs[15] = 0x2000100;
    core.flush_pipeline(0);
    core.run_opcode(0);
    assert_eq!(core.cpus[0].regs[1], 42);
}

#[test]
fn test_interrupt_delivery() {
    let mut core = test_core();
    // Unmask the vblank source, both at the controller and in the CPSR
    core.cpus[0].ime = 1;
    core.cpus[0].ie = 1;
    core.cpus[0].cpsr &= !psr::I;
    core.cpus[0].regs[15] = 0x2000000;
    core.mem_write::<u32>(0, 0x2000000, 0xE1A00000); // NOP (MOV R0, R0)
    core.flush_pipeline(0);

    core.send_interrupt(0, 0);
    assert!(core.scheduler.is_scheduled(Task::Arm9Interrupt));

    // Run the scheduled delivery
    core.scheduler.global_cycles = core.scheduler.next_deadline();
    while let Some(task) = core.scheduler.pop_due() {
        let _ = task;
        core.cpu_interrupt(0);
    }
    // HLE BIOS is installed in the test core, so entry goes through the
    // IRQ trampoline: IRQ mode, interrupts off, sentinel return address
    assert_eq!(core.cpus[0].regs[14], 0xFFFF0000);
    assert!(core.cpus[0].cpsr & psr::I != 0);
}

#[test]
fn test_unknown_opcode_advances() {
    let mut core = test_core();
    run_program(&mut core, 0, 0x2000000, &[0xE7F000F0, 0xE3A01001]); // und, MOV R1, #1
    assert_eq!(core.cpus[0].regs[1], 1);
}

#[test]
fn test_dma_immediate_transfer() {
    let mut core = test_core();
    for i in 0..4u32 {
        core.mem_write::<u32>(0, 0x2000100 + i * 4, 0xCAFE0000 + i);
    }
    core.mem_write::<u32>(0, 0x40000B0, 0x2000100); // DMA0SAD
    core.mem_write::<u32>(0, 0x40000B4, 0x2000200); // DMA0DAD
    core.mem_write::<u32>(0, 0x40000B8, 0x84000004); // enable, words, count 4

    core.scheduler.global_cycles = core.scheduler.next_deadline();
    while let Some(task) = core.scheduler.pop_due() {
        if task == Task::Dma9Transfer0 {
            core.dma_transfer(0, 0);
        }
    }
    for i in 0..4u32 {
        assert_eq!(core.mem_read::<u32>(0, 0x2000200 + i * 4), 0xCAFE0000 + i);
    }
    assert_eq!(core.mem_read::<u32>(0, 0x40000B8) & (1 << 31), 0);
}

// ========== Property tests ==========

fn reference_add_flags(a: u32, b: u32, carry_in: u32) -> (u32, bool, bool, bool, bool) {
    let wide = a as u64 + b as u64 + carry_in as u64;
    let res = wide as u32;
    let v = (!(a ^ b) & (a ^ res)) >> 31 == 1;
    (res, res >> 31 == 1, res == 0, wide > 0xFFFFFFFF, v)
}

fn reference_sub_flags(a: u32, b: u32, carry_in: u32) -> (u32, bool, bool, bool, bool) {
    let wide = a as u64 + (!b) as u64 + carry_in as u64;
    let res = wide as u32;
    let v = ((a ^ b) & (a ^ res)) >> 31 == 1;
    (res, res >> 31 == 1, res == 0, wide > 0xFFFFFFFF, v)
}

fn run_flag_op(opcode: u32, a: u32, b: u32, carry_in: bool) -> (u32, (bool, bool, bool, bool)) {
    let mut core = test_core();
    core.cpus[0].regs[0] = a;
    core.cpus[0].regs[1] = b;
    if carry_in {
        core.cpus[0].cpsr |= psr::C;
    }
    run_program(&mut core, 0, 0x2000000, &[opcode]);
    (core.cpus[0].regs[2], flags(&core, 0))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_adds_flags(a: u32, b: u32) {
        let (res, n, z, c, v) = reference_add_flags(a, b, 0);
        let (got, got_flags) = run_flag_op(0xE0902001, a, b, false); // ADDS R2, R0, R1
        prop_assert_eq!(got, res);
        prop_assert_eq!(got_flags, (n, z, c, v));
    }

    #[test]
    fn prop_subs_flags(a: u32, b: u32) {
        let (res, n, z, c, v) = reference_sub_flags(a, b, 1);
        let (got, got_flags) = run_flag_op(0xE0502001, a, b, false); // SUBS R2, R0, R1
        prop_assert_eq!(got, res);
        prop_assert_eq!(got_flags, (n, z, c, v));
    }

    #[test]
    fn prop_adcs_flags(a: u32, b: u32, carry: bool) {
        let (res, n, z, c, v) = reference_add_flags(a, b, carry as u32);
        let (got, got_flags) = run_flag_op(0xE0B02001, a, b, carry); // ADCS R2, R0, R1
        prop_assert_eq!(got, res);
        prop_assert_eq!(got_flags, (n, z, c, v));
    }

    #[test]
    fn prop_sbcs_flags(a: u32, b: u32, carry: bool) {
        let (res, n, z, c, v) = reference_sub_flags(a, b, carry as u32);
        let (got, got_flags) = run_flag_op(0xE0D02001, a, b, carry); // SBCS R2, R0, R1
        prop_assert_eq!(got, res);
        prop_assert_eq!(got_flags, (n, z, c, v));
    }

    #[test]
    fn prop_cmp_cmn_flags(a: u32, b: u32) {
        let (_, n, z, c, v) = reference_sub_flags(a, b, 1);
        let (_, got) = run_flag_op(0xE1500001, a, b, false); // CMP R0, R1
        prop_assert_eq!(got, (n, z, c, v));

        let (_, n, z, c, v) = reference_add_flags(a, b, 0);
        let (_, got) = run_flag_op(0xE1700001, a, b, false); // CMN R0, R1
        prop_assert_eq!(got, (n, z, c, v));
    }

    #[test]
    fn prop_rotate_right_immediate_zero_is_rrx(x: u32, carry: bool) {
        let (got, got_flags) = run_flag_op(0xE1B02060, x, 0, carry); // MOVS R2, R0, RRX
        prop_assert_eq!(got, ((carry as u32) << 31) | (x >> 1));
        prop_assert_eq!(got_flags.2, x & 1 == 1);
    }

    #[test]
    fn prop_register_shift_by_32(x: u32) {
        // LSL by 32: zero result, carry = bit 0
        let (got, f) = movs_with_register_shift(0, x, 32);
        prop_assert_eq!(got, 0);
        prop_assert_eq!(f.2, x & 1 == 1);

        // LSR by 32: zero result, carry = bit 31
        let (got, f) = movs_with_register_shift(1, x, 32);
        prop_assert_eq!(got, 0);
        prop_assert_eq!(f.2, x >> 31 == 1);

        // ASR by 32: sign fill, carry = bit 31
        let (got, f) = movs_with_register_shift(2, x, 32);
        prop_assert_eq!(got, if x >> 31 == 1 { 0xFFFFFFFF } else { 0 });
        prop_assert_eq!(f.2, x >> 31 == 1);
    }

    #[test]
    fn prop_memory_round_trip(offset in 0u32..0x3FFFF0, value: u32) {
        let mut core = test_core();
        let address = 0x2000000 + (offset & !3);
        core.mem_write::<u32>(0, address, value);
        prop_assert_eq!(core.mem_read::<u32>(0, address), value);
        prop_assert_eq!(core.mem_read::<u16>(0, address), value as u16);
        prop_assert_eq!(core.mem_read::<u8>(0, address), value as u8);
    }

    #[test]
    fn prop_misaligned_read_aligns(offset in 0u32..0x3FFFF0, value: u32, misalign in 0u32..4) {
        let mut core = test_core();
        let address = 0x2000000 + (offset & !3);
        core.mem_write::<u32>(0, address, value);
        // The bus aligns down; the CPU applies the rotate on top
        prop_assert_eq!(core.mem_read::<u32>(0, address + misalign), value);
    }

    #[test]
    fn prop_fifo_identity(words in proptest::collection::vec(any::<u32>(), 1..16)) {
        let mut core = test_core();
        core.mem_write::<u16>(0, 0x4000184, 0x8000);
        core.mem_write::<u16>(1, 0x4000184, 0x8000);
        for &word in &words {
            core.mem_write::<u32>(0, 0x4000188, word);
        }
        for &word in &words {
            prop_assert_eq!(core.mem_read::<u32>(1, 0x4100000), word);
        }
    }
}

/// Execute `MOVS R2, R1, <type> R3` with the amount in R3 and return the
/// result with the flags
fn movs_with_register_shift(shift_type: u32, x: u32, amount: u32) -> (u32, (bool, bool, bool, bool)) {
    let opcode = 0xE1B02000 | (3 << 8) | (shift_type << 5) | (1 << 4) | 1;
    let mut core = test_core();
    core.cpus[0].regs[1] = x;
    core.cpus[0].regs[3] = amount;
    run_program(&mut core, 0, 0x2000000, &[opcode]);
    (core.cpus[0].regs[2], flags(&core, 0))
}

// ========== Full-program test ==========

#[test]
fn test_direct_boot_runs_both_cpus() {
    // The ARM9 spins incrementing R0, the ARM7 spins incrementing R1
    let rom = test_rom(
        &[0xE2800001, 0xEAFFFFFD], // ADD R0, R0, #1; B .-4
        &[0xE2811001, 0xEAFFFFFD], // ADD R1, R1, #1; B .-4
    );
    let config = CoreConfig {
        nds_rom: Some(RomSource::Buffer(rom)),
        ..missing_files_config()
    };
    let mut core = Core::new(config).unwrap();
    core.run_frame();

    // Both CPUs made progress, the ARM9 roughly twice as fast
    let arm9_count = core.cpus[0].regs[0];
    let arm7_count = core.cpus[1].regs[1];
    assert!(arm9_count > 0);
    assert!(arm7_count > 0);
    assert!(arm9_count > arm7_count);
}
