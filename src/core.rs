//! Core orchestrator
//!
//! One `Core` owns every component; nothing in the crate holds global
//! state. Components refer to each other through the core itself (methods
//! take the CPU index where one matters), so the single mutable borrow the
//! run loop holds is the only synchronization the emulator needs.
//!
//! The run loop advances whichever CPU owes cycles to the global clock
//! until the next event deadline, then drains every event due at that
//! deadline, and repeats until the frame-end sentinel clears the running
//! flag. The ARM9 runs at the base rate; the ARM7 costs double in NDS mode
//! and runs alone at full rate in GBA mode.

use crate::cartridge::{CartridgeGba, CartridgeNds, RomSource};
use crate::cp15::Cp15;
use crate::cpu::{Bios, Cpu, Dldi};
use crate::div_sqrt::DivSqrt;
use crate::dma::Dma;
use crate::gpu::Gpu;
use crate::gpu3d::Gpu3d;
use crate::input::Input;
use crate::ipc::Ipc;
use crate::memory::Memory;
use crate::rtc::Rtc;
use crate::scheduler::{Scheduler, Task};
use crate::spi::Spi;
use crate::spu::Spu;
use crate::state::{self, StateError, StateReader, StateWriter, STATE_MAGIC, STATE_VERSION};
use crate::timers::Timers;
use crate::vram::Vram;
use std::io::{Read, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Construction failures; a core that failed to build must not be run
#[derive(Debug, Error)]
pub enum CoreError {
    /// A BIOS image is required (no direct boot requested) but missing
    #[error("BIOS image not found")]
    BiosMissing,
    /// The firmware image is required but missing
    #[error("firmware image not found")]
    FirmwareMissing,
    /// A ROM was provided but could not be loaded
    #[error("ROM could not be loaded")]
    RomLoadFailed,
}

/// Boot configuration for a core instance
#[derive(Clone)]
pub struct CoreConfig {
    pub nds_rom: Option<RomSource>,
    pub gba_rom: Option<RomSource>,
    pub bios9_path: PathBuf,
    pub bios7_path: PathBuf,
    pub firmware_path: PathBuf,
    pub gba_bios_path: PathBuf,
    /// Skip the BIOS/firmware boot when a ROM is present
    pub direct_boot: bool,
    /// Instance number, distinguishing cores in multi-instance setups
    pub id: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            nds_rom: None,
            gba_rom: None,
            bios9_path: PathBuf::from("bios9.bin"),
            bios7_path: PathBuf::from("bios7.bin"),
            firmware_path: PathBuf::from("firmware.bin"),
            gba_bios_path: PathBuf::from("gba_bios.bin"),
            direct_boot: true,
            id: 0,
        }
    }
}

/// Which per-frame loop the orchestrator drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    /// Both CPUs interleave on the shared timeline
    DualNds,
    /// One CPU is halted; only the other consumes cycles
    SingleNds(usize),
    /// GBA compatibility mode: the ARM7 runs alone at full rate
    Gba,
    /// Both CPUs halted; time skips from event to event
    Idle,
}

/// The whole emulated system
pub struct Core {
    pub(crate) cpus: [Cpu; 2],
    pub(crate) cp15: Cp15,
    pub(crate) memory: Memory,
    pub(crate) vram: Vram,
    pub(crate) ipc: Ipc,
    pub(crate) scheduler: Scheduler,
    pub(crate) gpu: Gpu,
    pub(crate) gpu3d: Gpu3d,
    pub(crate) spu: Spu,
    pub(crate) timers: [Timers; 2],
    pub(crate) dmas: [Dma; 2],
    pub(crate) div_sqrt: DivSqrt,
    pub(crate) input: Input,
    pub(crate) rtc: Rtc,
    pub(crate) spi: Spi,
    pub(crate) cartridge_nds: CartridgeNds,
    pub(crate) cartridge_gba: CartridgeGba,
    pub(crate) dldi: Dldi,

    pub(crate) gba_mode: bool,
    pub(crate) running: bool,
    frame_done: bool,
    run_mode: RunMode,
    real_gba_bios: bool,
    frames: u64,
    id: u32,
}

impl Core {
    fn bare(id: u32) -> Core {
        Core {
            cpus: [Cpu::new(0), Cpu::new(1)],
            cp15: Cp15::new(),
            memory: Memory::new(),
            vram: Vram::new(),
            ipc: Ipc::new(),
            scheduler: Scheduler::new(),
            gpu: Gpu::new(),
            gpu3d: Gpu3d::new(),
            spu: Spu::new(),
            timers: [Timers::new(), Timers::new()],
            dmas: [Dma::new(0), Dma::new(1)],
            div_sqrt: DivSqrt::new(),
            input: Input::new(),
            rtc: Rtc::new(),
            spi: Spi::new(),
            cartridge_nds: CartridgeNds::new(),
            cartridge_gba: CartridgeGba::new(),
            dldi: Dldi::new(),
            gba_mode: false,
            running: false,
            frame_done: false,
            run_mode: RunMode::DualNds,
            real_gba_bios: false,
            frames: 0,
            id,
        }
    }

    /// Build a core: load system files, schedule the initial tasks, and
    /// boot whatever ROMs the configuration names
    pub fn new(config: CoreConfig) -> Result<Core, CoreError> {
        let mut core = Core::bare(config.id);

        // System files are optional only when a ROM can be direct-booted
        let required = !config.direct_boot
            || (config.nds_rom.is_none() && config.gba_rom.is_none());
        if !core.memory.load_bios9(&config.bios9_path) {
            core.cpus[0].bios = Some(Bios::new());
            if required {
                return Err(CoreError::BiosMissing);
            }
        }
        if !core.memory.load_bios7(&config.bios7_path) {
            core.cpus[1].bios = Some(Bios::new());
            if required {
                return Err(CoreError::BiosMissing);
            }
        }
        if !core.spi.load_firmware(&config.firmware_path) && required {
            return Err(CoreError::FirmwareMissing);
        }
        core.real_gba_bios = core.memory.load_gba_bios(&config.gba_bios_path);

        // Initial tasks for NDS mode; the rebase task is already queued
        core.scheduler.schedule(Task::NdsScanline256, 256 * 6);
        core.scheduler.schedule(Task::NdsScanline355, 355 * 6);
        core.scheduler.schedule(Task::NdsSpuSample, 512 * 2);

        // Initialize the memory maps and CPUs
        core.update_map_arm9(0x00000000, 0xFFFFFFFF);
        core.update_map_arm7(0x00000000, 0xFFFFFFFF);
        core.cpu_init(0);
        core.cpu_init(1);

        if let Some(gba_rom) = &config.gba_rom {
            if !core.cartridge_gba.set_rom(gba_rom) {
                return Err(CoreError::RomLoadFailed);
            }
            core.update_map_arm9(0x08000000, 0x0A000000);
            core.update_map_arm7(0x08000000, 0x0A000000);

            // Without an NDS ROM, direct boot switches modes right away
            if config.direct_boot && config.nds_rom.is_none() {
                core.mem_write::<u16>(0, 0x4000304, 0x8003); // POWCNT1
                core.enter_gba_mode();
            }
        }

        if let Some(nds_rom) = &config.nds_rom {
            if !core.cartridge_nds.set_rom(nds_rom) {
                return Err(CoreError::RomLoadFailed);
            }
            if config.direct_boot {
                core.direct_boot_nds();
            }
        }

        core.update_run();
        info!("core {} ready", core.id);
        Ok(core)
    }

    /// Set registers and memory the way the BIOS and firmware would before
    /// jumping to a ROM's entry points
    fn direct_boot_nds(&mut self) {
        self.cp15_write(1, 0, 0, 0x0005707D); // CP15 control
        self.cp15_write(9, 1, 0, 0x0300000A); // Data TCM base/size
        self.cp15_write(9, 1, 1, 0x00000020); // Instruction TCM size
        self.mem_write::<u8>(0, 0x4000247, 0x03); // WRAMCNT
        self.mem_write::<u8>(0, 0x4000300, 0x01); // POSTFLG (ARM9)
        self.mem_write::<u8>(1, 0x4000300, 0x01); // POSTFLG (ARM7)
        self.mem_write::<u16>(0, 0x4000304, 0x0001); // POWCNT1
        self.mem_write::<u16>(1, 0x4000504, 0x0200); // SOUNDBIAS

        self.mem_write::<u32>(0, 0x27FF800, 0x00001FC2); // Chip ID 1
        self.mem_write::<u32>(0, 0x27FF804, 0x00001FC2); // Chip ID 2
        self.mem_write::<u16>(0, 0x27FF850, 0x5835); // ARM7 BIOS CRC
        self.mem_write::<u16>(0, 0x27FF880, 0x0007); // Message from ARM9 to ARM7
        self.mem_write::<u16>(0, 0x27FF884, 0x0006); // ARM7 boot task
        self.mem_write::<u32>(0, 0x27FFC00, 0x00001FC2); // Copy of chip ID 1
        self.mem_write::<u32>(0, 0x27FFC04, 0x00001FC2); // Copy of chip ID 2
        self.mem_write::<u16>(0, 0x27FFC10, 0x5835); // Copy of ARM7 BIOS CRC
        self.mem_write::<u16>(0, 0x27FFC40, 0x0001); // Boot indicator

        self.cart_direct_boot();
        self.cpu_direct_boot(0);
        self.cpu_direct_boot(1);
        self.spi_direct_boot();
    }

    /// Instance number this core was created with
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Frames completed since construction
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_gba_mode(&self) -> bool {
        self.gba_mode
    }

    pub fn input_mut(&mut self) -> &mut Input {
        &mut self.input
    }

    /// Buffered audio output for the embedder's sound thread to drain
    pub fn drain_audio(&mut self) -> Vec<(i16, i16)> {
        self.spu.drain_samples()
    }

    // ========== Run loops ==========

    /// Pick the per-frame loop for the current CPU and mode state, and
    /// break whatever loop is active so the choice takes effect
    pub(crate) fn update_run(&mut self) {
        self.run_mode = if self.cpus[0].halted != 0 && self.cpus[1].halted != 0 {
            RunMode::Idle
        } else if self.gba_mode {
            RunMode::Gba
        } else if self.cpus[0].halted != 0 {
            RunMode::SingleNds(1)
        } else if self.cpus[1].halted != 0 {
            RunMode::SingleNds(0)
        } else {
            RunMode::DualNds
        };
        self.running = false;
    }

    /// Drive the scheduler until the frame-end sentinel fires
    pub fn run_frame(&mut self) {
        self.frame_done = false;
        while !self.frame_done {
            self.running = true;
            match self.run_mode {
                RunMode::DualNds => self.run_nds_segment(),
                RunMode::SingleNds(id) => self.run_single_segment(id),
                RunMode::Gba => self.run_gba_segment(),
                RunMode::Idle => self.run_idle_segment(),
            }
        }
    }

    /// Both CPUs interleave one opcode at a time; the ARM7 runs at half
    /// the ARM9's rate
    fn run_nds_segment(&mut self) {
        while self.running {
            while self.scheduler.next_deadline() > self.scheduler.global_cycles {
                let global = self.scheduler.global_cycles;
                if self.cpus[0].halted == 0 && global >= self.cpus[0].cycles {
                    let cost = self.run_opcode(0);
                    self.cpus[0].cycles = global.wrapping_add(cost);
                }
                if self.cpus[1].halted == 0 && global >= self.cpus[1].cycles {
                    let cost = self.run_opcode(1) << 1;
                    self.cpus[1].cycles = global.wrapping_add(cost);
                }

                // Count cycles up to the next soonest event
                let arm9 = if self.cpus[0].halted != 0 { u32::MAX } else { self.cpus[0].cycles };
                let arm7 = if self.cpus[1].halted != 0 { u32::MAX } else { self.cpus[1].cycles };
                self.scheduler.global_cycles = arm9.min(arm7);
                if arm9 == u32::MAX && arm7 == u32::MAX {
                    break;
                }
            }
            self.drain_events();
        }
    }

    /// One CPU is halted; the other owns the timeline until something
    /// wakes its sibling (which re-selects the loop)
    fn run_single_segment(&mut self, id: usize) {
        while self.running {
            while self.scheduler.next_deadline() > self.scheduler.global_cycles {
                if self.cpus[id].halted != 0 {
                    break;
                }
                let global = self.scheduler.global_cycles;
                if global >= self.cpus[id].cycles {
                    let cost = self.run_opcode(id) << (id as u32);
                    self.cpus[id].cycles = global.wrapping_add(cost);
                }
                self.scheduler.global_cycles = self.cpus[id].cycles;
            }
            self.drain_events();
        }
    }

    /// GBA compatibility mode: the ARM7 alone at full rate
    fn run_gba_segment(&mut self) {
        while self.running {
            if self.cpus[1].cycles > self.scheduler.global_cycles {
                self.scheduler.global_cycles = self.cpus[1].cycles;
            }
            while self.cpus[1].halted == 0 && self.scheduler.next_deadline() > self.cpus[1].cycles {
                let cost = self.run_opcode(1);
                self.scheduler.global_cycles = self.scheduler.global_cycles.wrapping_add(cost);
                self.cpus[1].cycles = self.scheduler.global_cycles;
            }
            self.drain_events();
        }
    }

    /// Both CPUs halted: time skips from event to event
    fn run_idle_segment(&mut self) {
        while self.running {
            self.drain_events();
        }
    }

    /// Jump to the next deadline and run everything due there
    fn drain_events(&mut self) {
        self.scheduler.global_cycles = self.scheduler.next_deadline();
        while let Some(task) = self.scheduler.pop_due() {
            self.run_task(task);
        }
    }

    /// A peripheral finished the visible frame: break execution and count it
    pub(crate) fn end_frame(&mut self) {
        self.running = false;
        self.frame_done = true;
        self.frames += 1;
    }

    /// Rebase the global cycle counter and every cursor derived from it
    pub(crate) fn reset_cycles(&mut self) {
        let base = self.scheduler.rebase();
        for cpu in &mut self.cpus {
            cpu.reset_cycles(base);
        }
        for timers in &mut self.timers {
            timers.reset_cycles(base);
        }
    }

    /// Dispatch one scheduled task to its component
    fn run_task(&mut self, task: Task) {
        match task {
            Task::ResetCycles => self.reset_cycles(),
            Task::Cart9WordReady => self.cart_word_ready(0),
            Task::Cart7WordReady => self.cart_word_ready(1),
            Task::Dma9Transfer0 => self.dma_transfer(0, 0),
            Task::Dma9Transfer1 => self.dma_transfer(0, 1),
            Task::Dma9Transfer2 => self.dma_transfer(0, 2),
            Task::Dma9Transfer3 => self.dma_transfer(0, 3),
            Task::Dma7Transfer0 => self.dma_transfer(1, 0),
            Task::Dma7Transfer1 => self.dma_transfer(1, 1),
            Task::Dma7Transfer2 => self.dma_transfer(1, 2),
            Task::Dma7Transfer3 => self.dma_transfer(1, 3),
            Task::NdsScanline256 => self.gpu_scanline256(),
            Task::NdsScanline355 => self.gpu_scanline355(),
            Task::GbaScanline240 => self.gpu_gba_scanline240(),
            Task::GbaScanline308 => self.gpu_gba_scanline308(),
            Task::Arm9Interrupt => self.cpu_interrupt(0),
            Task::Arm7Interrupt => self.cpu_interrupt(1),
            Task::NdsSpuSample => self.spu_sample(),
            Task::GbaSpuSample => self.spu_gba_sample(),
            Task::Timer9Overflow0 => self.timer_overflow(0, 0),
            Task::Timer9Overflow1 => self.timer_overflow(0, 1),
            Task::Timer9Overflow2 => self.timer_overflow(0, 2),
            Task::Timer9Overflow3 => self.timer_overflow(0, 3),
            Task::Timer7Overflow0 => self.timer_overflow(1, 0),
            Task::Timer7Overflow1 => self.timer_overflow(1, 1),
            Task::Timer7Overflow2 => self.timer_overflow(1, 2),
            Task::Timer7Overflow3 => self.timer_overflow(1, 3),
        }
    }

    // ========== GBA compatibility mode ==========

    /// Halt the ARM9, rebuild the single-CPU memory layout, and queue the
    /// compatibility-mode task set
    pub fn enter_gba_mode(&mut self) {
        debug!("entering GBA mode");
        self.gba_mode = true;
        self.halt_cpu(0, 2);
        self.update_run();

        // Replace the task set with the GBA cadence
        self.scheduler.clear();
        self.scheduler.schedule(Task::GbaScanline240, 240 * 4);
        self.scheduler.schedule(Task::GbaScanline308, 308 * 4);
        self.scheduler.schedule(Task::GbaSpuSample, 512);

        // Reset the ARM7 side of the system for the single-CPU layout
        self.update_map_arm7(0x00000000, 0xFFFFFFFF);
        self.cpu_init(1);
        self.rtc.reset();

        // VRAM blocks A and B in plain access mode back the GBA borders
        self.mem_write::<u8>(0, 0x4000240, 0x80); // VRAMCNT_A
        self.mem_write::<u8>(0, 0x4000241, 0x80); // VRAMCNT_B

        // A real BIOS boots itself; otherwise HLE boots the ROM directly
        if self.real_gba_bios {
            self.cpus[1].bios = None;
            return;
        }
        self.cpus[1].bios = Some(Bios::new());
        self.cpu_direct_boot(1);
        self.mem_write::<u16>(1, 0x4000088, 0x200); // SOUNDBIAS
    }

    // ========== State Persistence ==========

    /// Serialize every component as a version-framed snapshot
    pub fn save_state(&self, writer: &mut impl Write) -> Result<(), StateError> {
        writer.write_all(&STATE_MAGIC)?;
        writer.write_all(&STATE_VERSION.to_le_bytes())?;

        let mut header = StateWriter::new();
        header.write_u8(self.gba_mode as u8);
        header.write_u8(self.real_gba_bios as u8);
        header.write_u64(self.frames);
        state::write_section(writer, header)?;

        let mut sections: Vec<StateWriter> = Vec::new();
        let mut section = StateWriter::new();
        self.memory.save_state(&mut section);
        sections.push(section);
        let mut section = StateWriter::new();
        self.vram.save_state(&mut section);
        sections.push(section);
        for cpu in &self.cpus {
            let mut section = StateWriter::new();
            cpu.save_state(&mut section);
            sections.push(section);
        }
        let mut section = StateWriter::new();
        self.cp15.save_state(&mut section);
        sections.push(section);
        let mut section = StateWriter::new();
        self.ipc.save_state(&mut section);
        sections.push(section);
        let mut section = StateWriter::new();
        self.scheduler.save_state(&mut section);
        sections.push(section);
        let mut section = StateWriter::new();
        self.gpu.save_state(&mut section);
        sections.push(section);
        let mut section = StateWriter::new();
        self.gpu3d.save_state(&mut section);
        sections.push(section);
        let mut section = StateWriter::new();
        self.spu.save_state(&mut section);
        sections.push(section);
        for timers in &self.timers {
            let mut section = StateWriter::new();
            timers.save_state(&mut section);
            sections.push(section);
        }
        for dma in &self.dmas {
            let mut section = StateWriter::new();
            dma.save_state(&mut section);
            sections.push(section);
        }
        let mut section = StateWriter::new();
        self.div_sqrt.save_state(&mut section);
        sections.push(section);
        let mut section = StateWriter::new();
        self.input.save_state(&mut section);
        sections.push(section);
        let mut section = StateWriter::new();
        self.rtc.save_state(&mut section);
        sections.push(section);
        let mut section = StateWriter::new();
        self.spi.save_state(&mut section);
        sections.push(section);
        let mut section = StateWriter::new();
        self.cartridge_nds.save_state(&mut section);
        sections.push(section);
        let mut section = StateWriter::new();
        self.cartridge_gba.save_state(&mut section);
        sections.push(section);

        for section in sections {
            state::write_section(writer, section)?;
        }
        Ok(())
    }

    /// Restore a snapshot. The whole stream is read and its framing
    /// verified before any component state changes, so a rejected load
    /// leaves the core untouched.
    pub fn load_state(&mut self, reader: &mut impl Read) -> Result<(), StateError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        if data.len() < 6 || data[..4] != STATE_MAGIC {
            return Err(StateError::VersionMismatch);
        }
        if u16::from_le_bytes(data[4..6].try_into().unwrap()) != STATE_VERSION {
            return Err(StateError::VersionMismatch);
        }

        let sections = state::read_sections(&data[6..])?;
        if sections.len() != 21 {
            return Err(StateError::Corrupt);
        }
        let mut iter = sections.into_iter().map(StateReader::new);
        let mut next = || iter.next().ok_or(StateError::Corrupt);

        let mut header = next()?;
        self.gba_mode = header.read_u8()? != 0;
        self.real_gba_bios = header.read_u8()? != 0;
        self.frames = header.read_u64()?;

        self.memory.load_state(&mut next()?)?;
        self.vram.load_state(&mut next()?)?;
        self.cpus[0].load_state(&mut next()?)?;
        self.cpus[1].load_state(&mut next()?)?;
        self.cp15_load_state(&mut next()?)?;
        self.ipc.load_state(&mut next()?)?;
        self.scheduler.load_state(&mut next()?)?;
        self.gpu.load_state(&mut next()?)?;
        self.gpu3d.load_state(&mut next()?)?;
        self.spu.load_state(&mut next()?)?;
        self.timers[0].load_state(&mut next()?)?;
        self.timers[1].load_state(&mut next()?)?;
        self.dmas[0].load_state(&mut next()?)?;
        self.dmas[1].load_state(&mut next()?)?;
        self.div_sqrt.load_state(&mut next()?)?;
        self.input.load_state(&mut next()?)?;
        self.rtc.load_state(&mut next()?)?;
        self.spi.load_state(&mut next()?)?;
        self.cartridge_nds.load_state(&mut next()?)?;
        self.cartridge_gba.load_state(&mut next()?)?;

        // Rebuild everything derived from the loaded registers
        self.update_map_arm9(0x00000000, 0xFFFFFFFF);
        self.update_map_arm7(0x00000000, 0xFFFFFFFF);
        self.update_run();
        Ok(())
    }
}

// ========== Test support ==========

/// A bare core with mapped memory and initialized CPUs, no files involved
#[cfg(test)]
pub(crate) fn test_core() -> Core {
    let mut core = Core::bare(0);
    core.cpus[0].bios = Some(Bios::new());
    core.cpus[1].bios = Some(Bios::new());
    core.memory.bios9[3] = 0xFF;
    core.memory.bios7[3] = 0xFF;
    core.update_map_arm9(0x00000000, 0xFFFFFFFF);
    core.update_map_arm7(0x00000000, 0xFFFFFFFF);
    core.cpu_init(0);
    core.cpu_init(1);
    core
}

/// Build a minimal bootable NDS ROM image: a header pointing both CPUs at
/// their code blobs in main RAM
#[cfg(test)]
pub(crate) fn test_rom(arm9_code: &[u32], arm7_code: &[u32]) -> Vec<u8> {
    let arm9_offset = 0x200u32;
    let arm7_offset = arm9_offset + (arm9_code.len() as u32) * 4;
    let mut rom = vec![0u8; arm7_offset as usize + arm7_code.len() * 4];

    let mut field = |offset: usize, value: u32| {
        rom[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    };
    field(0x20, arm9_offset); // ARM9 ROM offset
    field(0x24, 0x2000000); // ARM9 entry
    field(0x28, 0x2000000); // ARM9 load address
    field(0x2C, (arm9_code.len() as u32) * 4); // ARM9 size
    field(0x30, arm7_offset); // ARM7 ROM offset
    field(0x34, 0x2380000); // ARM7 entry
    field(0x38, 0x2380000); // ARM7 load address
    field(0x3C, (arm7_code.len() as u32) * 4); // ARM7 size

    for (i, &word) in arm9_code.iter().enumerate() {
        let base = arm9_offset as usize + i * 4;
        rom[base..base + 4].copy_from_slice(&word.to_le_bytes());
    }
    for (i, &word) in arm7_code.iter().enumerate() {
        let base = arm7_offset as usize + i * 4;
        rom[base..base + 4].copy_from_slice(&word.to_le_bytes());
    }
    rom
}
