//! High-level-emulated BIOS
//!
//! When no BIOS image is found, the image is replaced by a sentinel opcode
//! at its canonical return address and exceptions are redirected here.
//! Software interrupts resume past the trapping instruction after the
//! host-side body runs; hardware interrupts take the same path a real BIOS
//! would: registers pushed to the IRQ stack, a jump through the user
//! handler pointer at the top of the DTCM (or its ARM7 mirror), and a
//! return to the sentinel, which the reserved-predicate router recognizes
//! and unwinds.
//!
//! Only a small set of software-interrupt bodies is emulated; the rest log
//! and return with registers untouched.

use super::psr;
use crate::core::Core;
use tracing::warn;

/// Host-side BIOS state for one CPU
#[derive(Default)]
pub struct Bios {
    /// Interrupt flags an IntrWait call is blocked on
    wait_flags: Option<u32>,
}

impl Bios {
    pub fn new() -> Self {
        Bios::default()
    }

    fn should_check(&self) -> bool {
        self.wait_flags.is_some()
    }

    pub fn save_state(&self, stream: &mut crate::state::StateWriter) {
        match self.wait_flags {
            Some(flags) => {
                stream.write_u8(1);
                stream.write_u32(flags);
            }
            None => {
                stream.write_u8(0);
                stream.write_u32(0);
            }
        }
    }

    pub fn load_state(&mut self, stream: &mut crate::state::StateReader) -> Result<(), crate::state::StateError> {
        let waiting = stream.read_u8()? != 0;
        let flags = stream.read_u32()?;
        self.wait_flags = waiting.then_some(flags);
        Ok(())
    }
}

/// Address of the BIOS interrupt-wait flags for a CPU
fn wait_flag_addr(core: &Core, id: usize) -> u32 {
    if id == 1 { 0x3FFFFF8 } else { core.cp15.dtcm_addr + 0x3FF8 }
}

/// Address of the user interrupt handler pointer for a CPU
fn handler_addr(core: &Core, id: usize) -> u32 {
    if id == 1 { 0x3FFFFFC } else { core.cp15.dtcm_addr + 0x3FFC }
}

impl Core {
    /// Exception entry with HLE BIOS enabled
    pub(super) fn bios_execute(&mut self, id: usize, vector: u8) -> u32 {
        match vector {
            0x08 => self.hle_swi(id),
            0x18 => self.handle_hle_irq(id),
            _ => {
                warn!("unhandled ARM{} HLE exception vector: 0x{:X}", if id == 0 { 9 } else { 7 }, vector);
                3
            }
        }
    }

    /// Enter the IRQ handler the way the BIOS stub does: push the scratch
    /// registers, point the return at the sentinel opcode, and jump through
    /// the user handler pointer
    pub(crate) fn handle_hle_irq(&mut self, id: usize) -> u32 {
        let cpsr = self.cpus[id].cpsr;
        self.set_cpsr(id, (cpsr & !0x3F) | psr::I | 0x12, true);
        let spsr = self.cpus[id].spsr().unwrap_or(0);
        let return_addr = self.cpus[id].regs[15]
            .wrapping_add(if spsr & psr::T != 0 { 2 } else { 0 });
        self.cpus[id].regs[14] = return_addr;
        self.op_stm(id, (13 << 16) | 0x500F, true, false, true, false); // stmdb sp!, {r0-r3,r12,r14}

        self.cpus[id].regs[14] = if id == 1 { 0x00000000 } else { 0xFFFF0000 };
        let handler = handler_addr(self, id);
        self.cpus[id].regs[15] = self.mem_read::<u32>(id, handler);
        self.flush_pipeline(id);
        3
    }

    /// The sentinel opcode was reached: unwind the HLE IRQ entry
    pub(super) fn finish_hle_irq(&mut self, id: usize) -> u32 {
        // Update the wait flags if in the middle of an HLE IntrWait call
        if self.cpus[id].bios.as_ref().is_some_and(|bios| bios.should_check()) {
            self.check_wait_flags(id);
        }

        self.op_ldm(id, (13 << 16) | 0x500F, false, true, true, false); // ldmia sp!, {r0-r3,r12,r14}
        let cpu = &mut self.cpus[id];
        cpu.regs[15] = cpu.regs[14].wrapping_sub(4);
        if let Some(spsr) = self.cpus[id].spsr() {
            self.set_cpsr(id, spsr, false);
        }
        self.flush_pipeline(id);
        3
    }

    /// Compare the BIOS interrupt flags with the wait mask; either finish
    /// the wait and consume the flags, or put the CPU back to sleep
    fn check_wait_flags(&mut self, id: usize) {
        let Some(wait) = self.cpus[id].bios.as_ref().and_then(|bios| bios.wait_flags) else {
            return;
        };
        let address = wait_flag_addr(self, id);
        let flags = self.mem_read::<u32>(id, address);
        if flags & wait != 0 {
            self.mem_write::<u32>(id, address, flags & !wait);
            if let Some(bios) = self.cpus[id].bios.as_mut() {
                bios.wait_flags = None;
            }
        } else {
            self.halt_cpu(id, 0);
        }
    }

    /// Software-interrupt dispatch; the call number lives in the trapping
    /// instruction, which sits one slot behind the adjusted program counter
    fn hle_swi(&mut self, id: usize) -> u32 {
        let thumb = self.cpus[id].is_thumb();
        let pc = self.cpus[id].regs[15];
        let number = if thumb {
            self.mem_read::<u8>(id, pc)
        } else {
            self.mem_read::<u8>(id, pc.wrapping_sub(2))
        };

        // Resume past the trap before running the body
        self.cpus[id].regs[15] = pc.wrapping_add(4);

        match number {
            0x04 => self.swi_intr_wait(id),
            0x05 => {
                // VBlankIntrWait is IntrWait on the vblank source
                self.cpus[id].regs[0] = 1;
                self.cpus[id].regs[1] = 1;
                self.swi_intr_wait(id);
            }
            0x06 => self.halt_cpu(id, 0),
            0x09 => self.swi_div(id),
            0x0B => self.swi_cpu_set(id),
            0x0C => self.swi_cpu_fast_set(id),
            0x0D => {
                let value = self.cpus[id].regs[0];
                self.cpus[id].regs[0] = isqrt(value);
            }
            _ => warn!(
                "unimplemented ARM{} HLE BIOS call: 0x{:02X}",
                if id == 0 { 9 } else { 7 },
                number
            ),
        }
        3
    }

    fn swi_intr_wait(&mut self, id: usize) {
        let discard = self.cpus[id].regs[0] != 0;
        let wait = self.cpus[id].regs[1];
        let address = wait_flag_addr(self, id);
        if discard {
            // Throw away already-pending flags and wait for fresh ones
            let flags = self.mem_read::<u32>(id, address);
            self.mem_write::<u32>(id, address, flags & !wait);
        }
        if let Some(bios) = self.cpus[id].bios.as_mut() {
            bios.wait_flags = Some(wait);
        }
        // The call implies master enable and sleeps until delivery
        self.cpus[id].ime = 1;
        self.halt_cpu(id, 0);
        self.check_wait_flags(id);
    }

    fn swi_div(&mut self, id: usize) {
        let numer = self.cpus[id].regs[0] as i32;
        let denom = self.cpus[id].regs[1] as i32;
        if denom == 0 {
            warn!("HLE BIOS division by zero");
            return;
        }
        let quotient = numer.wrapping_div(denom);
        self.cpus[id].regs[0] = quotient as u32;
        self.cpus[id].regs[1] = numer.wrapping_rem(denom) as u32;
        self.cpus[id].regs[3] = quotient.unsigned_abs();
    }

    fn swi_cpu_set(&mut self, id: usize) {
        let mut source = self.cpus[id].regs[0];
        let mut dest = self.cpus[id].regs[1];
        let control = self.cpus[id].regs[2];
        let count = control & 0x1FFFFF;
        let fill = control & (1 << 24) != 0;
        let words = control & (1 << 26) != 0;

        let step = if words { 4 } else { 2 };
        let fill_value = if words {
            self.mem_read::<u32>(id, source)
        } else {
            self.mem_read::<u16>(id, source) as u32
        };
        for _ in 0..count {
            let value = if fill {
                fill_value
            } else {
                let value = if words {
                    self.mem_read::<u32>(id, source)
                } else {
                    self.mem_read::<u16>(id, source) as u32
                };
                source = source.wrapping_add(step);
                value
            };
            if words {
                self.mem_write::<u32>(id, dest, value);
            } else {
                self.mem_write::<u16>(id, dest, value as u16);
            }
            dest = dest.wrapping_add(step);
        }
    }

    fn swi_cpu_fast_set(&mut self, id: usize) {
        let mut source = self.cpus[id].regs[0];
        let mut dest = self.cpus[id].regs[1];
        let control = self.cpus[id].regs[2];
        let count = control & 0x1FFFFF;
        let fill = control & (1 << 24) != 0;

        let fill_value = self.mem_read::<u32>(id, source);
        for _ in 0..count {
            let value = if fill {
                fill_value
            } else {
                let value = self.mem_read::<u32>(id, source);
                source = source.wrapping_add(4);
                value
            };
            self.mem_write::<u32>(id, dest, value);
            dest = dest.wrapping_add(4);
        }
    }
}

fn isqrt(value: u32) -> u32 {
    let mut result = 0u32;
    let mut bit = 1u32 << 30;
    let mut remainder = value;
    while bit > remainder {
        bit >>= 2;
    }
    while bit != 0 {
        if remainder >= result + bit {
            remainder -= result + bit;
            result = (result >> 1) + bit;
        } else {
            result >>= 1;
        }
        bit >>= 2;
    }
    result
}
