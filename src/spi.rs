//! SPI bus
//!
//! The ARM7-side serial bus reaching the firmware flash, the touchscreen
//! controller, and the power manager. The firmware image supplies the boot
//! user settings; its flash answers the standard read command so software
//! probing settings after boot sees real bytes. The other devices answer
//! idle values, their protocols being collaborator territory.

use crate::core::Core;
use std::path::Path;
use tracing::trace;

/// Interrupt source raised when a transfer completes with the IRQ bit set
const IRQ_SPI: u8 = 23;

/// Byte offset of the user settings area in a 256KB firmware image
const USER_SETTINGS: usize = 0x3FE00;

const CNT_IRQ: u16 = 1 << 14;
const CNT_ENABLE: u16 = 1 << 15;
/// Keep-selected bit; clearing it ends the device transaction
const CNT_HOLD: u16 = 1 << 11;

/// Firmware flash command state
#[derive(Debug, Default, Clone, Copy, PartialEq)]
enum FlashState {
    #[default]
    Command,
    Address(u8),
    Reading,
}

pub struct Spi {
    cnt: u16,
    data: u8,
    firmware: Vec<u8>,

    flash_state: FlashState,
    flash_command: u8,
    flash_addr: u32,
}

impl Spi {
    pub fn new() -> Self {
        Spi {
            cnt: 0,
            data: 0,
            firmware: Vec::new(),
            flash_state: FlashState::Command,
            flash_command: 0,
            flash_addr: 0,
        }
    }

    /// Load the firmware image; required unless direct boot can skip it
    pub fn load_firmware(&mut self, path: &Path) -> bool {
        match std::fs::read(path) {
            Ok(data) => {
                self.firmware = data;
                true
            }
            Err(_) => false,
        }
    }

    pub fn read_spi_cnt(&self) -> u16 {
        self.cnt
    }

    pub fn read_spi_data(&self) -> u8 {
        self.data
    }

    pub fn write_spi_cnt(&mut self, mask: u16, value: u16) {
        let mask = mask & 0xCF03;
        self.cnt = (self.cnt & !mask) | (value & mask);
        if self.cnt & CNT_HOLD == 0 {
            self.flash_state = FlashState::Command;
        }
    }

    /// One byte over the bus; device select comes from the control bits
    fn transfer(&mut self, value: u8) -> u8 {
        match (self.cnt >> 8) & 0x3 {
            1 => self.firmware_transfer(value),
            device => {
                // Power manager and touchscreen answer idle
                trace!("SPI transfer to device {}: 0x{:02X}", device, value);
                0
            }
        }
    }

    fn firmware_transfer(&mut self, value: u8) -> u8 {
        match self.flash_state {
            FlashState::Command => {
                self.flash_command = value;
                self.flash_addr = 0;
                self.flash_state = match value {
                    0x03 => FlashState::Address(3),
                    // Status register reads answer "ready" immediately
                    0x05 => FlashState::Reading,
                    _ => {
                        trace!("unhandled firmware command: 0x{:02X}", value);
                        FlashState::Command
                    }
                };
                0
            }
            FlashState::Address(remaining) => {
                self.flash_addr = (self.flash_addr << 8) | value as u32;
                self.flash_state = if remaining == 1 {
                    FlashState::Reading
                } else {
                    FlashState::Address(remaining - 1)
                };
                0
            }
            FlashState::Reading => match self.flash_command {
                0x03 => {
                    let byte = self
                        .firmware
                        .get(self.flash_addr as usize)
                        .copied()
                        .unwrap_or(0);
                    self.flash_addr = self.flash_addr.wrapping_add(1);
                    byte
                }
                _ => 0,
            },
        }
    }
}

impl Default for Spi {
    fn default() -> Self {
        Self::new()
    }
}

impl Core {
    pub(crate) fn spi_write_spi_data(&mut self, value: u8) {
        if self.spi.cnt & CNT_ENABLE == 0 {
            return;
        }
        self.spi.data = self.spi.transfer(value);
        if self.spi.cnt & CNT_HOLD == 0 {
            self.spi.flash_state = FlashState::Command;
        }
        if self.spi.cnt & CNT_IRQ != 0 {
            self.send_interrupt(1, IRQ_SPI);
        }
    }

    /// Place the firmware user settings where the BIOS would leave them
    pub(crate) fn spi_direct_boot(&mut self) {
        for i in 0..0x70 {
            let byte = self.spi.firmware.get(USER_SETTINGS + i).copied().unwrap_or(0);
            self.mem_write::<u8>(0, 0x27FFC80 + i as u32, byte);
        }
    }
}

// ========== State Persistence ==========

impl Spi {
    pub fn save_state(&self, stream: &mut crate::state::StateWriter) {
        stream.write_u16(self.cnt);
        stream.write_u8(self.data);
        stream.write_u8(match self.flash_state {
            FlashState::Command => 0,
            FlashState::Address(n) => n,
            FlashState::Reading => 4,
        });
        stream.write_u8(self.flash_command);
        stream.write_u32(self.flash_addr);
    }

    pub fn load_state(&mut self, stream: &mut crate::state::StateReader) -> Result<(), crate::state::StateError> {
        self.cnt = stream.read_u16()?;
        self.data = stream.read_u8()?;
        self.flash_state = match stream.read_u8()? {
            0 => FlashState::Command,
            n @ 1..=3 => FlashState::Address(n),
            _ => FlashState::Reading,
        };
        self.flash_command = stream.read_u8()?;
        self.flash_addr = stream.read_u32()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_read_command() {
        let mut spi = Spi::new();
        spi.firmware = (0..=255u8).collect();
        spi.write_spi_cnt(0xFFFF, CNT_ENABLE | CNT_HOLD | 0x100);

        spi.data = spi.transfer(0x03);
        for byte in [0u8, 0, 16] {
            spi.data = spi.transfer(byte);
        }
        assert_eq!(spi.transfer(0), 16);
        assert_eq!(spi.transfer(0), 17);
    }

    #[test]
    fn test_deselect_resets_command() {
        let mut spi = Spi::new();
        spi.firmware = vec![0xAB; 32];
        spi.write_spi_cnt(0xFFFF, CNT_ENABLE | CNT_HOLD | 0x100);
        spi.transfer(0x03);
        spi.write_spi_cnt(0xFFFF, CNT_ENABLE | 0x100); // drop hold
        assert_eq!(spi.flash_state, FlashState::Command);
    }
}
