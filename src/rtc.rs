//! Real-time clock port
//!
//! The core carries the RTC's bus-facing latches: the serial register the
//! ARM7 bit-bangs, and in GBA mode the cartridge GPIO trio. The GPIO
//! direction latch doubles as the gate that pulls the first ROM page out of
//! the memory map so the port becomes addressable. Calendar bookkeeping is
//! a collaborator concern.

use tracing::trace;

pub struct Rtc {
    rtc: u8,
    gp_data: u16,
    gp_direction: u16,
    gp_control: u16,
}

impl Rtc {
    pub fn new() -> Self {
        Rtc {
            rtc: 0,
            gp_data: 0,
            gp_direction: 0,
            gp_control: 0,
        }
    }

    pub fn reset(&mut self) {
        self.rtc = 0;
        self.gp_data = 0;
        self.gp_direction = 0;
        self.gp_control = 0;
    }

    pub fn read_rtc(&self) -> u8 {
        self.rtc
    }

    /// Serial interface latch; the clock/select lines echo back
    pub fn write_rtc(&mut self, value: u8) {
        trace!("RTC serial write: 0x{:02X}", value);
        self.rtc = value & 0x77;
    }

    pub fn read_gp_data(&self) -> u16 {
        self.gp_data
    }

    pub fn write_gp_data(&mut self, mask: u16, value: u16) {
        let mask = mask & 0xF;
        self.gp_data = (self.gp_data & !mask) | (value & mask);
    }

    pub fn read_gp_direction(&self) -> u16 {
        self.gp_direction
    }

    pub fn write_gp_direction(&mut self, mask: u16, value: u16) {
        let mask = mask & 0xF;
        self.gp_direction = (self.gp_direction & !mask) | (value & mask);
    }

    /// Whether the GPIO port is mapped over the ROM
    pub fn gp_control(&self) -> bool {
        self.gp_control & 1 != 0
    }

    pub fn read_gp_control(&self) -> u16 {
        self.gp_control
    }

    pub fn write_gp_control(&mut self, mask: u16, value: u16) {
        let mask = mask & 0x1;
        self.gp_control = (self.gp_control & !mask) | (value & mask);
    }
}

impl Default for Rtc {
    fn default() -> Self {
        Self::new()
    }
}

// ========== State Persistence ==========

impl Rtc {
    pub fn save_state(&self, stream: &mut crate::state::StateWriter) {
        stream.write_u8(self.rtc);
        stream.write_u16(self.gp_data);
        stream.write_u16(self.gp_direction);
        stream.write_u16(self.gp_control);
    }

    pub fn load_state(&mut self, stream: &mut crate::state::StateReader) -> Result<(), crate::state::StateError> {
        self.rtc = stream.read_u8()?;
        self.gp_data = stream.read_u16()?;
        self.gp_direction = stream.read_u16()?;
        self.gp_control = stream.read_u16()?;
        Ok(())
    }
}
