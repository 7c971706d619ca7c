//! Audio sample clock
//!
//! Mixing is a collaborator concern; the core owns the sample cadence (one
//! mixer tick every 1024 cycles in NDS mode, 512 in GBA mode) and a small
//! output buffer the embedder drains from its audio thread. Production is
//! idempotent between frame advances: each scheduled tick appends exactly
//! one stereo sample.

use crate::core::Core;
use crate::scheduler::Task;

/// Upper bound on buffered samples; older samples are dropped first
const BUFFER_LIMIT: usize = 0x8000;

pub struct Spu {
    sound_bias: u16,
    samples: Vec<(i16, i16)>,
}

impl Spu {
    pub fn new() -> Self {
        Spu {
            sound_bias: 0,
            samples: Vec::new(),
        }
    }

    pub fn read_sound_bias(&self) -> u16 {
        self.sound_bias
    }

    pub fn write_sound_bias(&mut self, mask: u16, value: u16) {
        let mask = mask & 0x3FF;
        self.sound_bias = (self.sound_bias & !mask) | (value & mask);
    }

    /// Hand all buffered samples to the embedder
    pub fn drain_samples(&mut self) -> Vec<(i16, i16)> {
        std::mem::take(&mut self.samples)
    }

    fn push_sample(&mut self) {
        if self.samples.len() == BUFFER_LIMIT {
            self.samples.remove(0);
        }
        // Channel mixing is out of core scope; the output stays at bias
        self.samples.push((0, 0));
    }
}

impl Default for Spu {
    fn default() -> Self {
        Self::new()
    }
}

impl Core {
    pub(crate) fn spu_sample(&mut self) {
        self.spu.push_sample();
        self.scheduler.schedule(Task::NdsSpuSample, 512 * 2);
    }

    pub(crate) fn spu_gba_sample(&mut self) {
        self.spu.push_sample();
        self.scheduler.schedule(Task::GbaSpuSample, 512);
    }
}

// ========== State Persistence ==========

impl Spu {
    pub fn save_state(&self, stream: &mut crate::state::StateWriter) {
        stream.write_u16(self.sound_bias);
    }

    pub fn load_state(&mut self, stream: &mut crate::state::StateReader) -> Result<(), crate::state::StateError> {
        self.sound_bias = stream.read_u16()?;
        self.samples.clear();
        Ok(())
    }
}
