//! Timer block
//!
//! Four channels per CPU with prescalers of 1/64/256/1024 bus cycles and a
//! count-up cascade. Overflows are scheduled ahead of time on the global
//! timeline; nothing is ever cancelled, a fired event simply re-checks that
//! its deadline still matches the channel state and becomes a no-op when a
//! register write rescheduled it. The global counter runs at twice the bus
//! clock, hence the extra shift in every conversion.

use crate::core::Core;
use crate::scheduler::Task;

/// First timer interrupt source; channel N raises source 3+N
const IRQ_TIMER0: u8 = 3;

const CNT_COUNT_UP: u16 = 1 << 2;
const CNT_IRQ: u16 = 1 << 6;
const CNT_START: u16 = 1 << 7;

#[derive(Default, Clone, Copy)]
struct Timer {
    reload: u16,
    /// Counter value captured when the channel last (re)started or overflowed
    counter: u16,
    control: u16,
    /// Global cycle the capture was taken at
    start_cycles: u32,
    /// Global cycle of the pending overflow event; fired events compare
    /// against this to detect staleness
    end_cycles: u32,
}

impl Timer {
    fn prescaler_shift(&self) -> u32 {
        match self.control & 0x3 {
            0 => 0,
            1 => 6,
            2 => 8,
            _ => 10,
        }
    }

    fn running(&self) -> bool {
        self.control & CNT_START != 0
    }

    fn count_up(&self) -> bool {
        self.control & CNT_COUNT_UP != 0
    }
}

/// One CPU's four timer channels
pub struct Timers {
    channels: [Timer; 4],
}

impl Timers {
    pub fn new() -> Self {
        Timers { channels: [Timer::default(); 4] }
    }

    pub fn read_cnt_h(&self, channel: usize) -> u16 {
        self.channels[channel].control
    }

    /// Adjust the stored cycle marks for a global rebase
    pub(crate) fn reset_cycles(&mut self, global_cycles: u32) {
        for channel in &mut self.channels {
            channel.start_cycles = channel.start_cycles.saturating_sub(global_cycles);
            channel.end_cycles = channel.end_cycles.saturating_sub(global_cycles);
        }
    }
}

impl Default for Timers {
    fn default() -> Self {
        Self::new()
    }
}

impl Core {
    /// Current counter value, extrapolated from the capture point while the
    /// channel ticks on its own prescaler
    pub(crate) fn timer_read_counter(&mut self, cpu: usize, channel: usize) -> u16 {
        let timer = &self.timers[cpu].channels[channel];
        if !timer.running() || timer.count_up() {
            return timer.counter;
        }
        let elapsed = self.scheduler.global_cycles.wrapping_sub(timer.start_cycles);
        timer.counter.wrapping_add((elapsed >> (timer.prescaler_shift() + 1)) as u16)
    }

    /// TMCNT_L sets the reload value applied at the next start or overflow
    pub(crate) fn timer_write_cnt_l(&mut self, cpu: usize, channel: usize, mask: u16, value: u16) {
        let timer = &mut self.timers[cpu].channels[channel];
        timer.reload = (timer.reload & !mask) | (value & mask);
    }

    /// TMCNT_H starts/stops the channel and reschedules its overflow
    pub(crate) fn timer_write_cnt_h(&mut self, cpu: usize, channel: usize, mask: u16, value: u16) {
        // Latch the live counter before the control bits change
        let counter = self.timer_read_counter(cpu, channel);
        let global = self.scheduler.global_cycles;
        let timer = &mut self.timers[cpu].channels[channel];
        timer.counter = counter;

        let was_running = timer.running();
        let mask = mask & 0x00C7;
        timer.control = (timer.control & !mask) | (value & mask);

        if timer.running() && !was_running {
            timer.counter = timer.reload;
        }
        timer.start_cycles = global;

        if timer.running() && !timer.count_up() {
            self.timer_schedule_overflow(cpu, channel);
        } else {
            // A pending event no longer matches and will fizzle
            self.timers[cpu].channels[channel].end_cycles = 0;
        }
    }

    fn timer_schedule_overflow(&mut self, cpu: usize, channel: usize) {
        let global = self.scheduler.global_cycles;
        let timer = &mut self.timers[cpu].channels[channel];
        let remaining = (0x10000 - timer.counter as u32) << (timer.prescaler_shift() + 1);
        timer.end_cycles = global.wrapping_add(remaining);
        self.scheduler.schedule(Task::timer_overflow(cpu, channel), remaining);
    }

    /// Scheduled overflow entry; stale events fail the deadline check
    pub(crate) fn timer_overflow(&mut self, cpu: usize, channel: usize) {
        let timer = &self.timers[cpu].channels[channel];
        if !timer.running() || timer.count_up() || timer.end_cycles != self.scheduler.global_cycles {
            return;
        }
        self.timer_overflow_now(cpu, channel);
    }

    fn timer_overflow_now(&mut self, cpu: usize, channel: usize) {
        let global = self.scheduler.global_cycles;
        let timer = &mut self.timers[cpu].channels[channel];
        timer.counter = timer.reload;
        timer.start_cycles = global;
        let irq = timer.control & CNT_IRQ != 0;
        let cascade = !timer.count_up();

        if cascade {
            self.timer_schedule_overflow(cpu, channel);
        }
        if irq {
            self.send_interrupt(cpu, IRQ_TIMER0 + channel as u8);
        }

        // Feed the next channel when it counts up
        if channel < 3 {
            let next = &mut self.timers[cpu].channels[channel + 1];
            if next.running() && next.count_up() {
                next.counter = next.counter.wrapping_add(1);
                if next.counter == 0 {
                    self.timer_overflow_now(cpu, channel + 1);
                }
            }
        }
    }
}

// ========== State Persistence ==========

impl Timers {
    pub fn save_state(&self, stream: &mut crate::state::StateWriter) {
        for timer in &self.channels {
            stream.write_u16(timer.reload);
            stream.write_u16(timer.counter);
            stream.write_u16(timer.control);
            stream.write_u32(timer.start_cycles);
            stream.write_u32(timer.end_cycles);
        }
    }

    pub fn load_state(&mut self, stream: &mut crate::state::StateReader) -> Result<(), crate::state::StateError> {
        for timer in &mut self.channels {
            timer.reload = stream.read_u16()?;
            timer.counter = stream.read_u16()?;
            timer.control = stream.read_u16()?;
            timer.start_cycles = stream.read_u32()?;
            timer.end_cycles = stream.read_u32()?;
        }
        Ok(())
    }
}
