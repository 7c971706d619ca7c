//! Event scheduler
//!
//! A single sorted queue of upcoming peripheral actions drives all timing.
//! Deadlines are absolute values of a monotonic cycle counter that both CPUs
//! and every peripheral share. The counter is 32-bit, so a self-scheduled
//! `ResetCycles` task periodically rebases everything near the 31-bit
//! boundary to keep deadlines from wrapping.

/// Tasks that can be scheduled against the global cycle counter.
///
/// Each variant maps to one dispatch arm in `Core::run_task`; peripherals
/// that need to cancel a pending task instead re-check their preconditions
/// when it fires, so a stale task is a safe no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Task {
    ResetCycles = 0,
    Cart9WordReady,
    Cart7WordReady,
    Dma9Transfer0,
    Dma9Transfer1,
    Dma9Transfer2,
    Dma9Transfer3,
    Dma7Transfer0,
    Dma7Transfer1,
    Dma7Transfer2,
    Dma7Transfer3,
    NdsScanline256,
    NdsScanline355,
    GbaScanline240,
    GbaScanline308,
    Arm9Interrupt,
    Arm7Interrupt,
    NdsSpuSample,
    GbaSpuSample,
    Timer9Overflow0,
    Timer9Overflow1,
    Timer9Overflow2,
    Timer9Overflow3,
    Timer7Overflow0,
    Timer7Overflow1,
    Timer7Overflow2,
    Timer7Overflow3,
}

pub const TASK_COUNT: usize = Task::Timer7Overflow3 as usize + 1;

impl Task {
    /// Interrupt delivery task for the given CPU (0 = ARM9, 1 = ARM7)
    pub fn interrupt(cpu: usize) -> Task {
        if cpu == 0 { Task::Arm9Interrupt } else { Task::Arm7Interrupt }
    }

    /// Cartridge word-ready task for the given CPU
    pub fn cart_word_ready(cpu: usize) -> Task {
        if cpu == 0 { Task::Cart9WordReady } else { Task::Cart7WordReady }
    }

    /// DMA transfer task for the given CPU and channel
    pub fn dma_transfer(cpu: usize, channel: usize) -> Task {
        let base = if cpu == 0 { Task::Dma9Transfer0 } else { Task::Dma7Transfer0 };
        Task::from_id(base as u8 + channel as u8).unwrap()
    }

    /// Timer overflow task for the given CPU and channel
    pub fn timer_overflow(cpu: usize, channel: usize) -> Task {
        let base = if cpu == 0 { Task::Timer9Overflow0 } else { Task::Timer7Overflow0 };
        Task::from_id(base as u8 + channel as u8).unwrap()
    }

    /// Recover a task from its serialized id
    pub fn from_id(id: u8) -> Option<Task> {
        if (id as usize) < TASK_COUNT {
            // Task is repr(u8) with densely packed discriminants
            Some(unsafe { std::mem::transmute::<u8, Task>(id) })
        } else {
            None
        }
    }
}

/// A queued task with an absolute deadline on the global cycle counter
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub task: Task,
    pub cycles: u32,
}

/// The shared timeline: the global cycle counter plus the sorted event queue
pub struct Scheduler {
    /// Queued events, sorted by deadline ascending
    events: Vec<Event>,
    /// Monotonic cycle counter; all queued deadlines are >= this value
    pub global_cycles: u32,
}

/// Deadline used for the self-scheduled rebase task
pub const RESET_CYCLES_DEADLINE: u32 = 0x7FFFFFFF;

impl Scheduler {
    /// Create a scheduler with the rebase task already queued
    pub fn new() -> Self {
        let mut scheduler = Scheduler {
            events: Vec::with_capacity(16),
            global_cycles: 0,
        };
        scheduler.schedule(Task::ResetCycles, RESET_CYCLES_DEADLINE);
        scheduler
    }

    /// Queue a task to run `delay` cycles from now, keeping the queue sorted.
    /// Insertion is upper-bound, so equal deadlines preserve insertion order.
    pub fn schedule(&mut self, task: Task, delay: u32) {
        let cycles = self.global_cycles.wrapping_add(delay);
        let index = self.events.partition_point(|event| event.cycles <= cycles);
        self.events.insert(index, Event { task, cycles });
    }

    /// Deadline of the soonest queued event.
    /// The queue always holds at least the rebase task.
    pub fn next_deadline(&self) -> u32 {
        self.events[0].cycles
    }

    /// Pop the head event if its deadline has been reached
    pub fn pop_due(&mut self) -> Option<Task> {
        if self.events[0].cycles <= self.global_cycles {
            Some(self.events.remove(0).task)
        } else {
            None
        }
    }

    /// Subtract the current counter from every deadline and re-queue the
    /// rebase task. Relative order is untouched because every deadline is
    /// >= `global_cycles`.
    pub fn rebase(&mut self) -> u32 {
        let base = self.global_cycles;
        for event in &mut self.events {
            event.cycles -= base;
        }
        self.global_cycles = 0;
        self.schedule(Task::ResetCycles, RESET_CYCLES_DEADLINE);
        base
    }

    /// Drop every queued event and re-queue the rebase task with a minimal
    /// deadline; used when switching to GBA mode, which rebuilds the task set
    pub fn clear(&mut self) {
        self.events.clear();
        self.schedule(Task::ResetCycles, 1);
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether a task is currently queued
    pub fn is_scheduled(&self, task: Task) -> bool {
        self.events.iter().any(|event| event.task == task)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

// ========== State Persistence ==========

impl Scheduler {
    /// Save the counter and queue to a state stream
    pub fn save_state(&self, stream: &mut crate::state::StateWriter) {
        stream.write_u32(self.global_cycles);
        stream.write_u32(self.events.len() as u32);
        for event in &self.events {
            stream.write_u8(event.task as u8);
            stream.write_u32(event.cycles);
        }
    }

    /// Restore the counter and queue from a state stream
    pub fn load_state(&mut self, stream: &mut crate::state::StateReader) -> Result<(), crate::state::StateError> {
        self.global_cycles = stream.read_u32()?;
        let count = stream.read_u32()?;
        self.events.clear();
        for _ in 0..count {
            let task = Task::from_id(stream.read_u8()?).ok_or(crate::state::StateError::Corrupt)?;
            let cycles = stream.read_u32()?;
            self.events.push(Event { task, cycles });
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
