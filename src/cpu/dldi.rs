//! Device-driver HLE hooks
//!
//! Homebrew patched with a disc-driver shim calls six fixed entry points;
//! patching replaces each with a sentinel word under the reserved
//! predicate, so the router lands here instead of executing the original
//! driver. The host-side storage backend is a collaborator; unpatched
//! cores never reach this code, and the default backend reports an empty,
//! idle device.

use crate::core::Core;
use tracing::debug;

/// Sentinel encodings the patcher writes over the driver entry points
pub mod sentinel {
    pub const STARTUP: u32 = 0xFF000001;
    pub const IS_INSERTED: u32 = 0xFF000002;
    pub const READ_SECTORS: u32 = 0xFF000003;
    pub const WRITE_SECTORS: u32 = 0xFF000004;
    pub const CLEAR_STATUS: u32 = 0xFF000005;
    pub const SHUTDOWN: u32 = 0xFF000006;
}

/// Driver-shim state; the core only tracks whether a ROM was patched
#[derive(Default)]
pub struct Dldi {
    patched: bool,
}

impl Dldi {
    pub fn new() -> Self {
        Dldi::default()
    }

    pub fn is_patched(&self) -> bool {
        self.patched
    }

    /// Called by the patching collaborator once sentinels are in place
    pub fn set_patched(&mut self, patched: bool) {
        self.patched = patched;
    }
}

impl Core {
    /// A sentinel was executed: run the host-side call and return through
    /// the link register like the original driver function would
    pub(super) fn dldi_call(&mut self, id: usize, opcode: u32) -> u32 {
        let result = match opcode {
            sentinel::STARTUP | sentinel::IS_INSERTED => {
                debug!("driver probe with no backing device");
                0
            }
            sentinel::READ_SECTORS | sentinel::WRITE_SECTORS => 0,
            sentinel::CLEAR_STATUS | sentinel::SHUTDOWN => 1,
            _ => return self.unknown_arm(id, opcode),
        };
        self.cpus[id].regs[0] = result;
        self.op_bx(id, 14) // branch through the link register
    }
}
