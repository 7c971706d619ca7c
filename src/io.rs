//! I/O register dispatcher
//!
//! The I/O region is a set of registers keyed by base address, but the CPUs
//! may access it with any width at any sub-word offset. The dispatcher walks
//! an access byte-by-byte: each byte is resolved to the register covering
//! it, the register handler runs once per touched register, and the
//! relevant byte lanes are merged into the result (reads) or passed along
//! as a shifted mask/value pair (writes, so handlers only apply the bits
//! being written).
//!
//! Registers live in sorted, data-only tables (one read and one write table
//! per CPU, plus a pair for GBA mode); adding a register is one entry, the
//! dispatch loop never changes. Unknown bytes log on the first byte of an
//! access only, then are skipped so wider accesses spanning a known
//! register still work.

use crate::core::Core;
use crate::memory::MemValue;
use tracing::warn;

/// A readable register: base address, width in bytes, and handler
pub(crate) struct IoRead {
    base: u32,
    size: u8,
    read: fn(&mut Core) -> u32,
}

/// A writable register; the handler receives a byte-shifted mask and value
pub(crate) struct IoWrite {
    base: u32,
    size: u8,
    write: fn(&mut Core, u32, u32),
}

fn lookup_read(table: &[IoRead], address: u32) -> Option<&IoRead> {
    let index = table.partition_point(|reg| reg.base <= address);
    let reg = &table[index.checked_sub(1)?];
    (address < reg.base + reg.size as u32).then_some(reg)
}

fn lookup_write(table: &[IoWrite], address: u32) -> Option<&IoWrite> {
    let index = table.partition_point(|reg| reg.base <= address);
    let reg = &table[index.checked_sub(1)?];
    (address < reg.base + reg.size as u32).then_some(reg)
}

impl Core {
    fn io_read<T: MemValue>(&mut self, table: &[IoRead], address: u32, label: &str) -> T {
        let mut bits = 0u32;
        let mut i = 0u32;
        while i < T::SIZE {
            let Some(reg) = lookup_read(table, address + i) else {
                if i == 0 {
                    warn!("unknown {} I/O register read: 0x{:08X}", label, address);
                    return T::from_bits(0);
                }
                // Ignore unknown bytes after the first so a wide access
                // over a narrow register still completes
                i += 1;
                continue;
            };
            let offset = address + i - reg.base;
            let (size, read) = (reg.size, reg.read);
            let data = read(self);
            bits |= (data >> (offset * 8)) << (i * 8);
            i += size as u32 - offset;
        }
        T::from_bits(bits)
    }

    fn io_write<T: MemValue>(&mut self, table: &[IoWrite], address: u32, value: T, label: &str) {
        let bits = value.to_bits();
        let mut i = 0u32;
        while i < T::SIZE {
            let Some(reg) = lookup_write(table, address + i) else {
                if i == 0 {
                    warn!("unknown {} I/O register write: 0x{:08X}", label, address);
                    return;
                }
                i += 1;
                continue;
            };
            let offset = address + i - reg.base;
            let (size, write) = (reg.size, reg.write);
            let mask = (1u64 << ((T::SIZE - i) * 8)).wrapping_sub(1) as u32;
            write(self, mask << (offset * 8), (bits >> (i * 8)) << (offset * 8));
            i += size as u32 - offset;
        }
    }

    pub(crate) fn io_read_arm9<T: MemValue>(&mut self, address: u32) -> T {
        self.io_read(ARM9_READ, address, "ARM9")
    }

    pub(crate) fn io_write_arm9<T: MemValue>(&mut self, address: u32, value: T) {
        self.io_write(ARM9_WRITE, address, value, "ARM9")
    }

    pub(crate) fn io_read_arm7<T: MemValue>(&mut self, address: u32) -> T {
        // The WiFi register blocks are mirrored
        let address = if (0x04808000..0x04810000).contains(&address) {
            address & !0x00008000
        } else {
            address
        };
        self.io_read(ARM7_READ, address, "ARM7")
    }

    pub(crate) fn io_write_arm7<T: MemValue>(&mut self, address: u32, value: T) {
        let address = if (0x04808000..0x04810000).contains(&address) {
            address & !0x00008000
        } else {
            address
        };
        self.io_write(ARM7_WRITE, address, value, "ARM7")
    }

    pub(crate) fn io_read_gba<T: MemValue>(&mut self, address: u32) -> T {
        self.io_read(GBA_READ, address, "GBA")
    }

    pub(crate) fn io_write_gba<T: MemValue>(&mut self, address: u32, value: T) {
        self.io_write(GBA_WRITE, address, value, "GBA")
    }
}

macro_rules! rd {
    ($base:expr, $size:expr, $handler:expr) => {
        IoRead { base: $base, size: $size, read: $handler }
    };
}

macro_rules! wr {
    ($base:expr, $size:expr, $handler:expr) => {
        IoWrite { base: $base, size: $size, write: $handler }
    };
}

/// ARM9 readable registers, sorted by base address
static ARM9_READ: &[IoRead] = &[
    rd!(0x4000004, 2, |c| c.gpu.read_disp_stat(0) as u32), // DISPSTAT (ARM9)
    rd!(0x4000006, 2, |c| c.gpu.read_vcount() as u32), // VCOUNT
    rd!(0x40000B0, 4, |c| c.dmas[0].read_sad(0)), // DMA0SAD (ARM9)
    rd!(0x40000B4, 4, |c| c.dmas[0].read_dad(0)), // DMA0DAD (ARM9)
    rd!(0x40000B8, 4, |c| c.dmas[0].read_cnt(0)), // DMA0CNT (ARM9)
    rd!(0x40000BC, 4, |c| c.dmas[0].read_sad(1)), // DMA1SAD (ARM9)
    rd!(0x40000C0, 4, |c| c.dmas[0].read_dad(1)), // DMA1DAD (ARM9)
    rd!(0x40000C4, 4, |c| c.dmas[0].read_cnt(1)), // DMA1CNT (ARM9)
    rd!(0x40000C8, 4, |c| c.dmas[0].read_sad(2)), // DMA2SAD (ARM9)
    rd!(0x40000CC, 4, |c| c.dmas[0].read_dad(2)), // DMA2DAD (ARM9)
    rd!(0x40000D0, 4, |c| c.dmas[0].read_cnt(2)), // DMA2CNT (ARM9)
    rd!(0x40000D4, 4, |c| c.dmas[0].read_sad(3)), // DMA3SAD (ARM9)
    rd!(0x40000D8, 4, |c| c.dmas[0].read_dad(3)), // DMA3DAD (ARM9)
    rd!(0x40000DC, 4, |c| c.dmas[0].read_cnt(3)), // DMA3CNT (ARM9)
    rd!(0x40000E0, 4, |c| c.dmas[0].read_fill(0)), // DMA0FILL
    rd!(0x40000E4, 4, |c| c.dmas[0].read_fill(1)), // DMA1FILL
    rd!(0x40000E8, 4, |c| c.dmas[0].read_fill(2)), // DMA2FILL
    rd!(0x40000EC, 4, |c| c.dmas[0].read_fill(3)), // DMA3FILL
    rd!(0x4000100, 2, |c| c.timer_read_counter(0, 0) as u32), // TM0CNT_L (ARM9)
    rd!(0x4000102, 2, |c| c.timers[0].read_cnt_h(0) as u32), // TM0CNT_H (ARM9)
    rd!(0x4000104, 2, |c| c.timer_read_counter(0, 1) as u32), // TM1CNT_L (ARM9)
    rd!(0x4000106, 2, |c| c.timers[0].read_cnt_h(1) as u32), // TM1CNT_H (ARM9)
    rd!(0x4000108, 2, |c| c.timer_read_counter(0, 2) as u32), // TM2CNT_L (ARM9)
    rd!(0x400010A, 2, |c| c.timers[0].read_cnt_h(2) as u32), // TM2CNT_H (ARM9)
    rd!(0x400010C, 2, |c| c.timer_read_counter(0, 3) as u32), // TM3CNT_L (ARM9)
    rd!(0x400010E, 2, |c| c.timers[0].read_cnt_h(3) as u32), // TM3CNT_H (ARM9)
    rd!(0x4000130, 2, |c| c.input.read_key_input() as u32), // KEYINPUT
    rd!(0x4000180, 2, |c| c.ipc.read_sync(0) as u32), // IPCSYNC (ARM9)
    rd!(0x4000184, 2, |c| c.ipc.read_fifo_cnt(0) as u32), // IPCFIFOCNT (ARM9)
    rd!(0x40001A0, 2, |c| c.cartridge_nds.read_aux_spi_cnt(0) as u32), // AUXSPICNT (ARM9)
    rd!(0x40001A2, 1, |c| c.cartridge_nds.read_aux_spi_data(0) as u32), // AUXSPIDATA (ARM9)
    rd!(0x40001A4, 4, |c| c.cartridge_nds.read_rom_ctrl(0)), // ROMCTRL (ARM9)
    rd!(0x4000208, 1, |c| c.cpus[0].ime as u32), // IME (ARM9)
    rd!(0x4000210, 4, |c| c.cpus[0].ie), // IE (ARM9)
    rd!(0x4000214, 4, |c| c.cpus[0].irf), // IF (ARM9)
    rd!(0x4000240, 1, |c| c.vram.read_cnt(0) as u32), // VRAMCNT_A
    rd!(0x4000241, 1, |c| c.vram.read_cnt(1) as u32), // VRAMCNT_B
    rd!(0x4000242, 1, |c| c.vram.read_cnt(2) as u32), // VRAMCNT_C
    rd!(0x4000243, 1, |c| c.vram.read_cnt(3) as u32), // VRAMCNT_D
    rd!(0x4000244, 1, |c| c.vram.read_cnt(4) as u32), // VRAMCNT_E
    rd!(0x4000245, 1, |c| c.vram.read_cnt(5) as u32), // VRAMCNT_F
    rd!(0x4000246, 1, |c| c.vram.read_cnt(6) as u32), // VRAMCNT_G
    rd!(0x4000247, 1, |c| c.memory.read_wram_cnt() as u32), // WRAMCNT
    rd!(0x4000248, 1, |c| c.vram.read_cnt(7) as u32), // VRAMCNT_H
    rd!(0x4000249, 1, |c| c.vram.read_cnt(8) as u32), // VRAMCNT_I
    rd!(0x4000280, 2, |c| c.div_sqrt.read_div_cnt() as u32), // DIVCNT
    rd!(0x4000290, 4, |c| c.div_sqrt.read_div_numer() as u32), // DIVNUMER_L
    rd!(0x4000294, 4, |c| (c.div_sqrt.read_div_numer() >> 32) as u32), // DIVNUMER_H
    rd!(0x4000298, 4, |c| c.div_sqrt.read_div_denom() as u32), // DIVDENOM_L
    rd!(0x400029C, 4, |c| (c.div_sqrt.read_div_denom() >> 32) as u32), // DIVDENOM_H
    rd!(0x40002A0, 4, |c| c.div_sqrt.read_div_result() as u32), // DIVRESULT_L
    rd!(0x40002A4, 4, |c| (c.div_sqrt.read_div_result() >> 32) as u32), // DIVRESULT_H
    rd!(0x40002A8, 4, |c| c.div_sqrt.read_div_rem_result() as u32), // DIVREMRESULT_L
    rd!(0x40002AC, 4, |c| (c.div_sqrt.read_div_rem_result() >> 32) as u32), // DIVREMRESULT_H
    rd!(0x40002B0, 2, |c| c.div_sqrt.read_sqrt_cnt() as u32), // SQRTCNT
    rd!(0x40002B4, 4, |c| c.div_sqrt.read_sqrt_result()), // SQRTRESULT
    rd!(0x40002B8, 4, |c| c.div_sqrt.read_sqrt_param() as u32), // SQRTPARAM_L
    rd!(0x40002BC, 4, |c| (c.div_sqrt.read_sqrt_param() >> 32) as u32), // SQRTPARAM_H
    rd!(0x4000300, 1, |c| c.cpus[0].post_flg as u32), // POSTFLG (ARM9)
    rd!(0x4000304, 2, |c| c.gpu.read_pow_cnt1() as u32), // POWCNT1
    rd!(0x4000600, 4, |c| c.gpu3d.read_gx_stat()), // GXSTAT
    rd!(0x4100000, 4, |c| c.ipc_read_fifo_recv(0)), // IPCFIFORECV (ARM9)
    rd!(0x4100010, 4, |c| c.cart_read_rom_data_in(0)), // ROMDATAIN (ARM9)
];

/// ARM9 writable registers, sorted by base address
static ARM9_WRITE: &[IoWrite] = &[
    wr!(0x4000004, 2, |c, m, v| c.gpu.write_disp_stat(0, m as u16, v as u16)), // DISPSTAT (ARM9)
    wr!(0x40000B0, 4, |c, m, v| c.dmas[0].write_sad(0, m, v)), // DMA0SAD (ARM9)
    wr!(0x40000B4, 4, |c, m, v| c.dmas[0].write_dad(0, m, v)), // DMA0DAD (ARM9)
    wr!(0x40000B8, 4, |c, m, v| c.dma_write_cnt(0, 0, m, v)), // DMA0CNT (ARM9)
    wr!(0x40000BC, 4, |c, m, v| c.dmas[0].write_sad(1, m, v)), // DMA1SAD (ARM9)
    wr!(0x40000C0, 4, |c, m, v| c.dmas[0].write_dad(1, m, v)), // DMA1DAD (ARM9)
    wr!(0x40000C4, 4, |c, m, v| c.dma_write_cnt(0, 1, m, v)), // DMA1CNT (ARM9)
    wr!(0x40000C8, 4, |c, m, v| c.dmas[0].write_sad(2, m, v)), // DMA2SAD (ARM9)
    wr!(0x40000CC, 4, |c, m, v| c.dmas[0].write_dad(2, m, v)), // DMA2DAD (ARM9)
    wr!(0x40000D0, 4, |c, m, v| c.dma_write_cnt(0, 2, m, v)), // DMA2CNT (ARM9)
    wr!(0x40000D4, 4, |c, m, v| c.dmas[0].write_sad(3, m, v)), // DMA3SAD (ARM9)
    wr!(0x40000D8, 4, |c, m, v| c.dmas[0].write_dad(3, m, v)), // DMA3DAD (ARM9)
    wr!(0x40000DC, 4, |c, m, v| c.dma_write_cnt(0, 3, m, v)), // DMA3CNT (ARM9)
    wr!(0x40000E0, 4, |c, m, v| c.dmas[0].write_fill(0, m, v)), // DMA0FILL
    wr!(0x40000E4, 4, |c, m, v| c.dmas[0].write_fill(1, m, v)), // DMA1FILL
    wr!(0x40000E8, 4, |c, m, v| c.dmas[0].write_fill(2, m, v)), // DMA2FILL
    wr!(0x40000EC, 4, |c, m, v| c.dmas[0].write_fill(3, m, v)), // DMA3FILL
    wr!(0x4000100, 2, |c, m, v| c.timer_write_cnt_l(0, 0, m as u16, v as u16)), // TM0CNT_L (ARM9)
    wr!(0x4000102, 2, |c, m, v| c.timer_write_cnt_h(0, 0, m as u16, v as u16)), // TM0CNT_H (ARM9)
    wr!(0x4000104, 2, |c, m, v| c.timer_write_cnt_l(0, 1, m as u16, v as u16)), // TM1CNT_L (ARM9)
    wr!(0x4000106, 2, |c, m, v| c.timer_write_cnt_h(0, 1, m as u16, v as u16)), // TM1CNT_H (ARM9)
    wr!(0x4000108, 2, |c, m, v| c.timer_write_cnt_l(0, 2, m as u16, v as u16)), // TM2CNT_L (ARM9)
    wr!(0x400010A, 2, |c, m, v| c.timer_write_cnt_h(0, 2, m as u16, v as u16)), // TM2CNT_H (ARM9)
    wr!(0x400010C, 2, |c, m, v| c.timer_write_cnt_l(0, 3, m as u16, v as u16)), // TM3CNT_L (ARM9)
    wr!(0x400010E, 2, |c, m, v| c.timer_write_cnt_h(0, 3, m as u16, v as u16)), // TM3CNT_H (ARM9)
    wr!(0x4000180, 2, |c, m, v| c.ipc_write_sync(0, m as u16, v as u16)), // IPCSYNC (ARM9)
    wr!(0x4000184, 2, |c, m, v| c.ipc_write_fifo_cnt(0, m as u16, v as u16)), // IPCFIFOCNT (ARM9)
    wr!(0x4000188, 4, |c, _, v| c.ipc_write_fifo_send(0, v)), // IPCFIFOSEND (ARM9)
    wr!(0x40001A0, 2, |c, m, v| c.cartridge_nds.write_aux_spi_cnt(0, m as u16, v as u16)), // AUXSPICNT (ARM9)
    wr!(0x40001A2, 1, |c, _, v| c.cartridge_nds.write_aux_spi_data(0, v as u8)), // AUXSPIDATA (ARM9)
    wr!(0x40001A4, 4, |c, m, v| c.cart_write_rom_ctrl(0, m, v)), // ROMCTRL (ARM9)
    wr!(0x40001A8, 4, |c, m, v| c.cartridge_nds.write_rom_cmd_out_l(0, m, v)), // ROMCMDOUT_L (ARM9)
    wr!(0x40001AC, 4, |c, m, v| c.cartridge_nds.write_rom_cmd_out_h(0, m, v)), // ROMCMDOUT_H (ARM9)
    wr!(0x4000208, 1, |c, _, v| c.write_ime(0, v as u8)), // IME (ARM9)
    wr!(0x4000210, 4, |c, m, v| c.write_ie(0, m, v)), // IE (ARM9)
    wr!(0x4000214, 4, |c, m, v| c.write_irf(0, m, v)), // IF (ARM9)
    wr!(0x4000240, 1, |c, _, v| c.write_vram_cnt(0, v as u8)), // VRAMCNT_A
    wr!(0x4000241, 1, |c, _, v| c.write_vram_cnt(1, v as u8)), // VRAMCNT_B
    wr!(0x4000242, 1, |c, _, v| c.write_vram_cnt(2, v as u8)), // VRAMCNT_C
    wr!(0x4000243, 1, |c, _, v| c.write_vram_cnt(3, v as u8)), // VRAMCNT_D
    wr!(0x4000244, 1, |c, _, v| c.write_vram_cnt(4, v as u8)), // VRAMCNT_E
    wr!(0x4000245, 1, |c, _, v| c.write_vram_cnt(5, v as u8)), // VRAMCNT_F
    wr!(0x4000246, 1, |c, _, v| c.write_vram_cnt(6, v as u8)), // VRAMCNT_G
    wr!(0x4000247, 1, |c, _, v| c.write_wram_cnt(v as u8)), // WRAMCNT
    wr!(0x4000248, 1, |c, _, v| c.write_vram_cnt(7, v as u8)), // VRAMCNT_H
    wr!(0x4000249, 1, |c, _, v| c.write_vram_cnt(8, v as u8)), // VRAMCNT_I
    wr!(0x4000280, 2, |c, m, v| c.div_sqrt.write_div_cnt(m as u16, v as u16)), // DIVCNT
    wr!(0x4000290, 4, |c, m, v| c.div_sqrt.write_div_numer_l(m, v)), // DIVNUMER_L
    wr!(0x4000294, 4, |c, m, v| c.div_sqrt.write_div_numer_h(m, v)), // DIVNUMER_H
    wr!(0x4000298, 4, |c, m, v| c.div_sqrt.write_div_denom_l(m, v)), // DIVDENOM_L
    wr!(0x400029C, 4, |c, m, v| c.div_sqrt.write_div_denom_h(m, v)), // DIVDENOM_H
    wr!(0x40002B0, 2, |c, m, v| c.div_sqrt.write_sqrt_cnt(m as u16, v as u16)), // SQRTCNT
    wr!(0x40002B8, 4, |c, m, v| c.div_sqrt.write_sqrt_param_l(m, v)), // SQRTPARAM_L
    wr!(0x40002BC, 4, |c, m, v| c.div_sqrt.write_sqrt_param_h(m, v)), // SQRTPARAM_H
    wr!(0x4000300, 1, |c, _, v| c.write_post_flg(0, v as u8)), // POSTFLG (ARM9)
    wr!(0x4000304, 2, |c, m, v| c.gpu.write_pow_cnt1(m as u16, v as u16)), // POWCNT1
    wr!(0x4000600, 4, |c, m, v| c.gpu3d.write_gx_stat(m, v)), // GXSTAT
];

/// ARM7 readable registers, sorted by base address
static ARM7_READ: &[IoRead] = &[
    rd!(0x4000004, 2, |c| c.gpu.read_disp_stat(1) as u32), // DISPSTAT (ARM7)
    rd!(0x4000006, 2, |c| c.gpu.read_vcount() as u32), // VCOUNT
    rd!(0x40000B0, 4, |c| c.dmas[1].read_sad(0)), // DMA0SAD (ARM7)
    rd!(0x40000B4, 4, |c| c.dmas[1].read_dad(0)), // DMA0DAD (ARM7)
    rd!(0x40000B8, 4, |c| c.dmas[1].read_cnt(0)), // DMA0CNT (ARM7)
    rd!(0x40000BC, 4, |c| c.dmas[1].read_sad(1)), // DMA1SAD (ARM7)
    rd!(0x40000C0, 4, |c| c.dmas[1].read_dad(1)), // DMA1DAD (ARM7)
    rd!(0x40000C4, 4, |c| c.dmas[1].read_cnt(1)), // DMA1CNT (ARM7)
    rd!(0x40000C8, 4, |c| c.dmas[1].read_sad(2)), // DMA2SAD (ARM7)
    rd!(0x40000CC, 4, |c| c.dmas[1].read_dad(2)), // DMA2DAD (ARM7)
    rd!(0x40000D0, 4, |c| c.dmas[1].read_cnt(2)), // DMA2CNT (ARM7)
    rd!(0x40000D4, 4, |c| c.dmas[1].read_sad(3)), // DMA3SAD (ARM7)
    rd!(0x40000D8, 4, |c| c.dmas[1].read_dad(3)), // DMA3DAD (ARM7)
    rd!(0x40000DC, 4, |c| c.dmas[1].read_cnt(3)), // DMA3CNT (ARM7)
    rd!(0x4000100, 2, |c| c.timer_read_counter(1, 0) as u32), // TM0CNT_L (ARM7)
    rd!(0x4000102, 2, |c| c.timers[1].read_cnt_h(0) as u32), // TM0CNT_H (ARM7)
    rd!(0x4000104, 2, |c| c.timer_read_counter(1, 1) as u32), // TM1CNT_L (ARM7)
    rd!(0x4000106, 2, |c| c.timers[1].read_cnt_h(1) as u32), // TM1CNT_H (ARM7)
    rd!(0x4000108, 2, |c| c.timer_read_counter(1, 2) as u32), // TM2CNT_L (ARM7)
    rd!(0x400010A, 2, |c| c.timers[1].read_cnt_h(2) as u32), // TM2CNT_H (ARM7)
    rd!(0x400010C, 2, |c| c.timer_read_counter(1, 3) as u32), // TM3CNT_L (ARM7)
    rd!(0x400010E, 2, |c| c.timers[1].read_cnt_h(3) as u32), // TM3CNT_H (ARM7)
    rd!(0x4000130, 2, |c| c.input.read_key_input() as u32), // KEYINPUT
    rd!(0x4000136, 2, |c| c.input.read_ext_key_in() as u32), // EXTKEYIN
    rd!(0x4000138, 1, |c| c.rtc.read_rtc() as u32), // RTC
    rd!(0x4000180, 2, |c| c.ipc.read_sync(1) as u32), // IPCSYNC (ARM7)
    rd!(0x4000184, 2, |c| c.ipc.read_fifo_cnt(1) as u32), // IPCFIFOCNT (ARM7)
    rd!(0x40001A0, 2, |c| c.cartridge_nds.read_aux_spi_cnt(1) as u32), // AUXSPICNT (ARM7)
    rd!(0x40001A2, 1, |c| c.cartridge_nds.read_aux_spi_data(1) as u32), // AUXSPIDATA (ARM7)
    rd!(0x40001A4, 4, |c| c.cartridge_nds.read_rom_ctrl(1)), // ROMCTRL (ARM7)
    rd!(0x40001C0, 2, |c| c.spi.read_spi_cnt() as u32), // SPICNT
    rd!(0x40001C2, 1, |c| c.spi.read_spi_data() as u32), // SPIDATA
    rd!(0x4000208, 1, |c| c.cpus[1].ime as u32), // IME (ARM7)
    rd!(0x4000210, 4, |c| c.cpus[1].ie), // IE (ARM7)
    rd!(0x4000214, 4, |c| c.cpus[1].irf), // IF (ARM7)
    rd!(0x4000240, 1, |c| c.vram.stat as u32), // VRAMSTAT
    rd!(0x4000241, 1, |c| c.memory.read_wram_cnt() as u32), // WRAMSTAT
    rd!(0x4000300, 1, |c| c.cpus[1].post_flg as u32), // POSTFLG (ARM7)
    rd!(0x4000301, 1, |c| c.memory.read_halt_cnt() as u32), // HALTCNT
    rd!(0x4000504, 2, |c| c.spu.read_sound_bias() as u32), // SOUNDBIAS
    rd!(0x4100000, 4, |c| c.ipc_read_fifo_recv(1)), // IPCFIFORECV (ARM7)
    rd!(0x4100010, 4, |c| c.cart_read_rom_data_in(1)), // ROMDATAIN (ARM7)
];

/// ARM7 writable registers, sorted by base address
static ARM7_WRITE: &[IoWrite] = &[
    wr!(0x4000004, 2, |c, m, v| c.gpu.write_disp_stat(1, m as u16, v as u16)), // DISPSTAT (ARM7)
    wr!(0x40000B0, 4, |c, m, v| c.dmas[1].write_sad(0, m, v)), // DMA0SAD (ARM7)
    wr!(0x40000B4, 4, |c, m, v| c.dmas[1].write_dad(0, m, v)), // DMA0DAD (ARM7)
    wr!(0x40000B8, 4, |c, m, v| c.dma_write_cnt(1, 0, m, v)), // DMA0CNT (ARM7)
    wr!(0x40000BC, 4, |c, m, v| c.dmas[1].write_sad(1, m, v)), // DMA1SAD (ARM7)
    wr!(0x40000C0, 4, |c, m, v| c.dmas[1].write_dad(1, m, v)), // DMA1DAD (ARM7)
    wr!(0x40000C4, 4, |c, m, v| c.dma_write_cnt(1, 1, m, v)), // DMA1CNT (ARM7)
    wr!(0x40000C8, 4, |c, m, v| c.dmas[1].write_sad(2, m, v)), // DMA2SAD (ARM7)
    wr!(0x40000CC, 4, |c, m, v| c.dmas[1].write_dad(2, m, v)), // DMA2DAD (ARM7)
    wr!(0x40000D0, 4, |c, m, v| c.dma_write_cnt(1, 2, m, v)), // DMA2CNT (ARM7)
    wr!(0x40000D4, 4, |c, m, v| c.dmas[1].write_sad(3, m, v)), // DMA3SAD (ARM7)
    wr!(0x40000D8, 4, |c, m, v| c.dmas[1].write_dad(3, m, v)), // DMA3DAD (ARM7)
    wr!(0x40000DC, 4, |c, m, v| c.dma_write_cnt(1, 3, m, v)), // DMA3CNT (ARM7)
    wr!(0x4000100, 2, |c, m, v| c.timer_write_cnt_l(1, 0, m as u16, v as u16)), // TM0CNT_L (ARM7)
    wr!(0x4000102, 2, |c, m, v| c.timer_write_cnt_h(1, 0, m as u16, v as u16)), // TM0CNT_H (ARM7)
    wr!(0x4000104, 2, |c, m, v| c.timer_write_cnt_l(1, 1, m as u16, v as u16)), // TM1CNT_L (ARM7)
    wr!(0x4000106, 2, |c, m, v| c.timer_write_cnt_h(1, 1, m as u16, v as u16)), // TM1CNT_H (ARM7)
    wr!(0x4000108, 2, |c, m, v| c.timer_write_cnt_l(1, 2, m as u16, v as u16)), // TM2CNT_L (ARM7)
    wr!(0x400010A, 2, |c, m, v| c.timer_write_cnt_h(1, 2, m as u16, v as u16)), // TM2CNT_H (ARM7)
    wr!(0x400010C, 2, |c, m, v| c.timer_write_cnt_l(1, 3, m as u16, v as u16)), // TM3CNT_L (ARM7)
    wr!(0x400010E, 2, |c, m, v| c.timer_write_cnt_h(1, 3, m as u16, v as u16)), // TM3CNT_H (ARM7)
    wr!(0x4000138, 1, |c, _, v| c.rtc.write_rtc(v as u8)), // RTC
    wr!(0x4000180, 2, |c, m, v| c.ipc_write_sync(1, m as u16, v as u16)), // IPCSYNC (ARM7)
    wr!(0x4000184, 2, |c, m, v| c.ipc_write_fifo_cnt(1, m as u16, v as u16)), // IPCFIFOCNT (ARM7)
    wr!(0x4000188, 4, |c, _, v| c.ipc_write_fifo_send(1, v)), // IPCFIFOSEND (ARM7)
    wr!(0x40001A0, 2, |c, m, v| c.cartridge_nds.write_aux_spi_cnt(1, m as u16, v as u16)), // AUXSPICNT (ARM7)
    wr!(0x40001A2, 1, |c, _, v| c.cartridge_nds.write_aux_spi_data(1, v as u8)), // AUXSPIDATA (ARM7)
    wr!(0x40001A4, 4, |c, m, v| c.cart_write_rom_ctrl(1, m, v)), // ROMCTRL (ARM7)
    wr!(0x40001A8, 4, |c, m, v| c.cartridge_nds.write_rom_cmd_out_l(1, m, v)), // ROMCMDOUT_L (ARM7)
    wr!(0x40001AC, 4, |c, m, v| c.cartridge_nds.write_rom_cmd_out_h(1, m, v)), // ROMCMDOUT_H (ARM7)
    wr!(0x40001C0, 2, |c, m, v| c.spi.write_spi_cnt(m as u16, v as u16)), // SPICNT
    wr!(0x40001C2, 1, |c, _, v| c.spi_write_spi_data(v as u8)), // SPIDATA
    wr!(0x4000208, 1, |c, _, v| c.write_ime(1, v as u8)), // IME (ARM7)
    wr!(0x4000210, 4, |c, m, v| c.write_ie(1, m, v)), // IE (ARM7)
    wr!(0x4000214, 4, |c, m, v| c.write_irf(1, m, v)), // IF (ARM7)
    wr!(0x4000300, 1, |c, _, v| c.write_post_flg(1, v as u8)), // POSTFLG (ARM7)
    wr!(0x4000301, 1, |c, _, v| c.write_halt_cnt(v as u8)), // HALTCNT
    wr!(0x4000504, 2, |c, m, v| c.spu.write_sound_bias(m as u16, v as u16)), // SOUNDBIAS
];

/// GBA-mode readable registers (a compatibility subset with a few
/// alternate encodings), sorted by base address
static GBA_READ: &[IoRead] = &[
    rd!(0x4000004, 2, |c| c.gpu.read_disp_stat(1) as u32), // DISPSTAT
    rd!(0x4000006, 2, |c| c.gpu.read_vcount() as u32), // VCOUNT
    rd!(0x4000088, 2, |c| c.spu.read_sound_bias() as u32), // SOUNDBIAS
    rd!(0x40000B0, 4, |c| c.dmas[1].read_sad(0)), // DMA0SAD
    rd!(0x40000B4, 4, |c| c.dmas[1].read_dad(0)), // DMA0DAD
    rd!(0x40000B8, 4, |c| c.dmas[1].read_cnt(0)), // DMA0CNT
    rd!(0x40000BC, 4, |c| c.dmas[1].read_sad(1)), // DMA1SAD
    rd!(0x40000C0, 4, |c| c.dmas[1].read_dad(1)), // DMA1DAD
    rd!(0x40000C4, 4, |c| c.dmas[1].read_cnt(1)), // DMA1CNT
    rd!(0x40000C8, 4, |c| c.dmas[1].read_sad(2)), // DMA2SAD
    rd!(0x40000CC, 4, |c| c.dmas[1].read_dad(2)), // DMA2DAD
    rd!(0x40000D0, 4, |c| c.dmas[1].read_cnt(2)), // DMA2CNT
    rd!(0x40000D4, 4, |c| c.dmas[1].read_sad(3)), // DMA3SAD
    rd!(0x40000D8, 4, |c| c.dmas[1].read_dad(3)), // DMA3DAD
    rd!(0x40000DC, 4, |c| c.dmas[1].read_cnt(3)), // DMA3CNT
    rd!(0x4000100, 2, |c| c.timer_read_counter(1, 0) as u32), // TM0CNT_L
    rd!(0x4000102, 2, |c| c.timers[1].read_cnt_h(0) as u32), // TM0CNT_H
    rd!(0x4000104, 2, |c| c.timer_read_counter(1, 1) as u32), // TM1CNT_L
    rd!(0x4000106, 2, |c| c.timers[1].read_cnt_h(1) as u32), // TM1CNT_H
    rd!(0x4000108, 2, |c| c.timer_read_counter(1, 2) as u32), // TM2CNT_L
    rd!(0x400010A, 2, |c| c.timers[1].read_cnt_h(2) as u32), // TM2CNT_H
    rd!(0x400010C, 2, |c| c.timer_read_counter(1, 3) as u32), // TM3CNT_L
    rd!(0x400010E, 2, |c| c.timers[1].read_cnt_h(3) as u32), // TM3CNT_H
    rd!(0x4000130, 2, |c| c.input.read_key_input() as u32), // KEYINPUT
    rd!(0x4000200, 2, |c| c.cpus[1].ie & 0xFFFF), // IE
    rd!(0x4000202, 2, |c| c.cpus[1].irf & 0xFFFF), // IF
    rd!(0x4000208, 1, |c| c.cpus[1].ime as u32), // IME
    rd!(0x4000300, 1, |c| c.cpus[1].post_flg as u32), // POSTFLG
    rd!(0x80000C4, 2, |c| c.rtc.read_gp_data() as u32), // GPIO data
    rd!(0x80000C6, 2, |c| c.rtc.read_gp_direction() as u32), // GPIO direction
    rd!(0x80000C8, 2, |c| c.rtc.read_gp_control() as u32), // GPIO control
];

/// GBA-mode writable registers, sorted by base address
static GBA_WRITE: &[IoWrite] = &[
    wr!(0x4000004, 2, |c, m, v| c.gpu.write_disp_stat(1, m as u16, v as u16)), // DISPSTAT
    wr!(0x4000088, 2, |c, m, v| c.spu.write_sound_bias(m as u16, v as u16)), // SOUNDBIAS
    wr!(0x40000B0, 4, |c, m, v| c.dmas[1].write_sad(0, m, v)), // DMA0SAD
    wr!(0x40000B4, 4, |c, m, v| c.dmas[1].write_dad(0, m, v)), // DMA0DAD
    wr!(0x40000B8, 4, |c, m, v| c.dma_write_cnt(1, 0, m, v)), // DMA0CNT
    wr!(0x40000BC, 4, |c, m, v| c.dmas[1].write_sad(1, m, v)), // DMA1SAD
    wr!(0x40000C0, 4, |c, m, v| c.dmas[1].write_dad(1, m, v)), // DMA1DAD
    wr!(0x40000C4, 4, |c, m, v| c.dma_write_cnt(1, 1, m, v)), // DMA1CNT
    wr!(0x40000C8, 4, |c, m, v| c.dmas[1].write_sad(2, m, v)), // DMA2SAD
    wr!(0x40000CC, 4, |c, m, v| c.dmas[1].write_dad(2, m, v)), // DMA2DAD
    wr!(0x40000D0, 4, |c, m, v| c.dma_write_cnt(1, 2, m, v)), // DMA2CNT
    wr!(0x40000D4, 4, |c, m, v| c.dmas[1].write_sad(3, m, v)), // DMA3SAD
    wr!(0x40000D8, 4, |c, m, v| c.dmas[1].write_dad(3, m, v)), // DMA3DAD
    wr!(0x40000DC, 4, |c, m, v| c.dma_write_cnt(1, 3, m, v)), // DMA3CNT
    wr!(0x4000100, 2, |c, m, v| c.timer_write_cnt_l(1, 0, m as u16, v as u16)), // TM0CNT_L
    wr!(0x4000102, 2, |c, m, v| c.timer_write_cnt_h(1, 0, m as u16, v as u16)), // TM0CNT_H
    wr!(0x4000104, 2, |c, m, v| c.timer_write_cnt_l(1, 1, m as u16, v as u16)), // TM1CNT_L
    wr!(0x4000106, 2, |c, m, v| c.timer_write_cnt_h(1, 1, m as u16, v as u16)), // TM1CNT_H
    wr!(0x4000108, 2, |c, m, v| c.timer_write_cnt_l(1, 2, m as u16, v as u16)), // TM2CNT_L
    wr!(0x400010A, 2, |c, m, v| c.timer_write_cnt_h(1, 2, m as u16, v as u16)), // TM2CNT_H
    wr!(0x400010C, 2, |c, m, v| c.timer_write_cnt_l(1, 3, m as u16, v as u16)), // TM3CNT_L
    wr!(0x400010E, 2, |c, m, v| c.timer_write_cnt_h(1, 3, m as u16, v as u16)), // TM3CNT_H
    wr!(0x4000200, 2, |c, m, v| c.write_ie(1, m, v)), // IE
    wr!(0x4000202, 2, |c, m, v| c.write_irf(1, m, v)), // IF
    wr!(0x4000208, 1, |c, _, v| c.write_ime(1, v as u8)), // IME
    wr!(0x4000300, 1, |c, _, v| c.write_post_flg(1, v as u8)), // POSTFLG
    wr!(0x4000301, 1, |c, _, v| c.write_gba_halt_cnt(v as u8)), // HALTCNT
    wr!(0x80000C4, 2, |c, m, v| c.rtc.write_gp_data(m as u16, v as u16)), // GPIO data
    wr!(0x80000C6, 2, |c, m, v| c.rtc.write_gp_direction(m as u16, v as u16)), // GPIO direction
    wr!(0x80000C8, 2, |c, m, v| c.gba_write_gp_control(m as u16, v as u16)), // GPIO control
];

impl Core {
    /// VRAMCNT writes rebuild the routing table, then the memory map over
    /// the whole VRAM range, before the write returns
    fn write_vram_cnt(&mut self, bank: usize, value: u8) {
        if self.vram.write_cnt(bank, value) {
            self.remap_vram();
        }
    }

    /// The GPIO direction latch gates the first ROM page in and out of the
    /// GBA memory map
    fn gba_write_gp_control(&mut self, mask: u16, value: u16) {
        self.rtc.write_gp_control(mask, value);
        self.update_map_arm7(0x08000000, 0x08002000);
    }
}
