//! Opcode-counting decoder used to drive the FIFO without a renderer.

use gx_fifo::{CommandDecoder, FifoBuffer};
use gx_xfb::{EfbRect, XfbBackend, XfbConfig, XfbSource, XfbSourceParams, XfbTracker};
use serde::Serialize;
use tracing::trace;

const OP_NOP: u8 = 0x00;
const OP_LOAD_CP_REG: u8 = 0x08;
const OP_LOAD_XF_REG: u8 = 0x10;
const OP_INVALIDATE_VTX_CACHE: u8 = 0x48;
const OP_CALL_DL: u8 = 0x40;
const OP_LOAD_BP_REG: u8 = 0x61;

const BP_EFB_TOP_LEFT: u8 = 0x49;
const BP_EFB_WIDTH_HEIGHT: u8 = 0x4A;
const BP_XFB_ADDR: u8 = 0x4B;
const BP_DST_STRIDE: u8 = 0x4D;
const BP_COPY_EXECUTE: u8 = 0x52;

const COPY_TO_XFB: u32 = 1 << 14;
const GAMMA: [f32; 4] = [1.0, 1.7, 2.2, 2.2];

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub decode_calls: u64,
    pub bytes: u64,
    pub cycles: u64,
    pub nop: u64,
    pub load_cp_reg: u64,
    pub load_xf_reg: u64,
    pub load_bp_reg: u64,
    pub call_display_list: u64,
    pub invalidate_vertex_cache: u64,
    pub unknown: u64,
    pub xfb_copies: u64,
}

/// Texture stand-in; the replay only tracks XFB ranges.
#[derive(Debug, Default)]
pub struct NullSource;

impl XfbSource for NullSource {
    fn decode_to_texture(&mut self, _params: &XfbSourceParams) {}
    fn copy_efb(&mut self, _params: &XfbSourceParams, _gamma: f32) {}
}

#[derive(Debug, Default)]
pub struct NullBackend;

impl XfbBackend for NullBackend {
    type Source = NullSource;

    fn create_source(&mut self, _width: u32, _height: u32) -> NullSource {
        NullSource
    }

    fn target_size(&self, rect: &EfbRect) -> (u32, u32) {
        (rect.width().max(0) as u32, rect.height().max(0) as u32)
    }

    fn copy_to_real_xfb(&mut self, _a: u32, _w: u32, _h: u32, _r: &EfbRect, _g: f32) {}
}

/// Length of the command starting at `data[0]`, or `None` if more bytes are needed to tell.
fn command_len(data: &[u8]) -> Option<usize> {
    match data[0] {
        OP_LOAD_CP_REG => Some(6),
        OP_LOAD_BP_REG => Some(5),
        OP_CALL_DL => Some(9),
        OP_LOAD_XF_REG => {
            let header = data.get(1..5)?;
            let count = (u32::from_be_bytes([header[0], header[1], header[2], header[3]]) >> 16)
                & 0xF;
            Some(5 + 4 * (count as usize + 1))
        }
        _ => Some(1),
    }
}

#[derive(Debug)]
pub struct CountingDecoder {
    stats: DecodeStats,
    bp: [u32; 256],
    xfb: XfbTracker<NullSource>,
    backend: NullBackend,
}

impl CountingDecoder {
    pub fn new(xfb: XfbConfig) -> gx_xfb::Result<Self> {
        Ok(Self {
            stats: DecodeStats::default(),
            bp: [0; 256],
            xfb: XfbTracker::new(xfb)?,
            backend: NullBackend,
        })
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    pub fn xfb(&self) -> &XfbTracker<NullSource> {
        &self.xfb
    }

    fn execute(&mut self, cmd: &[u8]) {
        match cmd[0] {
            OP_NOP => self.stats.nop += 1,
            OP_LOAD_CP_REG => self.stats.load_cp_reg += 1,
            OP_LOAD_XF_REG => self.stats.load_xf_reg += 1,
            OP_CALL_DL => self.stats.call_display_list += 1,
            OP_INVALIDATE_VTX_CACHE => self.stats.invalidate_vertex_cache += 1,
            OP_LOAD_BP_REG => {
                self.stats.load_bp_reg += 1;
                let value = u32::from_be_bytes([cmd[1], cmd[2], cmd[3], cmd[4]]);
                self.load_bp(cmd[1], value & 0x00FF_FFFF);
            }
            _ => self.stats.unknown += 1,
        }
    }

    fn load_bp(&mut self, reg: u8, value: u32) {
        self.bp[reg as usize] = value;
        if reg != BP_COPY_EXECUTE || value & COPY_TO_XFB == 0 {
            return;
        }

        let top_left = self.bp[BP_EFB_TOP_LEFT as usize];
        let size = self.bp[BP_EFB_WIDTH_HEIGHT as usize];
        let left = (top_left & 0x3FF) as i32;
        let top = ((top_left >> 10) & 0x3FF) as i32;
        let width = (size & 0x3FF) as i32 + 1;
        let height = ((size >> 10) & 0x3FF) as i32 + 1;
        let rect = EfbRect::new(left, top, left + width, top + height);

        let address = self.bp[BP_XFB_ADDR as usize] << 5;
        // Stride is in 32-byte units; 16 two-byte pixels each.
        let fb_width = (self.bp[BP_DST_STRIDE as usize] & 0x3FF) << 4;
        let gamma = GAMMA[((value >> 7) & 3) as usize];

        trace!(address, fb_width, height, "EFB copy to XFB");
        self.xfb.record_write(
            &mut self.backend,
            address,
            fb_width,
            height as u32,
            &rect,
            gamma,
        );
        self.stats.xfb_copies += 1;
    }
}

impl CommandDecoder for CountingDecoder {
    fn decode(&mut self, fifo: &mut FifoBuffer, _skip_frame: bool) -> u32 {
        self.stats.decode_calls += 1;
        let data = fifo.pending();
        let mut pos = 0;
        while pos < data.len() {
            let Some(len) = command_len(&data[pos..]) else {
                break;
            };
            if pos + len > data.len() {
                break;
            }
            self.execute(&data[pos..pos + len]);
            pos += len;
        }
        fifo.consume(pos);
        self.stats.bytes += pos as u64;
        self.stats.cycles += pos as u64;
        pos as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bp(reg: u8, value: u32) -> [u8; 5] {
        let word = ((reg as u32) << 24) | (value & 0x00FF_FFFF);
        let b = word.to_be_bytes();
        [OP_LOAD_BP_REG, b[0], b[1], b[2], b[3]]
    }

    #[test]
    fn incomplete_commands_stay_pending() {
        let mut dec = CountingDecoder::new(XfbConfig::default()).unwrap();
        let mut fifo = FifoBuffer::new(64);
        fifo.append(&[OP_NOP, OP_LOAD_CP_REG, 0x50, 0, 0]).unwrap();
        assert_eq!(dec.decode(&mut fifo, false), 1);
        assert_eq!(fifo.pending().len(), 4);

        fifo.append(&[0, 0, OP_NOP]).unwrap();
        assert_eq!(dec.decode(&mut fifo, false), 7);
        assert!(fifo.is_drained());
        assert_eq!(dec.stats().nop, 2);
        assert_eq!(dec.stats().load_cp_reg, 1);
    }

    #[test]
    fn xf_loads_use_the_count_in_the_header() {
        let mut dec = CountingDecoder::new(XfbConfig::default()).unwrap();
        let mut fifo = FifoBuffer::new(64);
        // Two registers: header count field holds count - 1.
        let mut cmd = vec![OP_LOAD_XF_REG, 0x00, 0x01, 0x10, 0x00];
        cmd.extend_from_slice(&[0xAB; 8]);
        fifo.append(&cmd).unwrap();
        dec.decode(&mut fifo, false);
        assert!(fifo.is_drained());
        assert_eq!(dec.stats().load_xf_reg, 1);
    }

    #[test]
    fn copy_execute_records_an_xfb() {
        let mut dec = CountingDecoder::new(XfbConfig::default()).unwrap();
        let mut fifo = FifoBuffer::new(128);
        for cmd in [
            bp(BP_EFB_TOP_LEFT, 0),
            bp(BP_EFB_WIDTH_HEIGHT, (479 << 10) | 639),
            bp(BP_XFB_ADDR, 0x0010_0000 >> 5),
            bp(BP_DST_STRIDE, (640 * 2) >> 5),
            bp(BP_COPY_EXECUTE, COPY_TO_XFB),
        ] {
            fifo.append(&cmd).unwrap();
        }
        dec.decode(&mut fifo, false);

        assert_eq!(dec.stats().xfb_copies, 1);
        let handle = dec.xfb().handles()[0];
        let record = dec.xfb().record(handle).unwrap();
        assert_eq!(
            (record.address(), record.width(), record.height()),
            (0x0010_0000, 640, 480)
        );
    }
}
