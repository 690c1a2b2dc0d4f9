//! Telemetry ingress (§4.6): the fixed 1488-byte wire frame and its
//! blocking, whole-frame read.
//!
//! 8-byte header + 9 `f32` pose/velocity/gyro fields + a `u32` lidar sample
//! count + 360 `f32` ranges = `8 + 36 + 4 + 1440 = 1488` bytes. The layout
//! mirrors the original simulator's `MtsTelemetryPacket`: raw ground-truth
//! position (`x, y, a`), commanded velocity (`vx, vy, va`), and the 3-axis
//! gyro (`gx, gy, gz`) — the stack only ever reads `gy` (yaw rate) and
//! derives `ds` from `x, y, vx` itself (§4.2), never trusting `a` directly.
//! This is "fucked up telemetry" by the original's own comment: ground-truth
//! pose is present on the wire but only used to emulate what a real encoder
//! would report, not read as the robot's pose.

use crate::error::{NavError, NavResult};
use std::io::Read;

pub const FRAME_SIZE: usize = 1488;
pub const BEAM_COUNT: usize = 360;

/// One parsed telemetry frame, before dead reckoning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub sequence: u64,
    pub x: f32,
    pub y: f32,
    pub a: f32,
    pub vx: f32,
    pub vy: f32,
    pub va: f32,
    pub gx: f32,
    pub gy: f32,
    pub gz: f32,
    pub lidar_count: u32,
    pub ranges: [f32; BEAM_COUNT],
}

impl TelemetryFrame {
    pub fn parse(buf: &[u8; FRAME_SIZE]) -> Self {
        let f32_at = |off: usize| f32::from_le_bytes(buf[off..off + 4].try_into().unwrap());

        let sequence = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let x = f32_at(8);
        let y = f32_at(12);
        let a = f32_at(16);
        let vx = f32_at(20);
        let vy = f32_at(24);
        let va = f32_at(28);
        let gx = f32_at(32);
        let gy = f32_at(36);
        let gz = f32_at(40);
        let lidar_count = u32::from_le_bytes(buf[44..48].try_into().unwrap());

        let mut ranges = [0f32; BEAM_COUNT];
        for (i, slot) in ranges.iter_mut().enumerate() {
            *slot = f32_at(48 + i * 4);
        }

        Self {
            sequence,
            x,
            y,
            a,
            vx,
            vy,
            va,
            gx,
            gy,
            gz,
            lidar_count,
            ranges,
        }
    }
}

/// Block until exactly `FRAME_SIZE` bytes are read and parsed, or return
/// `NavError::ShortRead`/`NavError::Ingress` on failure. A short read is
/// fatal per §7: the caller is expected to propagate it to process exit.
pub fn read_frame<R: Read>(reader: &mut R) -> NavResult<TelemetryFrame> {
    let mut buf = [0u8; FRAME_SIZE];
    let mut filled = 0usize;
    while filled < FRAME_SIZE {
        let n = reader.read(&mut buf[filled..]).map_err(NavError::Ingress)?;
        if n == 0 {
            return Err(NavError::ShortRead {
                expected: FRAME_SIZE,
                got: filled,
            });
        }
        filled += n;
    }
    Ok(TelemetryFrame::parse(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_frame_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; FRAME_SIZE];
        buf[0..8].copy_from_slice(&42u64.to_le_bytes());
        buf[8..12].copy_from_slice(&1.0f32.to_le_bytes()); // x
        buf[12..16].copy_from_slice(&2.0f32.to_le_bytes()); // y
        buf[16..20].copy_from_slice(&0.0f32.to_le_bytes()); // a
        buf[20..24].copy_from_slice(&0.9f32.to_le_bytes()); // vx
        buf[36..40].copy_from_slice(&1.5f32.to_le_bytes()); // gy
        buf[44..48].copy_from_slice(&(BEAM_COUNT as u32).to_le_bytes());
        for i in 0..BEAM_COUNT {
            let off = 48 + i * 4;
            buf[off..off + 4].copy_from_slice(&(i as f32).to_le_bytes());
        }
        buf
    }

    #[test]
    fn parses_full_frame_correctly() {
        let bytes = sample_frame_bytes();
        let mut cursor = Cursor::new(bytes);
        let frame = read_frame(&mut cursor).unwrap();
        assert_eq!(frame.sequence, 42);
        assert_eq!(frame.x, 1.0);
        assert_eq!(frame.y, 2.0);
        assert_eq!(frame.vx, 0.9);
        assert_eq!(frame.gy, 1.5);
        assert_eq!(frame.lidar_count, BEAM_COUNT as u32);
        assert_eq!(frame.ranges[0], 0.0);
        assert_eq!(frame.ranges[359], 359.0);
    }

    #[test]
    fn short_read_before_any_bytes_is_fatal() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = read_frame(&mut cursor).unwrap_err();
        match err {
            NavError::ShortRead { expected, got } => {
                assert_eq!(expected, FRAME_SIZE);
                assert_eq!(got, 0);
            }
            other => panic!("expected ShortRead, got {other:?}"),
        }
    }

    #[test]
    fn short_read_mid_frame_is_fatal() {
        let bytes = sample_frame_bytes();
        let truncated = &bytes[..100];
        let mut cursor = Cursor::new(truncated.to_vec());
        let err = read_frame(&mut cursor).unwrap_err();
        match err {
            NavError::ShortRead { got, .. } => assert_eq!(got, 100),
            other => panic!("expected ShortRead, got {other:?}"),
        }
    }

    #[test]
    fn reads_frame_delivered_across_multiple_chunks() {
        // Cursor's Read impl can still return the whole buffer in one call;
        // wrap it in a reader that dribbles bytes out a few at a time.
        struct Dribble(Cursor<Vec<u8>>);
        impl Read for Dribble {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let n = buf.len().min(7);
                self.0.read(&mut buf[..n])
            }
        }
        let mut reader = Dribble(Cursor::new(sample_frame_bytes()));
        let frame = read_frame(&mut reader).unwrap();
        assert_eq!(frame.sequence, 42);
        assert_eq!(frame.ranges[359], 359.0);
    }
}
