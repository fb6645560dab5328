//! The primitive binary codec.
//!
//! This is the only place integer and float wire formats are defined.
//!
//! - Unsigned integers: little-endian base-128 varints, 7 data bits per
//!   byte with the high bit set on continuation bytes.
//! - Signed integers: the bit pattern is reinterpreted as unsigned at the
//!   same width and varint-encoded. No zig-zag.
//! - 64-bit floats: raw IEEE-754 bits varint-encoded; 32-bit floats are
//!   widened to `f64` first and take the same path. Changing this is a
//!   wire-format break.
//! - Timestamps: signed nanosecond ticks relative to `UNIX_EPOCH`;
//!   durations: unsigned nanosecond ticks.
//! - Strings: varint UTF-8 byte length, then the raw bytes.
//! - Raw spans: no length prefix; the length comes from the caller's context.
//!
//! [`WireWrite`] and [`WireRead`] are object-safe so the graph engine can
//! route type-erased field writers through `&mut dyn` without
//! monomorphizing per output type; [`PrimitiveWriter`] and
//! [`PrimitiveReader`] are the concrete stream-backed implementations and
//! own the close-time padding protocol.

use std::io::{Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Result, SnapError};
use crate::format::padded_end;

/// Longest legal varint for a 64-bit value: ceil(64 / 7) bytes.
const MAX_VARINT_LEN: u32 = 10;

/// Byte-sink side of the primitive codec.
///
/// Implementors provide raw output and position tracking; every encoding
/// rule lives in the provided methods so all sinks agree on the format.
pub trait WireWrite {
    /// Appends raw bytes with no length prefix.
    fn put(&mut self, bytes: &[u8]) -> Result<()>;

    /// Current absolute stream position in bytes.
    fn position(&self) -> u64;

    /// Writes a single raw byte.
    fn put_u8(&mut self, byte: u8) -> Result<()> {
        self.put(&[byte])
    }

    /// Writes an unsigned value as a little-endian base-128 varint.
    fn put_varint(&mut self, mut value: u64) -> Result<()> {
        let mut buf = [0u8; MAX_VARINT_LEN as usize];
        let mut n = 0;
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                buf[n] = byte;
                n += 1;
                break;
            }
            buf[n] = byte | 0x80;
            n += 1;
        }
        self.put(&buf[..n])
    }

    /// Writes a signed value by reinterpreting its bits as unsigned.
    fn put_signed(&mut self, value: i64) -> Result<()> {
        self.put_varint(value as u64)
    }

    /// Writes a 64-bit float through its raw bit pattern.
    fn put_f64(&mut self, value: f64) -> Result<()> {
        self.put_varint(value.to_bits())
    }

    /// Writes a 32-bit float widened through the 64-bit bit-pattern path.
    fn put_f32(&mut self, value: f32) -> Result<()> {
        self.put_f64(f64::from(value))
    }

    /// Writes a string as a varint byte length followed by raw UTF-8.
    fn put_str(&mut self, value: &str) -> Result<()> {
        self.put_varint(value.len() as u64)?;
        self.put(value.as_bytes())
    }

    /// Writes a timestamp as signed nanosecond ticks from `UNIX_EPOCH`.
    fn put_time(&mut self, value: SystemTime) -> Result<()> {
        let ticks = match value.duration_since(UNIX_EPOCH) {
            Ok(d) => nanos_i64(d)?,
            Err(e) => -nanos_i64(e.duration())?,
        };
        self.put_signed(ticks)
    }

    /// Writes a duration as unsigned nanosecond ticks.
    fn put_duration(&mut self, value: Duration) -> Result<()> {
        let ticks = u64::try_from(value.as_nanos()).map_err(|_| {
            SnapError::Contract("duration exceeds the encodable tick range".into())
        })?;
        self.put_varint(ticks)
    }
}

fn nanos_i64(d: Duration) -> Result<i64> {
    i64::try_from(d.as_nanos())
        .map_err(|_| SnapError::Contract("timestamp exceeds the encodable tick range".into()))
}

/// Byte-source side of the primitive codec. Mirror of [`WireWrite`].
pub trait WireRead {
    /// Fills `buf` exactly.
    ///
    /// # Errors
    /// `UnexpectedEndOfStream` if the stream ends first.
    fn take(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Current absolute stream position in bytes.
    fn position(&self) -> u64;

    /// Reads a single raw byte.
    fn take_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.take(&mut b)?;
        Ok(b[0])
    }

    /// Reads a little-endian base-128 varint.
    fn take_varint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.take_u8()?;
            if shift >= MAX_VARINT_LEN * 7 {
                return Err(SnapError::StreamCorrupted("varint longer than 10 bytes".into()));
            }
            // The 10th byte may only carry the single remaining bit.
            if shift == 63 && byte > 1 {
                return Err(SnapError::StreamCorrupted("varint overflows 64 bits".into()));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Reads a signed value written by [`WireWrite::put_signed`].
    fn take_signed(&mut self) -> Result<i64> {
        Ok(self.take_varint()? as i64)
    }

    /// Reads a 64-bit float.
    fn take_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.take_varint()?))
    }

    /// Reads a 32-bit float written through the widened path.
    ///
    /// # Errors
    /// `StreamCorrupted` if the widened value is not representable as `f32`.
    fn take_f32(&mut self) -> Result<f32> {
        let wide = self.take_f64()?;
        let narrow = wide as f32;
        // NaN bit patterns aside, widening then narrowing is lossless for
        // values that originated as f32.
        if f64::from(narrow) != wide && !wide.is_nan() {
            return Err(SnapError::StreamCorrupted(
                "f32 slot holds a non-f32 value".into(),
            ));
        }
        Ok(narrow)
    }

    /// Reads a length-prefixed UTF-8 string.
    fn take_str(&mut self) -> Result<String> {
        let len = usize::try_from(self.take_varint()?)
            .map_err(|_| SnapError::StreamCorrupted("string length out of range".into()))?;
        // Read in bounded chunks so a corrupt length cannot trigger a huge
        // up-front allocation.
        let mut bytes = Vec::with_capacity(len.min(64 * 1024));
        let mut chunk = [0u8; 8 * 1024];
        let mut remaining = len;
        while remaining > 0 {
            let step = remaining.min(chunk.len());
            self.take(&mut chunk[..step])?;
            bytes.extend_from_slice(&chunk[..step]);
            remaining -= step;
        }
        String::from_utf8(bytes)
            .map_err(|_| SnapError::StreamCorrupted("string is not valid UTF-8".into()))
    }

    /// Reads a timestamp written by [`WireWrite::put_time`].
    fn take_time(&mut self) -> Result<SystemTime> {
        let ticks = self.take_signed()?;
        let abs = Duration::from_nanos(ticks.unsigned_abs());
        let time = if ticks >= 0 {
            UNIX_EPOCH.checked_add(abs)
        } else {
            UNIX_EPOCH.checked_sub(abs)
        };
        time.ok_or_else(|| SnapError::StreamCorrupted("timestamp out of range".into()))
    }

    /// Reads a duration written by [`WireWrite::put_duration`].
    fn take_duration(&mut self) -> Result<Duration> {
        Ok(Duration::from_nanos(self.take_varint()?))
    }
}

/// A position-tracking writer over any [`Write`] sink.
#[derive(Debug)]
pub struct PrimitiveWriter<W: Write> {
    inner: W,
    position: u64,
}

impl<W: Write> PrimitiveWriter<W> {
    /// Wraps a sink, starting the position count at zero.
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    /// Pads the stream with zero bytes up to the close boundary, flushes,
    /// and returns the underlying sink.
    pub fn close(mut self) -> Result<W> {
        let target = padded_end(self.position);
        let zeros = [0u8; 256];
        let mut remaining = target - self.position;
        while remaining > 0 {
            let step = remaining.min(zeros.len() as u64) as usize;
            self.put(&zeros[..step])?;
            remaining -= step as u64;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> WireWrite for PrimitiveWriter<W> {
    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// A position-tracking reader over any [`Read`] source.
#[derive(Debug)]
pub struct PrimitiveReader<R: Read> {
    inner: R,
    position: u64,
}

impl<R: Read> PrimitiveReader<R> {
    /// Wraps a source, starting the position count at zero.
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    /// Consumes the close-time padding the writer emitted and returns the
    /// underlying source, positioned at the boundary where a concatenated
    /// stream would begin.
    ///
    /// # Errors
    /// `StreamCorrupted` if any padding byte is non-zero;
    /// `UnexpectedEndOfStream` if the stream ends inside the padding.
    pub fn close(mut self) -> Result<R> {
        let target = padded_end(self.position);
        let mut chunk = [0u8; 256];
        while self.position < target {
            let step = ((target - self.position).min(chunk.len() as u64)) as usize;
            self.take(&mut chunk[..step])?;
            if chunk[..step].iter().any(|&b| b != 0) {
                return Err(SnapError::StreamCorrupted("non-zero padding byte".into()));
            }
        }
        Ok(self.inner)
    }
}

impl<R: Read> WireRead for PrimitiveReader<R> {
    fn take(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}
