//! Byte-level primitives: MIDI variable-length quantities and a reader that
//! knows its own file offset.
//!
//! Fixed-width big-endian fields (chunk lengths, header words, the 3-byte tempo)
//! go through `byteorder` directly at the call sites.

use std::io::{self, Read, Take};

use crate::error::{Address, MidiError};

/// Largest value a four-byte variable-length quantity can carry.
pub const VARLEN_MAX: u64 = 0x0FFF_FFFF;

const VARLEN_MAX_BYTES: usize = 4;

/// Read a variable-length quantity, most significant 7-bit group first.
///
/// Running out of bytes mid-sequence surfaces as an `UnexpectedEof` I/O error;
/// callers turn that into `TruncatedStream` with the address they care about.
pub fn read_varlen<R: Read + ?Sized>(r: &mut R) -> Result<u64, MidiError> {
    let mut value: u64 = 0;
    for _ in 0..VARLEN_MAX_BYTES {
        let mut b = [0u8; 1];
        r.read_exact(&mut b)?;
        value = (value << 7) | u64::from(b[0] & 0x7F);
        if b[0] & 0x80 == 0 {
            return Ok(value);
        }
    }
    // A fifth continuation byte would push past the protocol ceiling.
    Err(MidiError::VarlenOverflow { value: value << 7 })
}

/// Append the minimal encoding of `value` (1 to 4 bytes) to `out`.
pub fn write_varlen(value: u64, out: &mut Vec<u8>) -> Result<(), MidiError> {
    if value > VARLEN_MAX {
        return Err(MidiError::VarlenOverflow { value });
    }
    let mut groups = [0u8; VARLEN_MAX_BYTES];
    let mut n = 0;
    let mut rest = value;
    loop {
        groups[n] = (rest & 0x7F) as u8;
        n += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    // groups[0] is the least significant and goes last, without the continuation bit.
    for i in (0..n).rev() {
        let cont = if i == 0 { 0 } else { 0x80 };
        out.push(groups[i] | cont);
    }
    Ok(())
}

/// Convenience wrapper returning a fresh buffer.
pub fn encode_varlen(value: u64) -> Result<Vec<u8>, MidiError> {
    let mut out = Vec::with_capacity(VARLEN_MAX_BYTES);
    write_varlen(value, &mut out)?;
    Ok(out)
}

/// Something that can report how far into the file it has read.
pub trait Tell {
    fn tell(&self) -> Address;
}

/// `Read` adapter counting consumed bytes from a base address.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    position: Address,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self::starting_at(inner, 0)
    }

    pub fn starting_at(inner: R, position: Address) -> Self {
        Self { inner, position }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Consume and discard `n` bytes, failing on a short read.
    pub fn skip(&mut self, n: u64) -> io::Result<()> {
        let copied = io::copy(&mut self.by_ref().take(n), &mut io::sink())?;
        if copied < n {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R> Tell for CountingReader<R> {
    fn tell(&self) -> Address {
        self.position
    }
}

impl<T: Tell + ?Sized> Tell for &mut T {
    fn tell(&self) -> Address {
        (**self).tell()
    }
}

impl<T: Tell> Tell for Take<T> {
    fn tell(&self) -> Address {
        self.get_ref().tell()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Result<u64, MidiError> {
        let mut r = bytes;
        read_varlen(&mut r)
    }

    #[test]
    fn known_encodings() {
        assert_eq!(encode_varlen(0).unwrap(), vec![0x00]);
        assert_eq!(encode_varlen(127).unwrap(), vec![0x7F]);
        assert_eq!(encode_varlen(128).unwrap(), vec![0x81, 0x00]);
        assert_eq!(encode_varlen(16384).unwrap(), vec![0x81, 0x80, 0x00]);
        assert_eq!(encode_varlen(VARLEN_MAX).unwrap(), vec![0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn decodes_at_group_boundaries() {
        for v in [0, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000, VARLEN_MAX] {
            assert_eq!(decode(&encode_varlen(v).unwrap()).unwrap(), v, "value {v:#X}");
        }
        assert_eq!(decode(&[0x81, 0x40]).unwrap(), 192);
    }

    #[test]
    fn decode_leaves_following_bytes() {
        let mut r: &[u8] = &[0x81, 0x00, 0x90];
        assert_eq!(read_varlen(&mut r).unwrap(), 128);
        assert_eq!(r, &[0x90]);
    }

    #[test]
    fn truncated_varlen_is_eof() {
        let err = decode(&[0x81, 0x80]).unwrap_err();
        assert!(matches!(err, MidiError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn overlong_varlen_is_rejected() {
        assert!(matches!(
            decode(&[0x80, 0x80, 0x80, 0x80, 0x00]),
            Err(MidiError::VarlenOverflow { .. })
        ));
        assert!(matches!(
            encode_varlen(VARLEN_MAX + 1),
            Err(MidiError::VarlenOverflow { value }) if value == VARLEN_MAX + 1
        ));
    }

    #[test]
    fn counting_reader_tracks_position_through_take() {
        let data = [1u8, 2, 3, 4, 5, 6];
        let mut r = CountingReader::starting_at(&data[..], 100);
        let mut two = [0u8; 2];
        r.read_exact(&mut two).unwrap();
        assert_eq!(r.tell(), 102);
        {
            let mut view = (&mut r).take(3);
            let mut one = [0u8; 1];
            view.read_exact(&mut one).unwrap();
            assert_eq!(view.tell(), 103);
            assert_eq!(view.limit(), 2);
        }
        r.skip(2).unwrap();
        assert_eq!(r.tell(), 105);
        assert!(r.skip(5).is_err());
    }
}
