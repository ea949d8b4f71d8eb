//! Typed I/O over substrate byte-files
//!
//! Every on-substrate format in this crate is big-endian. [`FileCursor`]
//! adapts a [`ByteFile`] to `std::io::Read`/`Write` so the `byteorder`
//! extension traits work directly on substrate files; the free functions
//! cover the length-prefixed UTF-8 string form shared by object records,
//! dictionary entries and property sets.

use std::io;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use basalt_core::{ByteFile, Error, Result};

/// Adapter exposing a [`ByteFile`] as `io::Read` + `io::Write`.
pub struct FileCursor<'a>(pub &'a mut dyn ByteFile);

fn to_io(err: Error) -> io::Error {
    match err {
        Error::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

impl io::Read for FileCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.0.size().saturating_sub(self.0.position());
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.0.read_exact(&mut buf[..n]).map_err(to_io)?;
        Ok(n)
    }
}

impl io::Write for FileCursor<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_all(buf).map_err(to_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read the whole file into memory.
pub fn read_all(file: &mut dyn ByteFile) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; file.size() as usize];
    file.set_position(0);
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Replace the whole file content.
pub fn write_replacing(file: &mut dyn ByteFile, bytes: &[u8]) -> Result<()> {
    file.set_size(bytes.len() as u64)?;
    file.set_position(0);
    file.write_all(bytes)
}

/// Read a length-prefixed UTF-8 string (`u16` big-endian length, then the
/// bytes) at the file cursor.
pub fn read_utf(file: &mut dyn ByteFile) -> Result<String> {
    let len = FileCursor(file).read_u16::<BigEndian>()?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| Error::Corruption("Invalid UTF-8 in string record".into()))
}

/// Write a length-prefixed UTF-8 string at the file cursor.
pub fn write_utf(file: &mut dyn ByteFile, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(Error::InvalidState(format!(
            "String of {} bytes exceeds the length-prefixed encoding",
            bytes.len()
        )));
    }
    FileCursor(file).write_u16::<BigEndian>(bytes.len() as u16)?;
    file.write_all(bytes)
}

/// Append a length-prefixed UTF-8 string to an in-memory buffer.
pub fn push_utf(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(Error::InvalidState(format!(
            "String of {} bytes exceeds the length-prefixed encoding",
            bytes.len()
        )));
    }
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

/// Decode a length-prefixed UTF-8 string from the front of a slice,
/// returning the string and the number of bytes consumed.
pub fn take_utf(buf: &[u8]) -> Result<(String, usize)> {
    if buf.len() < 2 {
        return Err(Error::Corruption("Truncated string record".into()));
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let end = 2 + len;
    if buf.len() < end {
        return Err(Error::Corruption("Truncated string record".into()));
    }
    let s = std::str::from_utf8(&buf[2..end])
        .map_err(|_| Error::Corruption("Invalid UTF-8 in string record".into()))?;
    Ok((s.to_string(), end))
}
