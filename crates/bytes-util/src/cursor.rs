use std::io;

use bytes::Bytes;

/// Zero-copy extraction from a [`io::Cursor<Bytes>`].
pub trait BytesCursorExt {
    /// Extracts the next `size` bytes and advances the cursor past them.
    fn extract_bytes(&mut self, size: usize) -> io::Result<Bytes>;

    /// Extracts everything after the cursor position.
    fn extract_remaining(&mut self) -> Bytes;
}

impl BytesCursorExt for io::Cursor<Bytes> {
    fn extract_bytes(&mut self, size: usize) -> io::Result<Bytes> {
        let position = self.position() as usize;
        let end = position
            .checked_add(size)
            .filter(|end| *end <= self.get_ref().len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "not enough bytes"))?;

        let slice = self.get_ref().slice(position..end);
        self.set_position(end as u64);

        Ok(slice)
    }

    fn extract_remaining(&mut self) -> Bytes {
        let len = self.get_ref().len();
        let position = (self.position() as usize).min(len);
        let slice = self.get_ref().slice(position..);
        self.set_position(len as u64);
        slice
    }
}
