use std::io::{self, Read, Stdin, Stdout, Write};

use crate::stream::{ByteStream, StreamError};

/// Console stream over a reader and a writer
#[derive(Debug)]
pub struct Console<R, W> {
    reader: R,
    writer: W,
}

impl Console<Stdin, Stdout> {
    /// Console bound to the process's stdin and stdout
    pub fn stdio() -> Self {
        Self::new(io::stdin(), io::stdout())
    }
}

impl<R: Read, W: Write> Console<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: Read, W: Write> ByteStream for Console<R, W> {
    fn put(&mut self, byte: u8) -> Result<(), StreamError> {
        self.writer.write_all(&[byte])?;
        self.writer.flush()?;
        Ok(())
    }

    fn get(&mut self) -> Result<Option<u8>, StreamError> {
        let mut buf = [0u8; 1];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
