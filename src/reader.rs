use std::io::{self, Cursor, Read, Seek, SeekFrom};

use byteorder::{BE, LE, ReadBytesExt};

/// Cursor over a byte buffer whose endianness is decided at runtime by the
/// serialized file's header flag.
pub struct EndianReader<'a> {
    cursor: Cursor<&'a [u8]>,
    big_endian: bool,
}

impl<'a> EndianReader<'a> {
    pub fn new(data: &'a [u8], big_endian: bool) -> Self {
        EndianReader {
            cursor: Cursor::new(data),
            big_endian,
        }
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.cursor.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    /// Advances the cursor to the next 4-byte boundary.
    pub fn align4(&mut self) {
        let pos = self.cursor.position();
        self.cursor.set_position(pos.next_multiple_of(4));
    }

    pub fn u8(&mut self) -> io::Result<u8> {
        self.cursor.read_u8()
    }

    pub fn i8(&mut self) -> io::Result<i8> {
        self.cursor.read_i8()
    }

    pub fn bool(&mut self) -> io::Result<bool> {
        Ok(self.cursor.read_u8()? != 0)
    }

    pub fn u16(&mut self) -> io::Result<u16> {
        match self.big_endian {
            true => self.cursor.read_u16::<BE>(),
            false => self.cursor.read_u16::<LE>(),
        }
    }

    pub fn i16(&mut self) -> io::Result<i16> {
        match self.big_endian {
            true => self.cursor.read_i16::<BE>(),
            false => self.cursor.read_i16::<LE>(),
        }
    }

    pub fn u32(&mut self) -> io::Result<u32> {
        match self.big_endian {
            true => self.cursor.read_u32::<BE>(),
            false => self.cursor.read_u32::<LE>(),
        }
    }

    pub fn i32(&mut self) -> io::Result<i32> {
        match self.big_endian {
            true => self.cursor.read_i32::<BE>(),
            false => self.cursor.read_i32::<LE>(),
        }
    }

    pub fn u64(&mut self) -> io::Result<u64> {
        match self.big_endian {
            true => self.cursor.read_u64::<BE>(),
            false => self.cursor.read_u64::<LE>(),
        }
    }

    pub fn i64(&mut self) -> io::Result<i64> {
        match self.big_endian {
            true => self.cursor.read_i64::<BE>(),
            false => self.cursor.read_i64::<LE>(),
        }
    }

    pub fn f32(&mut self) -> io::Result<f32> {
        match self.big_endian {
            true => self.cursor.read_f32::<BE>(),
            false => self.cursor.read_f32::<LE>(),
        }
    }

    pub fn f64(&mut self) -> io::Result<f64> {
        match self.big_endian {
            true => self.cursor.read_f64::<BE>(),
            false => self.cursor.read_f64::<LE>(),
        }
    }

    pub fn bytes(&mut self, len: usize) -> io::Result<&'a [u8]> {
        let start = self.cursor.position() as usize;
        let data = *self.cursor.get_ref();
        let end = start
            .checked_add(len)
            .filter(|&end| end <= data.len())
            .ok_or(io::ErrorKind::UnexpectedEof)?;
        self.cursor.set_position(end as u64);
        Ok(&data[start..end])
    }

    pub fn skip(&mut self, len: u64) -> io::Result<()> {
        let pos = self.cursor.position().saturating_add(len);
        if pos > self.cursor.get_ref().len() as u64 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.cursor.set_position(pos);
        Ok(())
    }

    /// Reads a null-terminated string.
    pub fn cstr(&mut self) -> io::Result<String> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0];
            self.cursor.read_exact(&mut byte)?;
            if byte[0] == 0 {
                break;
            }
            buf.push(byte[0]);
        }
        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
