use std::fmt;
use std::io;

/// LC3 can address 64K words of memory.
pub const MEMORY_MAX: usize = 0x10000;

/// Keyboard status register. Bit 15 is set while a character is pending.
pub const KBSR: u16 = 0xFE00;

/// Keyboard data register. Holds the most recently latched character.
pub const KBDR: u16 = 0xFE02;

/// Character-at-a-time device sitting behind the memory-mapped keyboard
/// registers.
pub trait InputSource {
    /// Non-blocking check for a pending character, consuming it from the
    /// source if one is available.
    fn poll(&mut self) -> Option<u8>;

    /// Blocking read of a single character.
    ///
    /// Returns [`io::ErrorKind::Interrupted`] if an interrupt request arrived
    /// while waiting.
    fn read(&mut self) -> io::Result<u8>;
}

/// System memory together with the keyboard device mapped into it.
///
/// Every address in `0..=0xFFFF` is valid storage; only reads of [`KBSR`]
/// have a side effect.
pub struct Memory {
    cells: Box<[u16; MEMORY_MAX]>,
    keyboard: Box<dyn InputSource>,
}

impl Memory {
    pub fn new(keyboard: Box<dyn InputSource>) -> Memory {
        Memory {
            cells: Box::new([0; MEMORY_MAX]),
            keyboard,
        }
    }

    /// Read the word at `addr`.
    ///
    /// Reading the keyboard status register first polls the device: a pending
    /// character sets the status high bit and is latched into the data
    /// register, otherwise the status register is cleared.
    pub fn read(&mut self, addr: u16) -> u16 {
        if addr == KBSR {
            match self.keyboard.poll() {
                Some(ch) => {
                    self.cells[KBSR as usize] = 1 << 15;
                    self.cells[KBDR as usize] = u16::from(ch);
                }
                None => self.cells[KBSR as usize] = 0,
            }
        }
        self.cells[addr as usize]
    }

    /// Store `val` at `addr`. Writes to the device registers are permitted
    /// and behave as plain stores.
    pub fn write(&mut self, addr: u16, val: u16) {
        self.cells[addr as usize] = val;
    }

    pub fn keyboard_mut(&mut self) -> &mut dyn InputSource {
        &mut *self.keyboard
    }

    /// Place a big-endian image into memory.
    ///
    /// The first word gives the origin; the payload is written sequentially
    /// from there. A payload reaching past the top of memory is clipped after
    /// address `0xFFFF` rather than wrapped into low memory. Images loaded
    /// later overwrite earlier ones at overlapping addresses.
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<(), ImageError> {
        if bytes.len() % 2 != 0 {
            return Err(ImageError::Unaligned);
        }
        let mut words = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        let orig = words.next().ok_or(ImageError::MissingOrigin)? as usize;

        // Zip stops at the end of memory, which clips an over-long payload.
        for (cell, word) in self.cells[orig..].iter_mut().zip(words) {
            *cell = word;
        }
        Ok(())
    }
}

/// Reasons an image cannot be placed into memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageError {
    /// The file is too short to contain an origin word.
    MissingOrigin,
    /// The file is not a whole number of 16-bit words.
    Unaligned,
}

impl std::error::Error for ImageError {}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingOrigin => write!(f, "file is missing an origin word"),
            Self::Unaligned => write!(f, "file is not aligned to 16 bits"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::io;

    use super::InputSource;

    /// Canned keyboard input for tests.
    pub(crate) struct Scripted(VecDeque<u8>);

    impl Scripted {
        pub(crate) fn new(bytes: &[u8]) -> Scripted {
            Scripted(bytes.iter().copied().collect())
        }

        pub(crate) fn empty() -> Scripted {
            Scripted(VecDeque::new())
        }
    }

    impl InputSource for Scripted {
        fn poll(&mut self) -> Option<u8> {
            self.0.pop_front()
        }

        fn read(&mut self) -> io::Result<u8> {
            self.0
                .pop_front()
                .ok_or_else(|| io::ErrorKind::UnexpectedEof.into())
        }
    }
}

#[cfg(test)]
mod test {
    use super::testing::Scripted;
    use super::*;

    fn empty_mem() -> Memory {
        Memory::new(Box::new(Scripted::empty()))
    }

    fn image(orig: u16, payload: &[u16]) -> Vec<u8> {
        let mut bytes = orig.to_be_bytes().to_vec();
        for word in payload {
            bytes.extend(word.to_be_bytes());
        }
        bytes
    }

    #[test]
    fn plain_read_write() {
        let mut mem = empty_mem();
        assert_eq!(mem.read(0x1234), 0);
        mem.write(0x1234, 0xBEEF);
        assert_eq!(mem.read(0x1234), 0xBEEF);
        mem.write(0xFFFF, 7);
        assert_eq!(mem.read(0xFFFF), 7);
    }

    #[test]
    fn status_read_latches_pending_character() {
        let mut mem = Memory::new(Box::new(Scripted::new(b"a")));
        assert_eq!(mem.read(KBSR), 1 << 15);
        assert_eq!(mem.read(KBDR), u16::from(b'a'));
        // Source is drained, so the next poll clears the status register.
        assert_eq!(mem.read(KBSR), 0);
        // The data register keeps the last latched character.
        assert_eq!(mem.read(KBDR), u16::from(b'a'));
    }

    #[test]
    fn device_register_writes_are_plain_stores() {
        let mut mem = empty_mem();
        mem.write(KBSR, 0xAAAA);
        mem.write(KBDR, 0x5555);
        assert_eq!(mem.read(KBDR), 0x5555);
        // Reading the status register polls and overwrites the stored value.
        assert_eq!(mem.read(KBSR), 0);
    }

    #[test]
    fn loads_payload_at_origin() {
        let mut mem = empty_mem();
        mem.load_image(&image(0x3000, &[0xF025, 0x0048])).unwrap();
        assert_eq!(mem.read(0x3000), 0xF025);
        assert_eq!(mem.read(0x3001), 0x0048);
        assert_eq!(mem.read(0x2FFF), 0);
        assert_eq!(mem.read(0x3002), 0);
    }

    #[test]
    fn later_image_overwrites_earlier() {
        let mut mem = empty_mem();
        mem.load_image(&image(0x3000, &[0x1111, 0x2222])).unwrap();
        mem.load_image(&image(0x3001, &[0x3333])).unwrap();
        assert_eq!(mem.read(0x3000), 0x1111);
        assert_eq!(mem.read(0x3001), 0x3333);
    }

    #[test]
    fn over_long_payload_is_clipped_at_top_of_memory() {
        let mut mem = empty_mem();
        mem.load_image(&image(0xFFFE, &[0xAAAA, 0xBBBB, 0xCCCC, 0xDDDD]))
            .unwrap();
        assert_eq!(mem.read(0xFFFE), 0xAAAA);
        // The very last word of memory is writable.
        assert_eq!(mem.read(0xFFFF), 0xBBBB);
        // Excess words are dropped, never wrapped into low memory.
        assert_eq!(mem.read(0x0000), 0);
        assert_eq!(mem.read(0x0001), 0);
    }

    #[test]
    fn empty_payload_is_valid() {
        let mut mem = empty_mem();
        mem.load_image(&image(0x3000, &[])).unwrap();
        assert_eq!(mem.read(0x3000), 0);
    }

    #[test]
    fn rejects_malformed_images() {
        let mut mem = empty_mem();
        assert_eq!(mem.load_image(&[]), Err(ImageError::MissingOrigin));
        assert_eq!(mem.load_image(&[0x30]), Err(ImageError::Unaligned));
        assert_eq!(
            mem.load_image(&[0x30, 0x00, 0xF0]),
            Err(ImageError::Unaligned)
        );
    }
}
