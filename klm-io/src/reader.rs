//! Memory-mapped file readers.
//!
//! Raw event files are a little-endian `u32` stream:
//!
//! ```text
//! header:  MAGIC  VERSION  experiment  run
//! event:   event_number  n_coppers
//!          per copper: node_id  ttc_ctime  4 x (n_words  words...)
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use klm_core::NUM_FINESSE;
use klm_raw::{CopperRecord, RawEvent};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// "KLMR" read as a little-endian word.
pub const MAGIC: u32 = 0x524D_4C4B;
/// Current file layout version.
pub const VERSION: u32 = 1;
/// Header size in bytes.
pub const HEADER_BYTES: usize = 16;
/// Upper bound on COPPER records in one event; anything larger is corrupt.
pub const MAX_COPPERS: u32 = 64;

/// Run identification stored in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub experiment: u32,
    pub run: u32,
}

impl FileHeader {
    #[must_use]
    pub fn new(experiment: u32, run: u32) -> Self {
        Self { experiment, run }
    }

    /// Header words as written to disk.
    #[must_use]
    pub fn to_words(self) -> [u32; 4] {
        [MAGIC, VERSION, self.experiment, self.run]
    }
}

/// A memory-mapped file reader.
///
/// Uses memmap2 to access file contents without loading the entire file
/// into memory.
pub struct MappedFileReader {
    mmap: Arc<Mmap>,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap: Arc::new(mmap),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn word_at(data: &[u8], index: usize) -> Option<u32> {
    let start = index.checked_mul(4)?;
    let bytes = data.get(start..start + 4)?;
    <[u8; 4]>::try_from(bytes).ok().map(u32::from_le_bytes)
}

/// A raw event file reader with memory-mapped I/O.
pub struct RawEventFileReader {
    reader: MappedFileReader,
    header: FileHeader,
}

impl RawEventFileReader {
    /// Opens a raw event file and validates its header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped, is not a whole
    /// number of words, or carries a foreign magic or version.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = MappedFileReader::open(path)?;
        let data = reader.as_bytes();

        if data.len() % 4 != 0 {
            return Err(Error::InvalidFormat(format!(
                "file size {} is not a multiple of 4 (file: {})",
                data.len(),
                reader.path.display()
            )));
        }
        let (Some(magic), Some(version), Some(experiment), Some(run)) = (
            word_at(data, 0),
            word_at(data, 1),
            word_at(data, 2),
            word_at(data, 3),
        ) else {
            return Err(Error::InvalidFormat(format!(
                "file shorter than the {HEADER_BYTES}-byte header (file: {})",
                reader.path.display()
            )));
        };
        if magic != MAGIC {
            return Err(Error::InvalidFormat(format!(
                "bad magic {magic:#010x} (file: {})",
                reader.path.display()
            )));
        }
        if version != VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported version {version} (file: {})",
                reader.path.display()
            )));
        }

        Ok(Self {
            reader,
            header: FileHeader::new(experiment, run),
        })
    }

    #[must_use]
    pub fn header(&self) -> FileHeader {
        self.header
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.reader.len()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    /// Iterates over the events in file order.
    ///
    /// The first framing problem is yielded as an error and ends the
    /// iteration.
    #[must_use]
    pub fn events(&self) -> RawEventIter<'_> {
        RawEventIter {
            data: self.reader.as_bytes(),
            pos: HEADER_BYTES / 4,
            events_read: 0,
            failed: false,
        }
    }
}

/// Iterator returned by [`RawEventFileReader::events`].
pub struct RawEventIter<'a> {
    data: &'a [u8],
    /// Next word index.
    pos: usize,
    events_read: u64,
    failed: bool,
}

impl RawEventIter<'_> {
    fn next_word(&mut self) -> Result<u32> {
        let word = word_at(self.data, self.pos).ok_or(Error::Truncated {
            event: self.events_read,
            offset: self.pos * 4,
        })?;
        self.pos += 1;
        Ok(word)
    }

    fn read_event(&mut self) -> Result<RawEvent> {
        let data = self.data;
        let event_number = self.next_word()?;
        let n_coppers = self.next_word()?;
        if n_coppers > MAX_COPPERS {
            return Err(Error::InvalidFormat(format!(
                "event {event_number} claims {n_coppers} COPPER records"
            )));
        }

        let mut event = RawEvent::new(event_number);
        for _ in 0..n_coppers {
            let mut copper = CopperRecord::new(self.next_word()?, self.next_word()?);
            for finesse in 0..NUM_FINESSE {
                let n_words = self.next_word()? as usize;
                let end = self.pos.checked_add(n_words);
                let Some(bytes) = end.and_then(|end| data.get(self.pos * 4..end * 4)) else {
                    return Err(Error::Truncated {
                        event: self.events_read,
                        offset: self.pos * 4,
                    });
                };
                copper.buffers[finesse] = bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                self.pos += n_words;
            }
            event.coppers.push(copper);
        }
        Ok(event)
    }
}

impl Iterator for RawEventIter<'_> {
    type Item = Result<RawEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos * 4 >= self.data.len() {
            return None;
        }
        match self.read_event() {
            Ok(event) => {
                self.events_read += 1;
                Some(Ok(event))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
