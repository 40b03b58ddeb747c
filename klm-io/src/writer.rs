//! File writers for raw events and histogram output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use klm_histogram::HistogramSet;
use klm_raw::RawEvent;
use log::info;

use crate::reader::FileHeader;
use crate::{Error, Result};

/// Writer for raw event files in the layout read by
/// [`RawEventFileReader`](crate::RawEventFileReader).
pub struct RawEventFileWriter {
    writer: BufWriter<File>,
    events: u64,
}

impl RawEventFileWriter {
    /// Creates the file and writes its header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn create<P: AsRef<Path>>(path: P, header: FileHeader) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        for word in header.to_words() {
            writer.write_all(&word.to_le_bytes())?;
        }
        Ok(Self { writer, events: 0 })
    }

    fn put(&mut self, word: u32) -> Result<()> {
        self.writer.write_all(&word.to_le_bytes())?;
        Ok(())
    }

    fn put_len(&mut self, len: usize, what: &str) -> Result<()> {
        let len = u32::try_from(len)
            .map_err(|_| Error::InvalidFormat(format!("{what} count {len} does not fit a word")))?;
        self.put(len)
    }

    /// Appends one event.
    ///
    /// # Errors
    /// Returns an error on I/O failure or if a count overflows a word.
    pub fn write_event(&mut self, event: &RawEvent) -> Result<()> {
        self.put(event.event_number)?;
        self.put_len(event.coppers.len(), "COPPER")?;
        for copper in &event.coppers {
            self.put(copper.node_id)?;
            self.put(copper.ttc_ctime)?;
            for buffer in &copper.buffers {
                self.put_len(buffer.len(), "word")?;
                for &word in buffer {
                    self.put(word)?;
                }
            }
        }
        self.events += 1;
        Ok(())
    }

    /// Events written so far.
    #[must_use]
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Flushes the writer.
    ///
    /// # Errors
    /// Returns an error if buffered data cannot be written.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes a histogram set as one JSON document.
///
/// # Errors
/// Returns an error if the file cannot be created or encoding fails.
pub fn write_histograms_json<P: AsRef<Path>>(path: P, histograms: &HistogramSet) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, histograms)?;
    writer.flush()?;
    info!(
        "wrote {} histograms ({} events) to {}",
        histograms.len(),
        histograms.events,
        path.display()
    );
    Ok(())
}

/// Reads a histogram set written by [`write_histograms_json`].
///
/// # Errors
/// Returns an error if the file cannot be read or decoded.
pub fn read_histograms_json<P: AsRef<Path>>(path: P) -> Result<HistogramSet> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}
