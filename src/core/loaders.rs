//! Reader for the SeaFlow EVT binary event format.
//!
//! An EVT file is a little-endian binary stream: a `u32` event count
//! followed by one 24-byte row per event. Each row holds twelve `u16`
//! values; the first two are a row delimiter and the remaining ten are
//! the instrument channels.

use std::io::Read;

use flate2::read::GzDecoder;
use thiserror::Error;

/// Number of instrument channels per event row.
pub const CHANNEL_COUNT: usize = 10;

/// Values per row on disk: two delimiter words plus the channels.
const ROW_WORDS: usize = CHANNEL_COUNT + 2;

/// Bytes per event row on disk.
pub const ROW_BYTES: usize = ROW_WORDS * 2;

/// Errors that can occur while reading an EVT file.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing event count header")]
    MissingHeader,
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// One raw instrument measurement row.
///
/// Channel values are stored as recorded (u16) and widened to `f64` by the
/// accessor methods; all calibration arithmetic is done in double precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticleRecord {
    pub time: u16,
    pub pulse_width: u16,
    pub d1: u16,
    pub d2: u16,
    pub fsc_small: u16,
    pub fsc_perp: u16,
    pub fsc_big: u16,
    pub pe: u16,
    pub chl_small: u16,
    pub chl_big: u16,
}

impl ParticleRecord {
    fn from_words(w: &[u16; CHANNEL_COUNT]) -> Self {
        Self {
            time: w[0],
            pulse_width: w[1],
            d1: w[2],
            d2: w[3],
            fsc_small: w[4],
            fsc_perp: w[5],
            fsc_big: w[6],
            pe: w[7],
            chl_small: w[8],
            chl_big: w[9],
        }
    }

    /// Channel values in on-disk order.
    pub fn channels(&self) -> [u16; CHANNEL_COUNT] {
        [
            self.time,
            self.pulse_width,
            self.d1,
            self.d2,
            self.fsc_small,
            self.fsc_perp,
            self.fsc_big,
            self.pe,
            self.chl_small,
            self.chl_big,
        ]
    }

    #[inline]
    pub fn d1_f(&self) -> f64 {
        self.d1 as f64
    }

    #[inline]
    pub fn d2_f(&self) -> f64 {
        self.d2 as f64
    }

    #[inline]
    pub fn fsc_small_f(&self) -> f64 {
        self.fsc_small as f64
    }
}

/// Read EVT records from a raw (uncompressed) byte stream.
///
/// The declared event count bounds how many rows are parsed. A truncated
/// trailing row is skipped rather than treated as an error, so a file cut
/// short mid-transfer still yields its complete rows. A file too short to
/// contain the count header is an error.
pub fn read_evt<R: Read>(mut reader: R) -> Result<Vec<ParticleRecord>> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..])? {
            0 => return Err(LoaderError::MissingHeader),
            n => filled += n,
        }
    }
    let declared = u32::from_le_bytes(header) as usize;

    let mut records = Vec::with_capacity(declared.min(1 << 20));
    let mut row = [0u8; ROW_BYTES];

    while records.len() < declared {
        if !read_full(&mut reader, &mut row)? {
            // Truncated trailing row, keep what parsed so far.
            log::debug!(
                "EVT stream declared {} events but ended after {}",
                declared,
                records.len()
            );
            break;
        }

        let mut words = [0u16; CHANNEL_COUNT];
        for (i, w) in words.iter_mut().enumerate() {
            // Skip the two delimiter words at the start of the row.
            let at = (i + 2) * 2;
            *w = u16::from_le_bytes([row[at], row[at + 1]]);
        }
        records.push(ParticleRecord::from_words(&words));
    }

    Ok(records)
}

/// Read EVT records from a stream, decompressing when the key has a `.gz`
/// suffix.
pub fn read_evt_key<R: Read>(key: &str, reader: R) -> Result<Vec<ParticleRecord>> {
    if key.ends_with(".gz") {
        read_evt(GzDecoder::new(reader))
    } else {
        read_evt(reader)
    }
}

/// Fill `buf` completely. Returns `Ok(false)` on clean EOF at offset zero
/// or mid-buffer (a truncated row).
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => return Ok(false),
            n => filled += n,
        }
    }
    Ok(true)
}
