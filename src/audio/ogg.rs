//! # Ogg Container Analysis
//!
//! Recovers the playback duration of an Ogg/Opus voice note without decoding it.
//! The container is walked page by page; only headers and the `OpusHead` packet are read.
//!
//! ## Page Header Layout (27 bytes + segment table):
//! - `0..4`: capture pattern `OggS`
//! - `6..14`: granule position (LE u64)
//! - `18..22`: page sequence number (LE u32)
//! - `26`: segment count, followed by that many lacing bytes
//!
//! ## Duration:
//! `ceil((last_granule - pre_skip) / sample_rate)`, or `len / 2000` when no page carried a
//! granule position. Always clamped to 1..=300 seconds.

use crate::audio::waveform::{synthesize, WAVEFORM_LEN};
use crate::error::BridgeError;
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const OPUS_HEAD: &[u8; 8] = b"OpusHead";
const PAGE_HEADER_LEN: usize = 27;

const DEFAULT_SAMPLE_RATE: u32 = 48_000;
const FALLBACK_BYTES_PER_SECOND: usize = 2000;
const MIN_DURATION_SECS: u32 = 1;
const MAX_DURATION_SECS: u32 = 300;

/// Result of analyzing one voice note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioAnalysis {
    pub duration_seconds: u32,
    pub waveform: [u8; WAVEFORM_LEN],
}

/// One page of the container, borrowed from the input buffer.
#[derive(Debug, Clone, Copy)]
pub struct OggPage<'a> {
    pub granule_position: u64,
    pub sequence_number: u32,
    pub segment_table: &'a [u8],
    /// Whole page bytes starting at the capture pattern. Shorter than `declared_len()` when the
    /// buffer ends mid-page.
    pub bytes: &'a [u8],
}

impl<'a> OggPage<'a> {
    /// Parses the page whose capture pattern sits at the start of `data`.
    ///
    /// Returns `None` when the header or segment table runs past the end of the buffer.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() <= PAGE_HEADER_LEN || !data.starts_with(CAPTURE_PATTERN) {
            return None;
        }

        let segment_count = data[26] as usize;
        let table_end = PAGE_HEADER_LEN + segment_count;
        if table_end >= data.len() {
            return None;
        }

        let segment_table = &data[PAGE_HEADER_LEN..table_end];
        let page_len = table_end + segment_table.iter().map(|&b| b as usize).sum::<usize>();

        Some(Self {
            granule_position: LittleEndian::read_u64(&data[6..14]),
            sequence_number: LittleEndian::read_u32(&data[18..22]),
            segment_table,
            bytes: &data[..page_len.min(data.len())],
        })
    }

    /// Declared size of the page, header included.
    pub fn declared_len(&self) -> usize {
        PAGE_HEADER_LEN
            + self.segment_table.len()
            + self.segment_table.iter().map(|&b| b as usize).sum::<usize>()
    }

    /// `(pre_skip, sample_rate)` from an `OpusHead` packet inside this page.
    fn opus_head(&self) -> Option<(u16, u32)> {
        let marker = self
            .bytes
            .windows(OPUS_HEAD.len())
            .position(|w| w == OPUS_HEAD)?;
        // magic(8) version(1) channels(1) pre_skip(2) input_sample_rate(4)
        let fields = self.bytes.get(marker + 10..marker + 16)?;
        Some((
            LittleEndian::read_u16(&fields[0..2]),
            LittleEndian::read_u32(&fields[2..6]),
        ))
    }
}

/// Walks the buffer page by page, resynchronising one byte at a time on garbage.
struct Pages<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Pages<'a> {
    type Item = OggPage<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset + PAGE_HEADER_LEN < self.data.len() {
            let rest = &self.data[self.offset..];
            if !rest.starts_with(CAPTURE_PATTERN) {
                self.offset += 1;
                continue;
            }

            let page = OggPage::parse(rest)?;
            self.offset += page.declared_len();
            return Some(page);
        }
        None
    }
}

/// Analyze an Ogg/Opus buffer: duration in whole seconds plus a waveform envelope.
///
/// ## Errors:
/// - `AudioFormat` when the buffer does not start with `OggS` (this includes empty input)
///
/// Truncated or malformed pages after the first one are not errors; the scan stops or
/// resynchronises and the duration is computed from what was seen.
pub fn analyze(data: &[u8]) -> Result<AudioAnalysis, BridgeError> {
    if !data.starts_with(CAPTURE_PATTERN) {
        return Err(BridgeError::AudioFormat(
            "missing OggS signature".to_string(),
        ));
    }

    let mut last_granule = 0u64;
    let mut pre_skip = 0u16;
    let mut sample_rate = DEFAULT_SAMPLE_RATE;
    let mut found_head = false;

    let pages = Pages { data, offset: 0 };
    for page in pages {
        if !found_head && page.sequence_number <= 1 {
            if let Some((skip, rate)) = page.opus_head() {
                pre_skip = skip;
                if rate != 0 {
                    sample_rate = rate;
                }
                found_head = true;
                debug!(sample_rate, pre_skip, "Found OpusHead");
            }
        }

        if page.granule_position != 0 {
            last_granule = page.granule_position;
        }
    }

    if !found_head {
        warn!("OpusHead not found, using default sample rate");
    }

    let raw_duration = if last_granule > 0 {
        let samples = last_granule.saturating_sub(pre_skip as u64);
        let rate = sample_rate as u64;
        let secs = samples / rate + u64::from(samples % rate != 0);
        u32::try_from(secs).unwrap_or(u32::MAX)
    } else {
        warn!(bytes = data.len(), "No granule position found, estimating duration from size");
        u32::try_from(data.len() / FALLBACK_BYTES_PER_SECOND).unwrap_or(u32::MAX)
    };

    let duration_seconds = raw_duration.clamp(MIN_DURATION_SECS, MAX_DURATION_SECS);
    debug!(
        bytes = data.len(),
        last_granule, duration_seconds, "Analyzed Ogg container"
    );

    Ok(AudioAnalysis {
        duration_seconds,
        waveform: synthesize(duration_seconds),
    })
}
