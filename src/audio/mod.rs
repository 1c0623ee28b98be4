//! # Audio Module
//!
//! Prepares outgoing voice notes. Voice notes must carry their duration and a
//! waveform envelope; both are derived here without any codec library.
//!
//! ## Key Components:
//! - **Ogg analyzer**: walks container pages to recover duration from granule positions
//! - **Waveform synthesizer**: deterministic 64-byte envelope from a duration
//!
//! Both are pure functions with no dependency on sessions.

pub mod ogg; // Container page scanning
pub mod waveform; // Envelope synthesis

pub use ogg::{analyze, AudioAnalysis};
pub use waveform::{synthesize, WAVEFORM_LEN};
