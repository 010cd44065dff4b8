//! GATT characteristic payload decoding
//! This module turns raw notification payloads from standard fitness
//! characteristics into typed metric values.

use thiserror::Error;

/// Flag bit in the Heart Rate Measurement flags byte: value is 16-bit.
const HR_VALUE_FORMAT_U16: u8 = 0x01;

/// Flag bits in the CSC Measurement flags byte.
const CSC_WHEEL_DATA_PRESENT: u8 = 0x01;
const CSC_CRANK_DATA_PRESENT: u8 = 0x02;

/// Wheel revolution data is a u32 count followed by a u16 event time.
const CSC_WHEEL_DATA_LEN: usize = 6;

/// Crank event time resolution: 1/1024 s.
const CRANK_TIME_TICKS_PER_SEC: f64 = 1024.0;

/// A payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{characteristic} payload truncated: need {needed} bytes, got {actual}")]
    Truncated {
        characteristic: &'static str,
        needed: usize,
        actual: usize,
    },
}

fn require(characteristic: &'static str, data: &[u8], needed: usize) -> Result<(), DecodeError> {
    if data.len() < needed {
        return Err(DecodeError::Truncated {
            characteristic,
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}

fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Parses a Heart Rate Measurement (0x2A37) payload into beats per minute.
pub fn parse_heart_rate(data: &[u8]) -> Result<u16, DecodeError> {
    const NAME: &str = "heart rate measurement";
    require(NAME, data, 2)?;

    if data[0] & HR_VALUE_FORMAT_U16 != 0 {
        require(NAME, data, 3)?;
        Ok(read_u16_le(data, 1))
    } else {
        Ok(u16::from(data[1]))
    }
}

/// Parses a Cycling Power Measurement (0x2A63) payload into watts.
///
/// Instantaneous power is a signed value at offset 2; negative readings are
/// reported as 0.
pub fn parse_cycling_power(data: &[u8]) -> Result<u16, DecodeError> {
    require("cycling power measurement", data, 4)?;
    let power = i16::from_le_bytes([data[2], data[3]]);
    Ok(power.max(0) as u16)
}

/// Crank fields of a CSC Measurement (0x2A5B) payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrankSample {
    /// Cumulative crank revolutions.
    pub revolutions: u16,
    /// Last crank event time, in 1/1024 s.
    pub event_time: u16,
}

/// Extracts the crank sample from a CSC Measurement payload.
///
/// Returns `Ok(None)` when the flags say no crank data is present.
pub fn parse_csc_crank(data: &[u8]) -> Result<Option<CrankSample>, DecodeError> {
    const NAME: &str = "csc measurement";
    require(NAME, data, 1)?;

    let flags = data[0];
    if flags & CSC_CRANK_DATA_PRESENT == 0 {
        return Ok(None);
    }

    let offset = if flags & CSC_WHEEL_DATA_PRESENT != 0 {
        1 + CSC_WHEEL_DATA_LEN
    } else {
        1
    };
    require(NAME, data, offset + 4)?;

    Ok(Some(CrankSample {
        revolutions: read_u16_le(data, offset),
        event_time: read_u16_le(data, offset + 2),
    }))
}

/// Delta between two readings of a 16-bit counter that rolls over at 65536.
fn wrapping_delta(current: u16, previous: u16) -> u32 {
    u32::from(current.wrapping_sub(previous))
}

/// Cadence computation memory: the previous crank sample.
///
/// Cadence is a rate, so each sample is compared against the one before it.
/// The first sample after creation or [`CadenceTracker::reset`] only primes
/// the memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CadenceTracker {
    last_revolutions: Option<u16>,
    last_event_time: Option<u16>,
}

impl CadenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a crank sample and returns the cadence in rpm, if one can be
    /// computed from the previous sample.
    pub fn update(&mut self, sample: CrankSample) -> Option<u32> {
        let previous = self.last_revolutions.zip(self.last_event_time);

        self.last_revolutions = Some(sample.revolutions);
        self.last_event_time = Some(sample.event_time);

        let (prev_revs, prev_time) = previous?;
        let rev_delta = wrapping_delta(sample.revolutions, prev_revs);
        let time_delta = wrapping_delta(sample.event_time, prev_time);
        if time_delta == 0 {
            return None;
        }

        let rpm = f64::from(rev_delta) / f64::from(time_delta) * CRANK_TIME_TICKS_PER_SEC * 60.0;
        Some(rpm.round_ties_even() as u32)
    }

    /// Decodes a CSC Measurement payload and updates the memory.
    ///
    /// `Ok(None)` means "no cadence update": either no crank data or no
    /// rate could be computed yet.
    pub fn decode(&mut self, data: &[u8]) -> Result<Option<u32>, DecodeError> {
        Ok(parse_csc_crank(data)?.and_then(|sample| self.update(sample)))
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn last_revolutions(&self) -> Option<u16> {
        self.last_revolutions
    }

    pub fn last_event_time(&self) -> Option<u16> {
        self.last_event_time
    }
}
