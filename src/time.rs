//! Time bases and the time authority.
//!
//! Links express latencies and delays in whatever unit their component works
//! in ("2ns", "1.5GHz", ...). The [`TimeAuthority`] resolves those strings to
//! an integer number of core cycles per unit; a [`TimeConverter`] carries
//! that factor around.
//!
//! [`TimeLord`] is the reference authority. It parses SI values exactly
//! (no floating point) and rounds to the nearest core cycle.
//!
//! # Example
//!
//! ```
//! use simlink::time::{TimeAuthority, TimeLord};
//!
//! let lord = TimeLord::new("1ps").unwrap();
//! assert_eq!(lord.sim_cycles("1ns", "doc").unwrap(), 1000);
//! assert_eq!(lord.sim_cycles("2GHz", "doc").unwrap(), 500);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Cycle, SimTime};

/// Errors produced while parsing or resolving time bases.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    #[error("invalid time value '{0}'")]
    Parse(String),

    #[error("unknown unit '{unit}' in '{input}' (expected s or Hz with an SI prefix)")]
    UnknownUnit { unit: String, input: String },

    #[error("core time base '{0}' must be an integral number of attoseconds")]
    InvalidCoreTimeBase(String),

    #[error("time base '{input}' is finer than the core time base '{core}'")]
    TooFine { input: String, core: String },

    #[error("time value '{0}' is out of range")]
    Overflow(String),

    #[error("time value '{0}' is zero")]
    Zero(String),

    #[error("a time converter needs a non-zero factor")]
    ZeroFactor,
}

/// Physical unit of a parsed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    /// A period
    Seconds,
    /// A frequency, converted to its period
    Hertz,
}

/// An exactly-represented SI value: `mantissa × 10^exponent unit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UnitValue {
    pub mantissa: u128,
    pub exponent: i32,
    pub unit: TimeUnit,
}

const ATTO_EXPONENT: i32 = 18;

fn pow10(exp: u32, input: &str) -> Result<u128, TimeError> {
    10u128
        .checked_pow(exp)
        .ok_or_else(|| TimeError::Overflow(input.to_string()))
}

fn si_prefix(prefix: &str) -> Option<i32> {
    let exp = match prefix {
        "" => 0,
        "a" => -18,
        "f" => -15,
        "p" => -12,
        "n" => -9,
        "u" | "µ" => -6,
        "m" => -3,
        "k" => 3,
        "M" => 6,
        "G" => 9,
        "T" => 12,
        _ => return None,
    };
    Some(exp)
}

impl UnitValue {
    /// Parses values such as `1ns`, `2.5 GHz`, `1e-9s`.
    pub fn parse(input: &str) -> Result<Self, TimeError> {
        let s = input.trim();
        let bytes = s.as_bytes();
        let overflow = || TimeError::Overflow(input.to_string());

        let mut i = 0;
        let mut mantissa: u128 = 0;
        let mut exponent: i32 = 0;
        let mut seen_digit = false;
        let mut seen_dot = false;

        while i < bytes.len() {
            let c = bytes[i];
            if c.is_ascii_digit() {
                mantissa = mantissa
                    .checked_mul(10)
                    .and_then(|m| m.checked_add((c - b'0') as u128))
                    .ok_or_else(overflow)?;
                if seen_dot {
                    exponent -= 1;
                }
                seen_digit = true;
            } else if c == b'.' && !seen_dot {
                seen_dot = true;
            } else {
                break;
            }
            i += 1;
        }

        if !seen_digit {
            return Err(TimeError::Parse(input.to_string()));
        }

        // Optional scientific exponent, only when digits follow
        if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
            let mut j = i + 1;
            let negative = match bytes.get(j) {
                Some(b'-') => {
                    j += 1;
                    true
                }
                Some(b'+') => {
                    j += 1;
                    false
                }
                _ => false,
            };
            let start = j;
            let mut value: i32 = 0;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add((bytes[j] - b'0') as i32))
                    .ok_or_else(overflow)?;
                j += 1;
            }
            if j > start {
                exponent += if negative { -value } else { value };
                i = j;
            }
        }

        let unit_str = s[i..].trim();
        let (prefix, unit) = if let Some(prefix) = unit_str.strip_suffix("Hz") {
            (prefix, TimeUnit::Hertz)
        } else if let Some(prefix) = unit_str.strip_suffix('s') {
            (prefix, TimeUnit::Seconds)
        } else {
            return Err(TimeError::UnknownUnit {
                unit: unit_str.to_string(),
                input: input.to_string(),
            });
        };

        let prefix_exp = si_prefix(prefix).ok_or_else(|| TimeError::UnknownUnit {
            unit: unit_str.to_string(),
            input: input.to_string(),
        })?;

        Ok(Self {
            mantissa,
            exponent: exponent + prefix_exp,
            unit,
        })
    }

    /// Returns the period in attoseconds as an exact fraction `(num, den)`.
    pub fn period_attoseconds(&self, input: &str) -> Result<(u128, u128), TimeError> {
        if self.mantissa == 0 {
            return Err(TimeError::Zero(input.to_string()));
        }
        let overflow = || TimeError::Overflow(input.to_string());
        match self.unit {
            TimeUnit::Seconds => {
                let shift = self.exponent + ATTO_EXPONENT;
                if shift >= 0 {
                    let num = self
                        .mantissa
                        .checked_mul(pow10(shift as u32, input)?)
                        .ok_or_else(overflow)?;
                    Ok((num, 1))
                } else {
                    Ok((self.mantissa, pow10((-shift) as u32, input)?))
                }
            }
            TimeUnit::Hertz => {
                // period = 10^18 / (m × 10^e)
                let shift = ATTO_EXPONENT - self.exponent;
                if shift >= 0 {
                    Ok((pow10(shift as u32, input)?, self.mantissa))
                } else {
                    let den = self
                        .mantissa
                        .checked_mul(pow10((-shift) as u32, input)?)
                        .ok_or_else(overflow)?;
                    Ok((1, den))
                }
            }
        }
    }
}

impl FromStr for UnitValue {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Converts between a component time base and core cycles.
///
/// Serialized as its bare factor; a zero factor is rejected on the way in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "SimTime", into = "SimTime")]
pub struct TimeConverter {
    factor: SimTime,
}

impl TimeConverter {
    /// Creates a converter for `factor` core cycles per unit.
    ///
    /// Zero is reserved for "no time base" and yields
    /// [`TimeError::ZeroFactor`].
    pub fn new(factor: SimTime) -> Result<Self, TimeError> {
        if factor == 0 {
            return Err(TimeError::ZeroFactor);
        }
        Ok(Self { factor })
    }

    /// Core cycles per unit of this time base.
    #[inline]
    pub fn factor(&self) -> SimTime {
        self.factor
    }

    /// Converts a count in this time base to core cycles.
    #[inline]
    pub fn convert_to_core_time(&self, cycles: Cycle) -> Result<SimTime, TimeError> {
        cycles
            .checked_mul(self.factor)
            .ok_or_else(|| TimeError::Overflow(format!("{} cycles at x{}", cycles, self.factor)))
    }

    /// Converts core cycles to whole units of this time base (truncating).
    #[inline]
    pub fn convert_from_core_time(&self, time: SimTime) -> Cycle {
        time / self.factor
    }
}

impl TryFrom<SimTime> for TimeConverter {
    type Error = TimeError;

    fn try_from(factor: SimTime) -> Result<Self, Self::Error> {
        Self::new(factor)
    }
}

impl From<TimeConverter> for SimTime {
    fn from(tc: TimeConverter) -> Self {
        tc.factor
    }
}

impl fmt::Display for TimeConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeConverter(x{})", self.factor)
    }
}

/// Resolves time-base strings to core-cycle factors.
pub trait TimeAuthority: Send + Sync {
    /// Core cycles per unit of `timebase`. `caller` names the operation for
    /// diagnostics.
    fn sim_cycles(&self, timebase: &str, caller: &str) -> Result<SimTime, TimeError>;

    /// Returns a converter for an already-resolved factor.
    fn time_converter(&self, factor: SimTime) -> Result<TimeConverter, TimeError>;

    /// Resolves `timebase` straight to a converter.
    fn time_converter_for(&self, timebase: &str) -> Result<TimeConverter, TimeError> {
        self.time_converter(self.sim_cycles(timebase, "time_converter_for")?)
    }
}

/// Reference time authority anchored on a core time base such as `1ps`.
#[derive(Debug)]
pub struct TimeLord {
    timebase: String,
    core_attoseconds: u128,
    cache: Mutex<HashMap<String, SimTime>>,
}

impl TimeLord {
    /// Creates an authority whose core cycle lasts `timebase`.
    pub fn new(timebase: &str) -> Result<Self, TimeError> {
        let value = UnitValue::parse(timebase)?;
        let (num, den) = value.period_attoseconds(timebase)?;
        if num % den != 0 {
            return Err(TimeError::InvalidCoreTimeBase(timebase.to_string()));
        }
        let core_attoseconds = num / den;
        tracing::debug!(timebase, core_attoseconds, "time lord initialized");
        Ok(Self {
            timebase: timebase.trim().to_string(),
            core_attoseconds,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// The core time base string.
    pub fn timebase(&self) -> &str {
        &self.timebase
    }

    /// Length of one core cycle in attoseconds.
    pub fn core_attoseconds(&self) -> u128 {
        self.core_attoseconds
    }

    fn resolve(&self, timebase: &str) -> Result<SimTime, TimeError> {
        let value = UnitValue::parse(timebase)?;
        let (num, den) = value.period_attoseconds(timebase)?;
        let divisor = den
            .checked_mul(self.core_attoseconds)
            .ok_or_else(|| TimeError::Overflow(timebase.to_string()))?;
        // Round to nearest core cycle
        let factor = (num + divisor / 2) / divisor;
        if factor == 0 {
            return Err(TimeError::TooFine {
                input: timebase.to_string(),
                core: self.timebase.clone(),
            });
        }
        SimTime::try_from(factor).map_err(|_| TimeError::Overflow(timebase.to_string()))
    }
}

impl TimeAuthority for TimeLord {
    fn sim_cycles(&self, timebase: &str, caller: &str) -> Result<SimTime, TimeError> {
        if let Some(&factor) = self.cache.lock().get(timebase) {
            return Ok(factor);
        }
        let factor = self.resolve(timebase)?;
        tracing::trace!(timebase, caller, factor, "resolved time base");
        self.cache.lock().insert(timebase.to_string(), factor);
        Ok(factor)
    }

    fn time_converter(&self, factor: SimTime) -> Result<TimeConverter, TimeError> {
        TimeConverter::new(factor)
    }
}
