//! Distribution expander — turns (method, count, window) into a schedule.
//!
//! Expansion is pure: the same method, count, window and seed always
//! produce the same ordered timestamps. Randomized methods draw from a
//! ScheduleRng; the transforms are:
//!
//!   uniform-random  t = start + round(u * span)
//!   front-loaded    t = start + round(u^k * span)
//!   back-loaded     t = start + round((1 - (1 - u)^k) * span)
//!
//! with u in [0, 1) and k = BIAS_EXPONENT. Output is clamped to the
//! window and sorted ascending.

use crate::{
    error::{SimError, SimResult},
    rng::ScheduleRng,
    types::EpochMillis,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Exponent of the power transform used by the biased methods.
pub const BIAS_EXPONENT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionMethod {
    Linear,
    UniformRandom,
    FrontLoaded,
    BackLoaded,
}

impl DistributionMethod {
    pub const ALL: [Self; 4] = [
        Self::Linear,
        Self::UniformRandom,
        Self::FrontLoaded,
        Self::BackLoaded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear        => "linear",
            Self::UniformRandom => "uniform-random",
            Self::FrontLoaded   => "front-loaded",
            Self::BackLoaded    => "back-loaded",
        }
    }

    /// Map a uniform draw in [0, 1) to a window fraction.
    fn shape(&self, u: f64) -> f64 {
        match self {
            Self::Linear | Self::UniformRandom => u,
            Self::FrontLoaded => u.powf(BIAS_EXPONENT),
            Self::BackLoaded  => 1.0 - (1.0 - u).powf(BIAS_EXPONENT),
        }
    }
}

impl FromStr for DistributionMethod {
    type Err = SimError;

    fn from_str(name: &str) -> SimResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "uniform-random" | "uniform_random" | "uniform" | "random" => Ok(Self::UniformRandom),
            "front-loaded" | "front_loaded" => Ok(Self::FrontLoaded),
            "back-loaded" | "back_loaded" => Ok(Self::BackLoaded),
            _ => Err(SimError::UnknownDistributionMethod(name.to_string())),
        }
    }
}

impl fmt::Display for DistributionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check the inputs shared by every method.
pub fn validate_window(count: i64, start: EpochMillis, end: EpochMillis) -> SimResult<()> {
    if count <= 0 {
        return Err(SimError::InvalidRecordCount(count));
    }
    if end < start {
        return Err(SimError::InvalidWindow { start, end });
    }
    Ok(())
}

/// Expand a method by name with an explicit seed.
pub fn expand(
    method: &str,
    count: i64,
    start: EpochMillis,
    end: EpochMillis,
    seed: u64,
) -> SimResult<Vec<EpochMillis>> {
    validate_window(count, start, end)?;
    let method: DistributionMethod = method.parse()?;
    expand_with(method, count, start, end, &mut ScheduleRng::new(seed))
}

/// Expand a parsed method, drawing from the supplied RNG.
pub fn expand_with(
    method: DistributionMethod,
    count: i64,
    start: EpochMillis,
    end: EpochMillis,
    rng: &mut ScheduleRng,
) -> SimResult<Vec<EpochMillis>> {
    validate_window(count, start, end)?;
    let span = i128::from(end) - i128::from(start);

    let mut out: Vec<EpochMillis> = match method {
        DistributionMethod::Linear => {
            let denom = i128::from((count - 1).max(1));
            (0..count)
                .map(|i| {
                    let offset = i128::from(i) * span / denom;
                    to_millis(i128::from(start) + offset, start, end)
                })
                .collect()
        }
        _ => (0..count)
            .map(|_| {
                let fraction = method.shape(rng.next_f64());
                let offset = (fraction * span as f64).round() as i128;
                to_millis(i128::from(start) + offset, start, end)
            })
            .collect(),
    };

    out.sort_unstable();
    Ok(out)
}

fn to_millis(t: i128, start: EpochMillis, end: EpochMillis) -> EpochMillis {
    t.clamp(i128::from(start), i128::from(end)) as EpochMillis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip() {
        for method in DistributionMethod::ALL {
            assert_eq!(method.as_str().parse::<DistributionMethod>().unwrap(), method);
        }
        assert_eq!(
            "Front_Loaded".parse::<DistributionMethod>().unwrap(),
            DistributionMethod::FrontLoaded
        );
    }

    #[test]
    fn shapes_stay_in_unit_interval() {
        for method in DistributionMethod::ALL {
            for u in [0.0, 0.25, 0.5, 0.75, 0.999_999] {
                let f = method.shape(u);
                assert!((0.0..=1.0).contains(&f), "{method} shape({u}) = {f}");
            }
        }
    }

    #[test]
    fn front_loaded_shape_is_exact_square() {
        assert_eq!(DistributionMethod::FrontLoaded.shape(0.5), 0.25);
        assert_eq!(DistributionMethod::BackLoaded.shape(0.5), 0.75);
    }
}
