//! Metric and outlier-method identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reportable aggregate. Percentile names follow the FPS convention: `P1` is
/// the slow tail, which is the 99th percentile of frame times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    Max,
    P99,
    P95,
    Average,
    Median,
    P5,
    P1,
    P0Dot2,
    P0Dot1,
    OnePercentLowAverage,
    ZeroDotTwoPercentLowAverage,
    ZeroDotOnePercentLowAverage,
    OnePercentLowIntegral,
    ZeroDotTwoPercentLowIntegral,
    ZeroDotOnePercentLowIntegral,
    Min,
    AdaptiveStd,
    None,
}

impl Metric {
    pub const ALL: [Metric; 18] = [
        Metric::Max,
        Metric::P99,
        Metric::P95,
        Metric::Average,
        Metric::Median,
        Metric::P5,
        Metric::P1,
        Metric::P0Dot2,
        Metric::P0Dot1,
        Metric::OnePercentLowAverage,
        Metric::ZeroDotTwoPercentLowAverage,
        Metric::ZeroDotOnePercentLowAverage,
        Metric::OnePercentLowIntegral,
        Metric::ZeroDotTwoPercentLowIntegral,
        Metric::ZeroDotOnePercentLowIntegral,
        Metric::Min,
        Metric::AdaptiveStd,
        Metric::None,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Max => "Max",
            Metric::P99 => "P99",
            Metric::P95 => "P95",
            Metric::Average => "Average",
            Metric::Median => "Median",
            Metric::P5 => "P5",
            Metric::P1 => "P1",
            Metric::P0Dot2 => "P0Dot2",
            Metric::P0Dot1 => "P0Dot1",
            Metric::OnePercentLowAverage => "OnePercentLowAverage",
            Metric::ZeroDotTwoPercentLowAverage => "ZeroDotTwoPercentLowAverage",
            Metric::ZeroDotOnePercentLowAverage => "ZeroDotOnePercentLowAverage",
            Metric::OnePercentLowIntegral => "OnePercentLowIntegral",
            Metric::ZeroDotTwoPercentLowIntegral => "ZeroDotTwoPercentLowIntegral",
            Metric::ZeroDotOnePercentLowIntegral => "ZeroDotOnePercentLowIntegral",
            Metric::Min => "Min",
            Metric::AdaptiveStd => "AdaptiveStd",
            Metric::None => "None",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Metric::Max => "Maximum",
            Metric::P99 => "99% percentile",
            Metric::P95 => "95% percentile",
            Metric::Average => "Average",
            Metric::Median => "Median",
            Metric::P5 => "5% percentile",
            Metric::P1 => "1% percentile",
            Metric::P0Dot2 => "0.2% percentile",
            Metric::P0Dot1 => "0.1% percentile",
            Metric::OnePercentLowAverage => "1% low average",
            Metric::ZeroDotTwoPercentLowAverage => "0.2% low average",
            Metric::ZeroDotOnePercentLowAverage => "0.1% low average",
            Metric::OnePercentLowIntegral => "1% low integral",
            Metric::ZeroDotTwoPercentLowIntegral => "0.2% low integral",
            Metric::ZeroDotOnePercentLowIntegral => "0.1% low integral",
            Metric::Min => "Minimum",
            Metric::AdaptiveStd => "Adaptive STDEV",
            Metric::None => "None",
        }
    }

    /// Label used in the live metric string.
    pub fn short_description(&self) -> &'static str {
        match self {
            Metric::Max => "Max",
            Metric::P99 => "P99",
            Metric::P95 => "P95",
            Metric::Average => "Avg",
            Metric::Median => "Med",
            Metric::P5 => "P5",
            Metric::P1 => "P1",
            Metric::P0Dot2 => "P0.2",
            Metric::P0Dot1 => "P0.1",
            Metric::OnePercentLowAverage => "1% Low Avg",
            Metric::ZeroDotTwoPercentLowAverage => "0.2% Low Avg",
            Metric::ZeroDotOnePercentLowAverage => "0.1% Low Avg",
            Metric::OnePercentLowIntegral => "1% Low Int",
            Metric::ZeroDotTwoPercentLowIntegral => "0.2% Low Int",
            Metric::ZeroDotOnePercentLowIntegral => "0.1% Low Int",
            Metric::Min => "Min",
            Metric::AdaptiveStd => "Adp STDEV",
            Metric::None => "None",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownName {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Metric {
    type Err = UnknownName;

    /// Accepts the variant name or the short label, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Metric::ALL
            .iter()
            .copied()
            .find(|m| {
                m.name().eq_ignore_ascii_case(wanted)
                    || m.short_description().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| UnknownName {
                kind: "metric",
                value: s.to_string(),
            })
    }
}

/// How a frame-time sequence is cleaned before reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutlierMethod {
    None,
    /// Drop everything at or above the 99.9th percentile.
    #[default]
    DeciPercentile,
    /// Tukey fences at 1.5 IQR.
    #[serde(rename = "iqr")]
    InterquartileRange,
    ThreeSigma,
    TwoDotFiveSigma,
}

impl OutlierMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutlierMethod::None => "none",
            OutlierMethod::DeciPercentile => "decipercentile",
            OutlierMethod::InterquartileRange => "iqr",
            OutlierMethod::ThreeSigma => "threesigma",
            OutlierMethod::TwoDotFiveSigma => "twodotfivesigma",
        }
    }
}

impl fmt::Display for OutlierMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutlierMethod {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "none" => Ok(OutlierMethod::None),
            "decipercentile" => Ok(OutlierMethod::DeciPercentile),
            "iqr" | "interquartilerange" => Ok(OutlierMethod::InterquartileRange),
            "threesigma" => Ok(OutlierMethod::ThreeSigma),
            "twodotfivesigma" => Ok(OutlierMethod::TwoDotFiveSigma),
            _ => Err(UnknownName {
                kind: "outlier method",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_from_name_or_label() {
        assert_eq!("P1".parse::<Metric>().unwrap(), Metric::P1);
        assert_eq!("average".parse::<Metric>().unwrap(), Metric::Average);
        assert_eq!("1% Low Avg".parse::<Metric>().unwrap(), Metric::OnePercentLowAverage);
        assert!("P42".parse::<Metric>().is_err());
    }

    #[test]
    fn test_outlier_method_names() {
        for method in [
            OutlierMethod::None,
            OutlierMethod::DeciPercentile,
            OutlierMethod::InterquartileRange,
            OutlierMethod::ThreeSigma,
            OutlierMethod::TwoDotFiveSigma,
        ] {
            assert_eq!(method.as_str().parse::<OutlierMethod>().unwrap(), method);
        }
        assert_eq!("Three_Sigma".parse::<OutlierMethod>().unwrap(), OutlierMethod::ThreeSigma);
        assert!("median".parse::<OutlierMethod>().is_err());
    }
}
