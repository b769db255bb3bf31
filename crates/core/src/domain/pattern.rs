use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed registry of detectable consumption patterns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    FrequencyWeekly,
    FrequencyBiweekly,
    FrequencyMonthly,
    FrequencyQuarterly,
    SeasonalSummer,
    SeasonalWinter,
    VolumeBulk,
    VolumeFrequent,
    TemporalWeekend,
    TemporalEvening,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternFamily {
    Frequency,
    Seasonal,
    Volume,
    Temporal,
}

/// Expected spacing of a recurring purchase and how far the observed mean may drift from it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyBand {
    pub interval_days: f64,
    pub tolerance_days: f64,
    pub base_confidence: f64,
}

impl PatternKind {
    pub const ALL: [PatternKind; 10] = [
        Self::FrequencyWeekly,
        Self::FrequencyBiweekly,
        Self::FrequencyMonthly,
        Self::FrequencyQuarterly,
        Self::SeasonalSummer,
        Self::SeasonalWinter,
        Self::VolumeBulk,
        Self::VolumeFrequent,
        Self::TemporalWeekend,
        Self::TemporalEvening,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FrequencyWeekly => "frequency-weekly",
            Self::FrequencyBiweekly => "frequency-biweekly",
            Self::FrequencyMonthly => "frequency-monthly",
            Self::FrequencyQuarterly => "frequency-quarterly",
            Self::SeasonalSummer => "seasonal-summer",
            Self::SeasonalWinter => "seasonal-winter",
            Self::VolumeBulk => "volume-bulk",
            Self::VolumeFrequent => "volume-frequent",
            Self::TemporalWeekend => "temporal-weekend",
            Self::TemporalEvening => "temporal-evening",
        }
    }

    pub fn family(self) -> PatternFamily {
        match self {
            Self::FrequencyWeekly
            | Self::FrequencyBiweekly
            | Self::FrequencyMonthly
            | Self::FrequencyQuarterly => PatternFamily::Frequency,
            Self::SeasonalSummer | Self::SeasonalWinter => PatternFamily::Seasonal,
            Self::VolumeBulk | Self::VolumeFrequent => PatternFamily::Volume,
            Self::TemporalWeekend | Self::TemporalEvening => PatternFamily::Temporal,
        }
    }

    pub fn frequency_band(self) -> Option<FrequencyBand> {
        let (interval_days, tolerance_days, base_confidence) = match self {
            Self::FrequencyWeekly => (7.0, 2.0, 0.80),
            Self::FrequencyBiweekly => (14.0, 3.0, 0.75),
            Self::FrequencyMonthly => (30.0, 5.0, 0.85),
            Self::FrequencyQuarterly => (90.0, 10.0, 0.70),
            _ => return None,
        };
        Some(FrequencyBand { interval_days, tolerance_days, base_confidence })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum PatternData {
    Frequency {
        average_interval_days: f64,
        last_purchase: DateTime<Utc>,
        next_predicted_purchase: DateTime<Utc>,
    },
    Volume {
        average_quantity: f64,
        total_spent: f64,
    },
    Seasonal {
        multiplier: f64,
        peak_months: Vec<u32>,
        seasonal_increase_pct: f64,
    },
    Temporal {
        /// Share of the customer's purchases that fall in the flagged window, in percent.
        share_pct: f64,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternMetadata {
    pub sample_size: usize,
    pub consistency: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub kind: PatternKind,
    pub confidence: f64,
    pub data: PatternData,
    pub metadata: PatternMetadata,
}

impl Pattern {
    pub fn new(
        kind: PatternKind,
        confidence: f64,
        data: PatternData,
        metadata: PatternMetadata,
    ) -> Self {
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        Self { kind, confidence, data, metadata }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub next_purchase_date: Option<DateTime<Utc>>,
    pub next_purchase_quantity: Option<f64>,
    pub monthly_consumption: Option<f64>,
    pub seasonal_adjustment_pct: Option<f64>,
    pub replenishment_reminder: Option<DateTime<Utc>>,
    pub confidence: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightPriority {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternInsight {
    pub family: Option<PatternFamily>,
    pub message: String,
    pub action: String,
    pub priority: InsightPriority,
}
