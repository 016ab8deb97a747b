//! Biometric metrics reported by the agent
//!
//! A [`MetricsSnapshot`] holds the latest four readings. It is either produced
//! locally by [`MetricsSnapshot::mock`] (demo mode) or overwritten by `ml_data`
//! messages through [`MetricsSnapshot::apply`]. Only the last value is kept.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Breathing rate the stability gauge is centred on, in breaths per minute.
const IDEAL_BREATHING_RATE: f64 = 14.0;

/// Partial metrics record carried by an `ml_data` message.
///
/// Absent fields keep the previous snapshot value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breathing_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
}

impl MetricsUpdate {
    pub fn is_empty(&self) -> bool {
        self.stress_level.is_none()
            && self.breathing_rate.is_none()
            && self.confidence.is_none()
            && self.heart_rate.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Stress, 0-100 %.
    pub stress_level: f64,
    /// Breaths per minute.
    pub breathing_rate: f64,
    /// Model confidence, 0-100 %.
    pub confidence: f64,
    /// Beats per minute.
    pub heart_rate: f64,
    pub updated_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    pub fn new(stress_level: f64, breathing_rate: f64, confidence: f64, heart_rate: f64) -> Self {
        Self {
            stress_level,
            breathing_rate,
            confidence,
            heart_rate,
            updated_at: Utc::now(),
        }
    }

    /// Plausible pseudo-random readings for demo mode.
    pub fn mock<R: Rng>(rng: &mut R) -> Self {
        Self::new(
            rng.random_range(0.0..100.0),
            rng.random_range(12.0..20.0),
            rng.random_range(70.0..100.0),
            rng.random_range(60.0..100.0),
        )
    }

    /// Replace the snapshot with `update`, keeping previous values for absent fields.
    pub fn apply(&mut self, update: &MetricsUpdate) {
        *self = Self {
            stress_level: update.stress_level.unwrap_or(self.stress_level),
            breathing_rate: update.breathing_rate.unwrap_or(self.breathing_rate),
            confidence: update.confidence.unwrap_or(self.confidence),
            heart_rate: update.heart_rate.unwrap_or(self.heart_rate),
            updated_at: Utc::now(),
        };
    }

    pub fn stress_status(&self) -> Wellness {
        match self.stress_level {
            l if l < 20.0 => Wellness::Excellent,
            l if l < 40.0 => Wellness::Good,
            l if l < 60.0 => Wellness::Moderate,
            l if l < 80.0 => Wellness::Poor,
            _ => Wellness::Critical,
        }
    }

    pub fn breathing_status(&self) -> Wellness {
        let rate = self.breathing_rate;
        if (12.0..=16.0).contains(&rate) {
            Wellness::Excellent
        } else if (10.0..=18.0).contains(&rate) {
            Wellness::Good
        } else if (8.0..=20.0).contains(&rate) {
            Wellness::Moderate
        } else {
            Wellness::Poor
        }
    }

    pub fn confidence_status(&self) -> Wellness {
        match self.confidence {
            c if c > 80.0 => Wellness::Excellent,
            c if c > 60.0 => Wellness::Good,
            _ => Wellness::Moderate,
        }
    }

    /// Metric card status for stress.
    pub fn stress_card(&self) -> CardStatus {
        match self.stress_level {
            l if l < 30.0 => CardStatus::Low,
            l if l < 60.0 => CardStatus::Normal,
            l if l < 80.0 => CardStatus::High,
            _ => CardStatus::Critical,
        }
    }

    pub fn breathing_card(&self) -> CardStatus {
        if (12.0..=16.0).contains(&self.breathing_rate) {
            CardStatus::Normal
        } else {
            CardStatus::High
        }
    }

    pub fn confidence_card(&self) -> CardStatus {
        if self.confidence > 80.0 {
            CardStatus::Normal
        } else {
            CardStatus::Low
        }
    }

    pub fn heart_card(&self) -> CardStatus {
        if (60.0..=80.0).contains(&self.heart_rate) {
            CardStatus::Normal
        } else {
            CardStatus::High
        }
    }

    /// Colour of the stress progress bar.
    pub fn stress_tone(&self) -> Tone {
        match self.stress_level {
            l if l < 50.0 => Tone::Success,
            l if l < 75.0 => Tone::Warning,
            _ => Tone::Danger,
        }
    }

    /// How close breathing is to the ideal rate, 0-100 %.
    pub fn breathing_stability(&self) -> f64 {
        (100.0 - (self.breathing_rate - IDEAL_BREATHING_RATE).abs() * 10.0).max(0.0)
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stress {:.1}% ({}, {}, {}) | breathing {:.1} bpm ({}, {}, stability {:.0}%) | confidence {:.1}% ({}, {}) | heart {:.1} bpm ({})",
            self.stress_level,
            self.stress_card(),
            self.stress_status(),
            self.stress_tone(),
            self.breathing_rate,
            self.breathing_card(),
            self.breathing_status(),
            self.breathing_stability(),
            self.confidence,
            self.confidence_card(),
            self.confidence_status(),
            self.heart_rate,
            self.heart_card(),
        )
    }
}

/// Overall status shown for a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wellness {
    Excellent,
    Good,
    Moderate,
    Poor,
    Critical,
}

impl fmt::Display for Wellness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Wellness::Excellent => "excellent",
            Wellness::Good => "good",
            Wellness::Moderate => "moderate",
            Wellness::Poor => "poor",
            Wellness::Critical => "critical",
        })
    }
}

/// Status badge on a single metric card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardStatus {
    Low,
    Normal,
    High,
    Critical,
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CardStatus::Low => "low",
            CardStatus::Normal => "normal",
            CardStatus::High => "high",
            CardStatus::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Warning,
    Danger,
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tone::Success => "success",
            Tone::Warning => "warning",
            Tone::Danger => "danger",
        })
    }
}
