//! Turnaround eligibility
//!
//! Decides whether rush and same-day speeds may be offered "now", judged in
//! a fixed reference timezone. Standard turnaround is always offered.
//! Eligibility is a privilege, never a requirement: anything unknown or
//! unset resolves to "not eligible".

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::models::{EligibilityRule, TurnaroundSpeed};

/// Cutoffs and reference timezone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityConfig {
    /// Rush must be ordered strictly before this local time
    pub rush_cutoff: NaiveTime,
    /// Same-day must be ordered strictly before this local time
    pub same_day_cutoff: NaiveTime,
    pub reference_offset: FixedOffset,
}

/// The four matrix criteria for one quote
///
/// A quote may hold several documents; every document type must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SameDayRequest {
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    /// Classified document types; empty while unclassified
    pub document_types: Vec<String>,
    pub intended_use: Option<String>,
}

/// Which expedited speeds are offerable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub rush: bool,
    pub same_day: bool,
}

impl Eligibility {
    /// Only standard turnaround (the fail-closed answer)
    pub fn standard_only() -> Self {
        Self::default()
    }

    pub fn allows(&self, speed: TurnaroundSpeed) -> bool {
        match speed {
            TurnaroundSpeed::Standard => true,
            TurnaroundSpeed::Rush => self.rush,
            TurnaroundSpeed::SameDay => self.same_day,
        }
    }
}

/// Resolver over a loaded calendar and matrix
#[derive(Debug, Clone)]
pub struct EligibilityResolver {
    config: EligibilityConfig,
    holidays: HashSet<NaiveDate>,
    matrix: Vec<EligibilityRule>,
}

impl EligibilityResolver {
    pub fn new(
        config: EligibilityConfig,
        holidays: impl IntoIterator<Item = NaiveDate>,
        matrix: Vec<EligibilityRule>,
    ) -> Self {
        Self {
            config,
            holidays: holidays.into_iter().collect(),
            matrix,
        }
    }

    fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.config.reference_offset)
    }

    pub fn rush_available(&self, now: DateTime<Utc>) -> bool {
        let local = self.local(now);
        is_weekday(local.weekday()) && local.time() < self.config.rush_cutoff
    }

    pub fn same_day_available(&self, now: DateTime<Utc>, request: &SameDayRequest) -> bool {
        let local = self.local(now);
        if !is_weekday(local.weekday()) || local.time() >= self.config.same_day_cutoff {
            return false;
        }
        if self.holidays.contains(&local.date_naive()) {
            return false;
        }
        self.matches_matrix(request)
    }

    pub fn evaluate(&self, now: DateTime<Utc>, request: &SameDayRequest) -> Eligibility {
        Eligibility {
            rush: self.rush_available(now),
            same_day: self.same_day_available(now, request),
        }
    }

    /// Every document type must match an active row together with the
    /// language pair and intended use
    fn matches_matrix(&self, request: &SameDayRequest) -> bool {
        let (Some(source), Some(target), Some(intended_use)) = (
            normalized(request.source_language.as_deref()),
            normalized(request.target_language.as_deref()),
            normalized(request.intended_use.as_deref()),
        ) else {
            return false;
        };
        if request.document_types.is_empty() {
            return false;
        }

        request.document_types.iter().all(|doc_type| {
            let Some(doc_type) = normalized(Some(doc_type)) else {
                return false;
            };
            self.matrix.iter().any(|rule| {
                rule.is_active
                    && key(&rule.source_language) == source
                    && key(&rule.target_language) == target
                    && key(&rule.document_type) == doc_type
                    && key(&rule.intended_use) == intended_use
            })
        })
    }
}

fn is_weekday(day: Weekday) -> bool {
    !matches!(day, Weekday::Sat | Weekday::Sun)
}

fn key(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn normalized(value: Option<&str>) -> Option<String> {
    value.map(key).filter(|v| !v.is_empty())
}
