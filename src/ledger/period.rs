//! Reporting period — one calendar month in the business time zone.

use std::fmt;

use chrono::{Datelike, FixedOffset, NaiveDate, Utc};

const MONTHS_PT: [&str; 12] = [
    "Janeiro",
    "Fevereiro",
    "Março",
    "Abril",
    "Maio",
    "Junho",
    "Julho",
    "Agosto",
    "Setembro",
    "Outubro",
    "Novembro",
    "Dezembro",
];

/// A reporting period, stored as the first day of its month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period(NaiveDate);

impl Period {
    /// The period that contains `date`.
    pub fn containing(date: NaiveDate) -> Self {
        Self(NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date))
    }

    /// The current period as seen from `offset`.
    pub fn current(offset: FixedOffset) -> Self {
        Self::containing(Utc::now().with_timezone(&offset).date_naive())
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    pub fn previous(&self) -> Self {
        match self.0.pred_opt() {
            Some(day) => Self::containing(day),
            None => *self,
        }
    }

    /// Human label, e.g. `Março/2026`.
    pub fn label(&self) -> String {
        let month = MONTHS_PT[self.0.month0() as usize];
        format!("{}/{}", month, self.0.year())
    }

    /// Label of the month before this one, the month a document refers to.
    pub fn label_previous(&self) -> String {
        self.previous().label()
    }

    /// Parse the stored `YYYY-MM-DD` form.
    pub fn parse(s: &str) -> Option<Self> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .map(Self::containing)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}
