//! Daily operational report: per-day metric accumulation and rollover.

use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::OnlineUser;

/// Reported when a day produced no usable tick-rate samples.
pub const NOMINAL_TPS: u32 = 20;

/// Metrics accumulated since the last rollover.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DailyStat {
    #[serde(default)]
    pub first_joined: Vec<String>,
    #[serde(default)]
    pub tps: Vec<f64>,
    #[serde(default)]
    pub maximum_concurrent_users: usize,
}

impl DailyStat {
    /// Fold one stat tick into the day.
    pub fn record(&mut self, tps: f64, online: &[OnlineUser]) {
        for user in online.iter().filter(|u| !u.played_before) {
            if !self.first_joined.contains(&user.name) {
                self.first_joined.push(user.name.clone());
            }
        }
        self.tps.push(tps);
        self.maximum_concurrent_users = self.maximum_concurrent_users.max(online.len());
    }

    /// Floor of the mean sample; [`NOMINAL_TPS`] when nothing was sampled.
    pub fn average_tps(&self) -> u32 {
        let sum: f64 = self.tps.iter().sum();
        if self.tps.is_empty() || sum <= 0.0 {
            return NOMINAL_TPS;
        }
        (sum / self.tps.len() as f64).floor() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.tps.is_empty() && self.first_joined.is_empty() && self.maximum_concurrent_users == 0
    }
}

/// A finished day, ready to be rendered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DailyReport {
    pub day: i32,
    pub average_tps: u32,
    pub first_joined: Vec<String>,
    pub peak_users: usize,
}

impl DailyReport {
    fn from_stat(day: i32, stat: &DailyStat) -> Self {
        Self {
            day,
            average_tps: stat.average_tps(),
            first_joined: stat.first_joined.clone(),
            peak_users: stat.maximum_concurrent_users,
        }
    }

    pub fn render(&self, motd: &str) -> String {
        format!(
            "[ Daily report for {motd} ]\n\
             Average TPS: {}\n\
             First joined players: {}\n\
             Maximum concurrent users: {}",
            self.average_tps,
            self.first_joined.join(", "),
            self.peak_users
        )
    }
}

/// Accumulating ↔ rollover state machine keyed by calendar day.
#[derive(Clone, Debug, Default)]
pub struct DailyReportTracker {
    day: Option<i32>,
    stat: DailyStat,
}

impl DailyReportTracker {
    /// Restore from persisted state.
    pub fn new(day: Option<i32>, stat: DailyStat) -> Self {
        Self { day, stat }
    }

    pub fn day(&self) -> Option<i32> {
        self.day
    }

    pub fn stat(&self) -> &DailyStat {
        &self.stat
    }

    pub fn record(&mut self, tps: f64, online: &[OnlineUser]) {
        self.stat.record(tps, online);
    }

    /// Compare `today` with the stored marker.
    ///
    /// First call only stores the marker. On a change of day the accumulated
    /// stats are turned into a report and reset, whether or not anyone ends up
    /// receiving the report.
    pub fn check_rollover(&mut self, today: i32) -> Option<DailyReport> {
        match self.day {
            None => {
                self.day = Some(today);
                None
            }
            Some(day) if day == today => None,
            Some(day) => {
                let report = DailyReport::from_stat(day, &self.stat);
                self.stat = DailyStat::default();
                self.day = Some(today);
                Some(report)
            }
        }
    }
}

pub fn day_number(date: NaiveDate) -> i32 {
    date.num_days_from_ce()
}

/// Local calendar day as a day number.
pub fn today() -> i32 {
    day_number(Local::now().date_naive())
}
