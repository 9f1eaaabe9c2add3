//! Cron-scheduled graph launches.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A graph that the master launches on a cron rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledGraph {
    /// Graph to launch (latest revision at trigger time).
    pub graph_name: String,
    /// Cron rule, classic five-field or six-field with seconds.
    pub schedule: String,
    /// When the schedule was created.
    pub schedule_created: DateTime<Utc>,
    /// Last time the scheduler fired for this graph.
    pub last_triggered: Option<DateTime<Utc>>,
}

impl ScheduledGraph {
    /// Validate the rule and build the schedule record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] if the rule does not parse.
    pub fn new(graph_name: impl Into<String>, rule: &str) -> Result<Self> {
        let scheduled = Self {
            graph_name: graph_name.into(),
            schedule: rule.to_string(),
            schedule_created: Utc::now(),
            last_triggered: None,
        };
        scheduled.parsed()?;
        Ok(scheduled)
    }

    /// Whether the rule has fired between the watermark (creation or last
    /// trigger, whichever is later) and `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchedule`] if the persisted rule no longer
    /// parses.
    pub fn should_trigger(&self, now: DateTime<Utc>) -> Result<bool> {
        let watermark = self
            .last_triggered
            .map_or(self.schedule_created, |t| t.max(self.schedule_created));
        let next = self.parsed()?.after(&watermark).next();
        Ok(next.is_some_and(|fire| fire <= now))
    }

    /// Record a trigger at `now`.
    pub fn mark_triggered(&mut self, now: DateTime<Utc>) {
        self.last_triggered = Some(now);
    }

    fn parsed(&self) -> Result<Schedule> {
        // The cron crate wants a seconds field; classic five-field rules get
        // one prepended so `* * * * *` keeps meaning every minute.
        let rule = if self.schedule.split_whitespace().count() == 5 {
            format!("0 {}", self.schedule)
        } else {
            self.schedule.clone()
        };
        Schedule::from_str(&rule).map_err(|err| Error::InvalidSchedule {
            rule: self.schedule.clone(),
            message: err.to_string(),
        })
    }
}
