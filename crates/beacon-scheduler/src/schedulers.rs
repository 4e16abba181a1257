//! Scheduler definitions.
//!
//! A scheduler binds a trigger to a set of builders. Reactive schedulers
//! fire on matching changes, periodic schedulers on their own cadence and
//! manual schedulers only when an operator asks.

use crate::matcher::Matcher;
use beacon_core::change::{ChangeEvent, SCHEDULER_PROPERTY};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

/// Wall-clock cadence of a periodic scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cadence {
    /// Once a day at `hour:minute` UTC.
    Daily {
        hour: u32,
        #[serde(default)]
        minute: u32,
    },
    /// Six-field cron expression (`sec min hour day month weekday`).
    Cron { cron: String },
}

impl Cadence {
    pub fn daily(hour: u32, minute: u32) -> Self {
        Cadence::Daily { hour, minute }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Cadence::Daily { hour, minute } => {
                if *hour > 23 {
                    return Err(format!("hour {hour} is out of range"));
                }
                if *minute > 59 {
                    return Err(format!("minute {minute} is out of range"));
                }
                Ok(())
            }
            Cadence::Cron { cron } => cron::Schedule::from_str(cron)
                .map(|_| ())
                .map_err(|e| e.to_string()),
        }
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Cadence::Daily { hour, minute } => {
                let today = after
                    .date_naive()
                    .and_hms_opt(*hour, *minute, 0)?
                    .and_utc();
                if today > after {
                    Some(today)
                } else {
                    Some(today + Duration::days(1))
                }
            }
            Cadence::Cron { cron } => cron::Schedule::from_str(cron).ok()?.after(&after).next(),
        }
    }
}

/// Value of a scheduler-injected property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Static(String),
    /// Rendered from the fire time with a strftime format.
    Date { date: String },
}

impl PropertyValue {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            PropertyValue::Static(_) => Ok(()),
            PropertyValue::Date { date } => {
                if StrftimeItems::new(date).any(|item| matches!(item, Item::Error)) {
                    Err(format!("invalid date format {date:?}"))
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn render(&self, at: DateTime<Utc>) -> String {
        match self {
            PropertyValue::Static(value) => value.clone(),
            PropertyValue::Date { date } => {
                let mut out = String::new();
                // validated formats never fail; fall back to the raw format otherwise
                if write!(out, "{}", at.format(date)).is_err() {
                    return date.clone();
                }
                out
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Static(value.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum SchedulerKind {
    Reactive { matcher: Matcher },
    Periodic { cadence: Cadence },
    Manual,
}

impl SchedulerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerKind::Reactive { .. } => "reactive",
            SchedulerKind::Periodic { .. } => "periodic",
            SchedulerKind::Manual => "manual",
        }
    }
}

/// An assembled scheduler. `builders` holds resolved builder names in
/// factory order.
#[derive(Debug, Clone)]
pub struct Scheduler {
    pub name: String,
    pub kind: SchedulerKind,
    pub builders: Vec<String>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>, kind: SchedulerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            builders: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_builders<I, S>(mut self, builders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.builders.extend(builders.into_iter().map(Into::into));
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn is_periodic(&self) -> bool {
        matches!(self.kind, SchedulerKind::Periodic { .. })
    }

    pub fn cadence(&self) -> Option<&Cadence> {
        match &self.kind {
            SchedulerKind::Periodic { cadence } => Some(cadence),
            _ => None,
        }
    }

    /// Only reactive schedulers fire on changes.
    pub fn fires_on(&self, event: &ChangeEvent) -> bool {
        match &self.kind {
            SchedulerKind::Reactive { matcher } => matcher.matches(event),
            SchedulerKind::Periodic { .. } | SchedulerKind::Manual => false,
        }
    }

    /// Event properties overlaid with this scheduler's, which win on
    /// collision.
    pub fn properties_for(&self, event: &ChangeEvent, at: DateTime<Utc>) -> BTreeMap<String, String> {
        let mut merged = event.properties.clone();
        for (key, value) in &self.properties {
            merged.insert(key.clone(), value.render(at));
        }
        merged.insert(SCHEDULER_PROPERTY.to_string(), self.name.clone());
        merged
    }

    /// The change a periodic firing stands on: no files, no branch, the
    /// computed properties of this scheduler.
    pub fn synthesize(&self, project: &str, now: DateTime<Utc>) -> ChangeEvent {
        let mut event = ChangeEvent::synthetic(project).with_received_at(now);
        for (key, value) in &self.properties {
            event.properties.insert(key.clone(), value.render(now));
        }
        event
            .properties
            .insert(SCHEDULER_PROPERTY.to_string(), self.name.clone());
        event
    }
}
