//! Appointment availability and booking against an [`AppointmentBook`].
//!
//! Slots are generated in the business's local time from the configured
//! working hours, then filtered against existing active appointments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{
    DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc,
    Weekday,
};
use tracing::{error, info};
use voxline_config::{AssigneeRule, ConfigError, SchedulingConfig};
use voxline_core::error::ToolError;
use voxline_core::records::{Appointment, AppointmentBook, Scheduler};

/// Spoken back when the appointment list cannot be read.
pub const FETCH_FAILED: &str =
    "Failed to fetch appointments (tell customer to please try again later)";

const NO_SLOTS: &str = "No available slots found for the selected assignees.";
const AVAILABILITY_HEADER: &str = "#####Available appointments for customer:\n";

const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Validated scheduling settings.
#[derive(Debug, Clone)]
pub struct AvailabilityRules {
    pub offset: FixedOffset,
    pub slot: TimeDelta,
    pub days_ahead: u32,
    pub max_slots: usize,
    windows: HashMap<Weekday, (NaiveTime, NaiveTime)>,
    assignees: Vec<AssigneeRule>,
    default_assignees: Vec<String>,
}

impl AvailabilityRules {
    pub fn from_config(config: &SchedulingConfig) -> Result<Self, ConfigError> {
        let offset = FixedOffset::east_opt(config.utc_offset_hours * 3600).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "scheduling.utc_offset_hours {} is out of range",
                config.utc_offset_hours
            ))
        })?;
        if config.slot_hours == 0 {
            return Err(ConfigError::ValidationError(
                "scheduling.slot_hours must be at least 1".into(),
            ));
        }

        let windows = config
            .windows()?
            .into_iter()
            .map(|(day, start, end)| (day, (start, end)))
            .collect();

        Ok(Self {
            offset,
            slot: TimeDelta::hours(i64::from(config.slot_hours)),
            days_ahead: config.days_ahead,
            max_slots: config.max_slots,
            windows,
            assignees: config.assignees.clone(),
            default_assignees: config.default_assignees.clone(),
        })
    }

    /// Assignees for the first rule whose `matches` is a case-insensitive
    /// substring of `appointment_type`, else the defaults.
    pub fn assignees_for(&self, appointment_type: &str) -> &[String] {
        let wanted = appointment_type.to_lowercase();
        self.assignees
            .iter()
            .find(|rule| !rule.matches.is_empty() && wanted.contains(&rule.matches.to_lowercase()))
            .map(|rule| rule.assignees.as_slice())
            .unwrap_or(&self.default_assignees)
    }

    /// The business's calendar date at `now`.
    pub fn local_today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Parse a local date-time as the model writes it.
    pub fn parse_local(&self, text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        LOCAL_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .and_then(|naive| self.to_utc(naive))
    }

    fn to_utc(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        naive
            .and_local_timezone(self.offset)
            .single()
            .map(|local| local.with_timezone(&Utc))
    }
}

/// One bookable slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub assignee: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

/// Open slots from the day after `today` through `days_ahead` days out.
///
/// Each slot goes to the first assignee with no overlapping appointment.
/// Slots that would run past the end of the working window are skipped.
pub fn available_slots(
    rules: &AvailabilityRules,
    busy: &[Appointment],
    appointment_type: &str,
    today: NaiveDate,
) -> Vec<Slot> {
    let assignees = rules.assignees_for(appointment_type);
    let mut slots = Vec::new();

    for offset_days in 1..=u64::from(rules.days_ahead) {
        let Some(date) = today.checked_add_days(Days::new(offset_days)) else {
            break;
        };
        let Some(&(open, close)) = rules.windows.get(&date.weekday()) else {
            continue;
        };

        let close = date.and_time(close);
        let mut start = date.and_time(open);
        while start + rules.slot <= close {
            let end = start + rules.slot;
            if let (Some(start_utc), Some(end_utc)) = (rules.to_utc(start), rules.to_utc(end)) {
                let free = assignees.iter().find(|assignee| {
                    !busy.iter().any(|appt| {
                        &appt.assignee == *assignee
                            && appt.status.is_active()
                            && appt.overlaps(start_utc, end_utc)
                    })
                });
                if let Some(assignee) = free {
                    slots.push(Slot {
                        assignee: assignee.clone(),
                        start: start_utc.with_timezone(&rules.offset),
                        end: end_utc.with_timezone(&rules.offset),
                    });
                    if slots.len() >= rules.max_slots {
                        return slots;
                    }
                }
            }
            start = end;
        }
    }

    slots
}

/// Render slots as the text spoken to the model.
pub fn format_availability(slots: &[Slot]) -> String {
    if slots.is_empty() {
        return NO_SLOTS.to_string();
    }

    let lines: Vec<String> = slots
        .iter()
        .map(|slot| {
            format!(
                "{} is available {} from {} to {}",
                slot.assignee,
                slot.start.format("%A, %B %-d"),
                slot.start.format("%-I:%M %p"),
                slot.end.format("%-I:%M %p"),
            )
        })
        .collect();

    format!("{AVAILABILITY_HEADER}{}", lines.join("\n"))
}

/// [`Scheduler`] backed by a local appointment book.
pub struct LocalScheduler {
    book: Arc<dyn AppointmentBook>,
    rules: AvailabilityRules,
}

impl LocalScheduler {
    pub fn new(book: Arc<dyn AppointmentBook>, rules: AvailabilityRules) -> Self {
        Self { book, rules }
    }

    pub fn rules(&self) -> &AvailabilityRules {
        &self.rules
    }

    /// Availability as of `now`; split out so tests can pin the clock.
    pub async fn availability_at(
        &self,
        appointment_type: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ToolError> {
        let busy = match self.book.active_appointments().await {
            Ok(busy) => busy,
            Err(e) => {
                error!(error = %e, "Failed to fetch appointments");
                return Ok(FETCH_FAILED.to_string());
            }
        };

        let today = self.rules.local_today(now);
        let slots = available_slots(&self.rules, &busy, appointment_type, today);
        info!(
            appointment_type = %appointment_type,
            busy = busy.len(),
            slots = slots.len(),
            "Computed availability"
        );
        Ok(format_availability(&slots))
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn find_appointments(&self, appointment_type: &str) -> Result<String, ToolError> {
        self.availability_at(appointment_type, Utc::now()).await
    }

    async fn book_appointment(
        &self,
        assignee: &str,
        start: &str,
        end: &str,
    ) -> Result<Appointment, ToolError> {
        let unreadable =
            |what: &str, raw: &str| ToolError::InvalidArguments(format!("could not read the {what} time '{raw}'"));
        let start_at = self.rules.parse_local(start).ok_or_else(|| unreadable("start", start))?;
        let end_at = self.rules.parse_local(end).ok_or_else(|| unreadable("end", end))?;
        if end_at <= start_at {
            return Err(ToolError::InvalidArguments(
                "the end time must be after the start time".into(),
            ));
        }

        let busy = self.book.active_appointments().await?;
        if busy
            .iter()
            .any(|appt| appt.assignee == assignee && appt.overlaps(start_at, end_at))
        {
            return Err(ToolError::InvalidArguments(format!(
                "{assignee} is already booked at that time"
            )));
        }

        let appointment = self.book.create_appointment(assignee, start_at, end_at).await?;
        info!(
            appointment_id = %appointment.id,
            assignee = %assignee,
            start = %start_at,
            "Appointment created"
        );
        Ok(appointment)
    }
}
