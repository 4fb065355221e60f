//! Call bookkeeping and scheduling collaborators.
//!
//! The dispatcher never touches storage directly: it goes through these
//! traits, which are shared across all call sessions and must be safe for
//! concurrent use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RecordsError, ToolError};

/// Review state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Nothing actionable happened (yet).
    AutoClosed,
    /// A human should look at this call.
    PendingReview,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::AutoClosed => "auto_closed",
            CallStatus::PendingReview => "pending_review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto_closed" => Some(CallStatus::AutoClosed),
            "pending_review" => Some(CallStatus::PendingReview),
            _ => None,
        }
    }
}

/// What kind of call this turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallCategory {
    ProposedBooking,
    Other,
    Bug,
    AbruptHangup,
}

impl CallCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            CallCategory::ProposedBooking => "proposed_booking",
            CallCategory::Other => "other",
            CallCategory::Bug => "bug",
            CallCategory::AbruptHangup => "abrupt_hangup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposed_booking" => Some(CallCategory::ProposedBooking),
            "other" => Some(CallCategory::Other),
            "bug" => Some(CallCategory::Bug),
            "abrupt_hangup" => Some(CallCategory::AbruptHangup),
            _ => None,
        }
    }
}

/// Caller details collected by the `update_lead` tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

impl LeadDetails {
    /// A lead with a full name and email is a proposed booking.
    pub fn category(&self) -> CallCategory {
        let present = |field: &Option<String>| field.as_deref().is_some_and(|v| !v.trim().is_empty());
        if present(&self.first_name) && present(&self.last_name) && present(&self.email) {
            CallCategory::ProposedBooking
        } else {
            CallCategory::Other
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == LeadDetails::default()
    }
}

/// One call as tracked by the records store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub status: CallStatus,
    pub category: CallCategory,
    #[serde(flatten)]
    pub lead: LeadDetails,
    pub appointment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// A fresh call: assumed abandoned until the conversation says otherwise.
    pub fn open(call_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            status: CallStatus::AutoClosed,
            category: CallCategory::AbruptHangup,
            lead: LeadDetails::default(),
            appointment_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge lead fields; only fields present in `details` overwrite.
    pub fn apply_lead(&mut self, details: &LeadDetails) {
        fn merge(slot: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                *slot = Some(v.to_string());
            }
        }
        merge(&mut self.lead.call_reason, &details.call_reason);
        merge(&mut self.lead.first_name, &details.first_name);
        merge(&mut self.lead.last_name, &details.last_name);
        merge(&mut self.lead.email, &details.email);
        merge(&mut self.lead.phone_number, &details.phone_number);
        merge(&mut self.lead.address, &details.address);
        merge(&mut self.lead.postal_code, &details.postal_code);

        self.category = self.lead.category();
        self.status = CallStatus::PendingReview;
        self.updated_at = Utc::now();
    }

    /// The agent hung up deliberately.
    pub fn apply_end_call(&mut self) {
        self.status = CallStatus::PendingReview;
        if matches!(self.category, CallCategory::Bug | CallCategory::AbruptHangup) {
            self.category = CallCategory::Other;
        }
        self.updated_at = Utc::now();
    }

    /// The connection dropped without a normal close.
    pub fn apply_abandoned(&mut self) {
        if self.status == CallStatus::AutoClosed {
            self.category = CallCategory::Bug;
            self.updated_at = Utc::now();
        }
    }
}

/// Booking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Accepted,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Accepted => "accepted",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AppointmentStatus::Pending),
            "accepted" => Some(AppointmentStatus::Accepted),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }

    /// Blocks the assignee's calendar.
    pub fn is_active(self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub assignee: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AppointmentStatus,
}

impl Appointment {
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }
}

/// Per-call bookkeeping.
#[async_trait]
pub trait CallRecords: Send + Sync {
    /// Create the call record if it does not exist yet.
    async fn open_call(&self, call_id: &str) -> Result<CallRecord, RecordsError>;

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRecord>, RecordsError>;

    /// Finalize bookkeeping for a call the agent ended.
    async fn end_call(&self, call_id: &str) -> Result<(), RecordsError>;

    async fn update_lead(&self, call_id: &str, details: &LeadDetails) -> Result<(), RecordsError>;

    /// Booking linked to this call, if any.
    async fn linked_appointment(&self, call_id: &str) -> Result<Option<String>, RecordsError>;

    async fn link_appointment(&self, call_id: &str, appointment_id: &str) -> Result<(), RecordsError>;

    /// The call's connection dropped abnormally.
    async fn mark_abandoned(&self, call_id: &str) -> Result<(), RecordsError>;
}

/// Storage for appointments.
#[async_trait]
pub trait AppointmentBook: Send + Sync {
    /// Appointments that block a calendar (pending or accepted).
    async fn active_appointments(&self) -> Result<Vec<Appointment>, RecordsError>;

    /// Create a pending appointment.
    async fn create_appointment(
        &self,
        assignee: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Appointment, RecordsError>;
}

/// Availability lookup and booking as the tools see them.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Human-readable availability for an appointment type, spoken back
    /// to the caller verbatim.
    async fn find_appointments(&self, appointment_type: &str) -> Result<String, ToolError>;

    /// Book a slot. `start` and `end` are local date-times as the model
    /// produced them; unreadable values are `ToolError::InvalidArguments`.
    async fn book_appointment(
        &self,
        assignee: &str,
        start: &str,
        end: &str,
    ) -> Result<Appointment, ToolError>;
}
