//! Executes a completed tool call against the call's collaborators.
//!
//! The tool set is closed: every [`ToolKind`] is matched here, and a name
//! that does not parse to one is a [`ToolError::NotFound`].

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{info, warn};
use voxline_core::error::ToolError;
use voxline_core::records::{CallRecords, LeadDetails, Scheduler};
use voxline_core::tool::{ToolCall, ToolKind};

pub const MISSING_LEAD: &str = "Missing lead details. Please try again.";
pub const MISSING_ARGUMENTS: &str = "Missing function arguments. Please try again.";
pub const ALREADY_BOOKED: &str = "Appointment already booked. Let user know.";

/// Routes tool calls to call records and the scheduler.
pub struct ToolDispatcher {
    records: Arc<dyn CallRecords>,
    scheduler: Arc<dyn Scheduler>,
}

impl ToolDispatcher {
    pub fn new(records: Arc<dyn CallRecords>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self { records, scheduler }
    }

    /// Run `call` for the session `session_id`.
    ///
    /// On success the returned call carries its textual `result` (if the
    /// tool produces one) and `ends_call`.
    pub async fn dispatch(&self, session_id: &str, mut call: ToolCall) -> Result<ToolCall, ToolError> {
        let kind = call.kind()?;
        let started = Instant::now();

        call.ends_call = kind.ends_call();
        call.result = match kind {
            ToolKind::EndCall => {
                self.records.end_call(session_id).await?;
                None
            }
            ToolKind::UpdateLead => self.update_lead(session_id, &call).await?,
            ToolKind::FindAppointments => Some(self.find_appointments(&call).await?),
            ToolKind::BookAppointment => Some(self.book_appointment(session_id, &call).await?),
        };

        info!(
            session_id = %session_id,
            tool = %kind,
            call_id = %call.id,
            has_result = call.result.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool dispatched"
        );
        Ok(call)
    }

    async fn update_lead(&self, session_id: &str, call: &ToolCall) -> Result<Option<String>, ToolError> {
        // Models send either {"lead_details": {...}} or the fields flat
        let source = call
            .arguments
            .get("lead_details")
            .cloned()
            .unwrap_or_else(|| Value::Object(call.arguments.clone()));

        let lead = match serde_json::from_value::<LeadDetails>(source) {
            Ok(lead) if !lead.is_empty() => lead,
            Ok(_) => return Ok(Some(MISSING_LEAD.to_string())),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Unreadable lead details");
                return Ok(Some(MISSING_LEAD.to_string()));
            }
        };

        self.records.update_lead(session_id, &lead).await?;
        Ok(None)
    }

    async fn find_appointments(&self, call: &ToolCall) -> Result<String, ToolError> {
        let appointment_type = call
            .str_arg(&["appointmentType", "appointment_type"])
            .unwrap_or_default();
        self.scheduler.find_appointments(appointment_type).await
    }

    async fn book_appointment(&self, session_id: &str, call: &ToolCall) -> Result<String, ToolError> {
        let (Some(assignee), Some(start), Some(end)) = (
            call.str_arg(&["assignee"]),
            call.str_arg(&["appointmentStart", "appointment_start"]),
            call.str_arg(&["appointmentEnd", "appointment_end"]),
        ) else {
            return Ok(MISSING_ARGUMENTS.to_string());
        };

        if let Some(existing) = self.records.linked_appointment(session_id).await? {
            info!(session_id = %session_id, appointment_id = %existing, "Call already has an appointment");
            return Ok(ALREADY_BOOKED.to_string());
        }

        let appointment = match self.scheduler.book_appointment(assignee, start, end).await {
            Ok(appointment) => appointment,
            Err(ToolError::InvalidArguments(reason)) => {
                warn!(session_id = %session_id, reason = %reason, "Booking rejected");
                return Ok(format!(
                    "Could not book the appointment: {reason}. Please confirm the details with the customer."
                ));
            }
            Err(e) => return Err(e),
        };

        self.records.link_appointment(session_id, &appointment.id).await?;
        let details = serde_json::to_string(&appointment)
            .map_err(|e| ToolError::Scheduling(format!("could not serialize appointment: {e}")))?;
        Ok(format!("Appointment booked successfully! \n{details}"))
    }
}
