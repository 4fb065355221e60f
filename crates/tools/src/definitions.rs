//! Function schemas advertised to the model.

use serde_json::json;
use voxline_core::provider::ToolDefinition;
use voxline_core::tool::ToolKind;

/// Every tool, in declaration order.
pub fn all_definitions() -> Vec<ToolDefinition> {
    ToolKind::ALL.into_iter().map(definition).collect()
}

/// Schema for one tool.
pub fn definition(kind: ToolKind) -> ToolDefinition {
    let (description, parameters) = match kind {
        ToolKind::EndCall => (
            "End the call. Use when the caller says goodbye or the conversation is finished.",
            json!({
                "type": "object",
                "properties": {
                    "message": message_property("Goodbye line spoken right before hanging up")
                }
            }),
        ),
        ToolKind::UpdateLead => (
            "Save details the caller has shared about themselves and why they are calling.",
            json!({
                "type": "object",
                "properties": {
                    "message": message_property("Optional line spoken while the details are saved"),
                    "lead_details": {
                        "type": "object",
                        "properties": {
                            "call_reason": { "type": "string", "description": "Why the caller is calling" },
                            "first_name": { "type": "string" },
                            "last_name": { "type": "string" },
                            "email": { "type": "string" },
                            "phone_number": { "type": "string" },
                            "address": { "type": "string" },
                            "postal_code": { "type": "string" }
                        },
                        "required": ["call_reason"]
                    }
                },
                "required": ["lead_details"]
            }),
        ),
        ToolKind::FindAppointments => (
            "Look up open appointment times for a type of service visit.",
            json!({
                "type": "object",
                "properties": {
                    "message": message_property("Line spoken while availability is checked, e.g. 'Let me check the calendar.'"),
                    "appointmentType": {
                        "type": "string",
                        "description": "The kind of equipment or service the visit is for"
                    }
                },
                "required": ["appointmentType"]
            }),
        ),
        ToolKind::BookAppointment => (
            "Book one of the available appointment times after the caller has confirmed it.",
            json!({
                "type": "object",
                "properties": {
                    "message": message_property("Line spoken while the booking is made"),
                    "assignee": {
                        "type": "string",
                        "description": "Technician named in the availability list"
                    },
                    "appointmentStart": {
                        "type": "string",
                        "description": "Local start time, formatted YYYY-MM-DD HH:MM"
                    },
                    "appointmentEnd": {
                        "type": "string",
                        "description": "Local end time, formatted YYYY-MM-DD HH:MM"
                    }
                },
                "required": ["assignee", "appointmentStart", "appointmentEnd"]
            }),
        ),
    };

    ToolDefinition {
        name: kind.name().to_string(),
        description: description.to_string(),
        parameters,
    }
}

fn message_property(description: &str) -> serde_json::Value {
    json!({ "type": "string", "description": description })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_definition_per_kind() {
        let names: Vec<_> = all_definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec!["end_call", "update_lead", "find_appointments", "book_appointment"]
        );
    }

    #[test]
    fn booking_requires_slot_fields() {
        let def = definition(ToolKind::BookAppointment);
        let required = def.parameters["required"].as_array().unwrap();
        assert_eq!(required.len(), 3);
        assert!(def.parameters["properties"]["message"].is_object());
    }
}
