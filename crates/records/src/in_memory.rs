//! In-memory store: useful for testing, the console chat, and deployments
//! where persistence isn't needed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;
use voxline_core::error::RecordsError;
use voxline_core::records::{
    Appointment, AppointmentBook, AppointmentStatus, CallRecord, CallRecords, LeadDetails,
};

/// Calls keyed by id plus a flat appointment list.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    calls: Arc<RwLock<HashMap<String, CallRecord>>>,
    appointments: Arc<RwLock<Vec<Appointment>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing appointment (tests and demos).
    pub async fn insert_appointment(&self, appointment: Appointment) {
        self.appointments.write().await.push(appointment);
    }

    pub async fn appointment_count(&self) -> usize {
        self.appointments.read().await.len()
    }

    async fn with_call<F>(&self, call_id: &str, update: F)
    where
        F: FnOnce(&mut CallRecord),
    {
        let mut calls = self.calls.write().await;
        let record = calls
            .entry(call_id.to_string())
            .or_insert_with(|| CallRecord::open(call_id));
        update(record);
    }
}

#[async_trait]
impl CallRecords for InMemoryStore {
    async fn open_call(&self, call_id: &str) -> Result<CallRecord, RecordsError> {
        let mut calls = self.calls.write().await;
        Ok(calls
            .entry(call_id.to_string())
            .or_insert_with(|| CallRecord::open(call_id))
            .clone())
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRecord>, RecordsError> {
        Ok(self.calls.read().await.get(call_id).cloned())
    }

    async fn end_call(&self, call_id: &str) -> Result<(), RecordsError> {
        self.with_call(call_id, CallRecord::apply_end_call).await;
        Ok(())
    }

    async fn update_lead(&self, call_id: &str, details: &LeadDetails) -> Result<(), RecordsError> {
        self.with_call(call_id, |record| record.apply_lead(details)).await;
        Ok(())
    }

    async fn linked_appointment(&self, call_id: &str) -> Result<Option<String>, RecordsError> {
        Ok(self
            .calls
            .read()
            .await
            .get(call_id)
            .and_then(|record| record.appointment_id.clone()))
    }

    async fn link_appointment(&self, call_id: &str, appointment_id: &str) -> Result<(), RecordsError> {
        self.with_call(call_id, |record| {
            record.appointment_id = Some(appointment_id.to_string());
            record.updated_at = Utc::now();
        })
        .await;
        Ok(())
    }

    async fn mark_abandoned(&self, call_id: &str) -> Result<(), RecordsError> {
        let mut calls = self.calls.write().await;
        match calls.get_mut(call_id) {
            Some(record) => {
                record.apply_abandoned();
                Ok(())
            }
            None => Err(RecordsError::CallNotFound(call_id.to_string())),
        }
    }
}

#[async_trait]
impl AppointmentBook for InMemoryStore {
    async fn active_appointments(&self) -> Result<Vec<Appointment>, RecordsError> {
        Ok(self
            .appointments
            .read()
            .await
            .iter()
            .filter(|a| a.status.is_active())
            .cloned()
            .collect())
    }

    async fn create_appointment(
        &self,
        assignee: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Appointment, RecordsError> {
        let appointment = Appointment {
            id: Uuid::new_v4().to_string(),
            assignee: assignee.to_string(),
            start,
            end,
            status: AppointmentStatus::Pending,
        };
        self.appointments.write().await.push(appointment.clone());
        Ok(appointment)
    }
}
