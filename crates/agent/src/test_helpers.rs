//! Shared fakes for turn tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{Notify, mpsc};
use voxline_core::error::{ProviderError, RecordsError, ToolError, TransportError};
use voxline_core::frame::{ResponseFrame, Transport};
use voxline_core::provider::{EventStream, GenerationEvent, Provider, ProviderRequest};
use voxline_core::records::{
    Appointment, AppointmentStatus, CallRecord, CallRecords, LeadDetails, Scheduler,
};

type Script = Vec<Result<GenerationEvent, ProviderError>>;

/// Replays one scripted stream per `stream()` call and records requests.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<GenerationEvent>>) -> Self {
        Self::with_results(
            scripts
                .into_iter()
                .map(|events| events.into_iter().map(Ok).collect())
                .collect(),
        )
    }

    pub fn with_results(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<EventStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::StreamInterrupted("no script left".into()))?;

        let (tx, rx) = mpsc::channel(script.len().max(1));
        for item in script {
            // capacity covers the whole script
            let _ = tx.try_send(item);
        }
        Ok(rx)
    }
}

/// Sends its events, then holds the stream open until the receiver is
/// dropped. `released` is notified once that happens.
pub struct HangingProvider {
    leading: Mutex<VecDeque<Vec<GenerationEvent>>>,
    events: Vec<GenerationEvent>,
    pub released: Arc<Notify>,
    calls: AtomicUsize,
}

impl HangingProvider {
    pub fn new(events: Vec<GenerationEvent>) -> Self {
        Self::after(Vec::new(), events)
    }

    /// Completes one `leading` stream per call before it starts hanging.
    pub fn after(leading: Vec<Vec<GenerationEvent>>, events: Vec<GenerationEvent>) -> Self {
        Self {
            leading: Mutex::new(leading.into()),
            events,
            released: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<EventStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(script) = self.leading.lock().unwrap().pop_front() {
            let (tx, rx) = mpsc::channel(script.len().max(1));
            for event in script {
                let _ = tx.try_send(Ok(event));
            }
            return Ok(rx);
        }

        let (tx, rx) = mpsc::channel(self.events.len().max(1));
        let events = self.events.clone();
        let released = self.released.clone();
        tokio::spawn(async move {
            for event in events {
                if tx.send(Ok(event)).await.is_err() {
                    break;
                }
            }
            tx.closed().await;
            released.notify_one();
        });
        Ok(rx)
    }
}

/// Collects every frame sent. Optionally refuses sends after `fail_after`,
/// or takes `delay` to deliver each frame.
#[derive(Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<ResponseFrame>>,
    fail_after: Option<usize>,
    delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(sent: usize) -> Self {
        Self {
            fail_after: Some(sent),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<ResponseFrame> {
        self.frames.lock().unwrap().clone()
    }

    /// Contents of the non-terminal frames, in order.
    pub fn spoken(&self) -> Vec<String> {
        self.frames()
            .into_iter()
            .filter(|f| !f.content_complete)
            .map(|f| f.content)
            .collect()
    }

    pub fn terminal_count(&self) -> usize {
        self.frames().iter().filter(|f| f.content_complete).count()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, frame: ResponseFrame) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut frames = self.frames.lock().unwrap();
        if self.fail_after.is_some_and(|limit| frames.len() >= limit) {
            return Err(TransportError::Closed);
        }
        frames.push(frame);
        Ok(())
    }
}

/// Call records that count what the tools asked of them.
#[derive(Default)]
pub struct CountingRecords {
    pub end_calls: AtomicUsize,
    pub leads: Mutex<Vec<LeadDetails>>,
    pub linked: Mutex<Option<String>>,
    pub fail_end_call: bool,
}

#[async_trait]
impl CallRecords for CountingRecords {
    async fn open_call(&self, call_id: &str) -> Result<CallRecord, RecordsError> {
        Ok(CallRecord::open(call_id))
    }

    async fn get_call(&self, _call_id: &str) -> Result<Option<CallRecord>, RecordsError> {
        Ok(None)
    }

    async fn end_call(&self, _call_id: &str) -> Result<(), RecordsError> {
        self.end_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_end_call {
            return Err(RecordsError::Storage("database is locked".into()));
        }
        Ok(())
    }

    async fn update_lead(&self, _call_id: &str, details: &LeadDetails) -> Result<(), RecordsError> {
        self.leads.lock().unwrap().push(details.clone());
        Ok(())
    }

    async fn linked_appointment(&self, _call_id: &str) -> Result<Option<String>, RecordsError> {
        Ok(self.linked.lock().unwrap().clone())
    }

    async fn link_appointment(&self, _call_id: &str, appointment_id: &str) -> Result<(), RecordsError> {
        *self.linked.lock().unwrap() = Some(appointment_id.to_string());
        Ok(())
    }

    async fn mark_abandoned(&self, _call_id: &str) -> Result<(), RecordsError> {
        Ok(())
    }
}

/// Scheduler that always has one slot and books anything.
#[derive(Default)]
pub struct CountingScheduler {
    pub lookups: AtomicUsize,
    pub bookings: AtomicUsize,
}

pub const SLOT_TEXT: &str =
    "#####Available appointments for customer:\nDana is available Friday, May 10 from 8:00 AM to 10:00 AM";

#[async_trait]
impl Scheduler for CountingScheduler {
    async fn find_appointments(&self, _appointment_type: &str) -> Result<String, ToolError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(SLOT_TEXT.to_string())
    }

    async fn book_appointment(&self, assignee: &str, _start: &str, _end: &str) -> Result<Appointment, ToolError> {
        let n = self.bookings.fetch_add(1, Ordering::SeqCst);
        Ok(Appointment {
            id: format!("appt-{}", n + 1),
            assignee: assignee.to_string(),
            start: Utc.with_ymd_and_hms(2024, 5, 10, 13, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 10, 15, 0, 0).unwrap(),
            status: AppointmentStatus::Pending,
        })
    }
}

/// Scheduler whose lookups never answer.
pub struct HangingScheduler;

#[async_trait]
impl Scheduler for HangingScheduler {
    async fn find_appointments(&self, _appointment_type: &str) -> Result<String, ToolError> {
        std::future::pending().await
    }

    async fn book_appointment(&self, _assignee: &str, _start: &str, _end: &str) -> Result<Appointment, ToolError> {
        std::future::pending().await
    }
}

/// Content events, one per fragment.
pub fn content(fragments: &[&str]) -> Vec<GenerationEvent> {
    fragments.iter().map(|f| GenerationEvent::content(*f)).collect()
}

/// A complete tool call split across a start fragment and argument chunks.
pub fn tool(id: &str, name: &str, argument_chunks: &[&str]) -> Vec<GenerationEvent> {
    let mut events = vec![GenerationEvent::tool_start(id, name)];
    events.extend(argument_chunks.iter().map(|c| GenerationEvent::tool_arguments(*c)));
    events
}
