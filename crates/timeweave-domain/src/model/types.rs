//! Core type definitions for timeline generation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult, ErrorKind};

/// Maximum accepted length of a timeline name, in characters.
pub const MAX_NAME_LENGTH: usize = 200;

/// Normalizes a timeline name for identity comparisons: trimmed, lowercased.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A top-level request to build an event timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineRequest {
    /// Human-readable timeline name (e.g., "Suez canal incidents").
    pub name: String,
    /// Optional free-text description passed to the generator.
    #[serde(default)]
    pub description: Option<String>,
    /// Region or organization identifiers scoping the request.
    #[serde(default)]
    pub scope_ids: Vec<i64>,
    /// Inclusive start of the requested range.
    pub start: DateTime<Utc>,
    /// Inclusive end of the requested range.
    pub end: DateTime<Utc>,
    /// Identity of the requesting user.
    pub requester: String,
}

impl TimelineRequest {
    /// Creates a new request without description or scope.
    pub fn new(
        name: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        requester: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            scope_ids: Vec::new(),
            start,
            end,
            requester: requester.into(),
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the scope identifiers.
    pub fn with_scope_ids(mut self, scope_ids: Vec<i64>) -> Self {
        self.scope_ids = scope_ids;
        self
    }

    /// Validates the request.
    pub fn validate(&self) -> DomainResult<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(DomainError::validation(format!(
                "name exceeds {MAX_NAME_LENGTH} characters"
            )));
        }
        if self.requester.trim().is_empty() {
            return Err(DomainError::validation("requester cannot be empty"));
        }
        if self.start > self.end {
            return Err(DomainError::validation(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// One independently schedulable segment of a timeline request.
///
/// Immutable once created. The originating request is shared, not copied.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    /// Stable identifier (e.g., "seg-0-20240101-20240107").
    pub id: String,
    /// Position of this unit within its batch.
    pub index: usize,
    /// Inclusive start of the segment.
    pub start: DateTime<Utc>,
    /// Inclusive end of the segment.
    pub end: DateTime<Utc>,
    /// The request this unit was split from.
    pub context: Arc<TimelineRequest>,
}

impl WorkUnit {
    /// Creates a new work unit.
    pub fn new(
        id: impl Into<String>,
        index: usize,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        context: Arc<TimelineRequest>,
    ) -> Self {
        Self {
            id: id.into(),
            index,
            start,
            end,
            context,
        }
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} .. {}]", self.id, self.start, self.end)
    }
}

/// A single generated timeline event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Domain timestamp of the event; the merge order key.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl EventItem {
    /// Creates a new event with the required fields.
    pub fn new(id: impl Into<String>, title: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            timestamp,
            location: None,
            source: None,
            latitude: None,
            longitude: None,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the location name.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the source label.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the coordinates.
    pub fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// Returns the composite identity used to deduplicate merged payloads.
    pub fn merge_key(&self) -> EventKey {
        EventKey {
            title: self.title.clone(),
            timestamp: self.timestamp,
            location: self.location.clone().unwrap_or_default(),
        }
    }
}

/// Composite identity of an event: title, domain timestamp and location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub location: String,
}

/// Classified result of one segment call. Produced exactly once per unit.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The call returned a payload.
    Success {
        items: Vec<EventItem>,
        elapsed: Duration,
    },
    /// The call failed with a classified error.
    Failure {
        kind: ErrorKind,
        message: String,
        elapsed: Duration,
    },
    /// The call exceeded its deadline and was abandoned.
    Timeout { elapsed: Duration },
}

impl CallOutcome {
    /// Builds a failure outcome from a domain error.
    pub fn failure(error: &DomainError, elapsed: Duration) -> Self {
        CallOutcome::Failure {
            kind: error.kind(),
            message: error.to_string(),
            elapsed,
        }
    }

    /// Time spent producing this outcome.
    pub fn elapsed(&self) -> Duration {
        match self {
            CallOutcome::Success { elapsed, .. }
            | CallOutcome::Failure { elapsed, .. }
            | CallOutcome::Timeout { elapsed } => *elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }

    /// Consumes the outcome; failures and timeouts contribute no items.
    pub fn into_items(self) -> Vec<EventItem> {
        match self {
            CallOutcome::Success { items, .. } => items,
            CallOutcome::Failure { .. } | CallOutcome::Timeout { .. } => Vec::new(),
        }
    }
}
