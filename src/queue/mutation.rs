// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transport::{Method, Request, IDEMPOTENCY_KEY_HEADER};

/// Replay priority. Ordered so that `High < Medium < Low`, i.e. ascending
/// order is replay order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// A write, with the payload its kind carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationOp {
    Create { payload: serde_json::Value },
    Update { payload: serde_json::Value },
    Delete,
}

impl MutationOp {
    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::Create { .. } => Method::Post,
            Self::Update { .. } => Method::Put,
            Self::Delete => Method::Delete,
        }
    }

    #[must_use]
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Create { payload } | Self::Update { payload } => Some(payload),
            Self::Delete => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete => "delete",
        }
    }
}

/// What the host submits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    #[serde(flatten)]
    pub op: MutationOp,
    pub endpoint: String,
    #[serde(default)]
    pub priority: Priority,
}

impl MutationRequest {
    pub fn create(endpoint: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            op: MutationOp::Create { payload },
            endpoint: endpoint.into(),
            priority: Priority::default(),
        }
    }

    pub fn update(endpoint: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            op: MutationOp::Update { payload },
            endpoint: endpoint.into(),
            priority: Priority::default(),
        }
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self {
            op: MutationOp::Delete,
            endpoint: endpoint.into(),
            priority: Priority::default(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Request for a first, direct attempt. Carries no idempotency key;
    /// one is attached once the mutation has an id.
    #[must_use]
    pub fn to_request(&self) -> Request {
        build_request(&self.op, &self.endpoint)
    }
}

/// A mutation waiting in the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: Uuid,
    #[serde(flatten)]
    pub op: MutationOp,
    pub endpoint: String,
    pub priority: Priority,
    pub created_at_ms: u64,
    pub retry_count: u32,
    /// Enqueue sequence; breaks priority ties in FIFO order.
    pub seq: u64,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Permanently refused by the server. Kept, but skipped by drains.
    #[serde(default)]
    pub rejected: bool,
}

impl QueuedMutation {
    pub(crate) fn new(request: MutationRequest, created_at_ms: u64, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            op: request.op,
            endpoint: request.endpoint,
            priority: request.priority,
            created_at_ms,
            retry_count: 0,
            seq,
            last_error: None,
            rejected: false,
        }
    }

    /// Replay request, keyed by the mutation id so the server can drop
    /// duplicates of an at-least-once delivery.
    #[must_use]
    pub fn to_request(&self) -> Request {
        build_request(&self.op, &self.endpoint).with_header(IDEMPOTENCY_KEY_HEADER, self.id.to_string())
    }

    /// Sort key giving priority-major, FIFO-minor order.
    #[must_use]
    pub fn replay_key(&self) -> (Priority, u64) {
        (self.priority, self.seq)
    }
}

fn build_request(op: &MutationOp, endpoint: &str) -> Request {
    let request = Request::new(op.method(), endpoint);
    match op.payload() {
        Some(payload) => request.with_body(payload.clone()),
        None => request,
    }
}
