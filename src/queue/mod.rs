// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

pub mod mutation;
pub mod offline_queue;

pub use mutation::{MutationOp, MutationRequest, Priority, QueuedMutation};
pub use offline_queue::{OfflineMutationQueue, QueueError, QueueResult};
