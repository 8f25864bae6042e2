// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline replay and status publication.

pub mod connectivity;
pub mod coordinator;
pub mod status;
pub mod subscribers;

pub use connectivity::{Connectivity, ConnectivityObserver, ManualConnectivity, ProbeConfig, ReachabilityProbe};
pub use coordinator::{SyncConfig, SyncCoordinator};
pub use status::{DrainReport, FetchSource, StatusBoard, SyncEvent, SyncSnapshot, SyncStatus};
pub use subscribers::{Subscribers, Subscription};
