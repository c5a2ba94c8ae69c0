/*
 * Copyright (C) 2024 The Rollwatch Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Rolling-update verification engine.
//!
//! Leaves first: [`snapshot`] captures pod identities, [`rolling`] decides how
//! far a roll has progressed and waits on it, [`annotate`] asks the operator
//! for a manual roll, [`install`] drives the operator lifecycle, [`workload`]
//! tracks client jobs, and [`scenario`] composes them into end-to-end
//! protocols.

pub mod annotate;
pub mod error;
pub mod features;
pub mod install;
pub mod rolling;
pub mod scenario;
pub mod selector;
pub mod snapshot;
pub mod templates;
pub mod workload;

pub use annotate::{ManualRollAnnotator, MANUAL_ROLL_ANNOTATION};
pub use error::VerificationError;
pub use features::{FeatureGate, FeatureGateError, FeatureGateExpression};
pub use install::{
    InstallationConfig, InstallationLifecycleManager, InstallationState, WatchedNamespaces,
};
pub use rolling::{detect, RollObservation, RollReport, RollState, RollingUpdateDetector};
pub use scenario::{Check, Disruption, ScenarioReport, ScenarioSpec, Verifier};
pub use selector::{ReplicaGroupSelector, ReplicaRole};
pub use snapshot::{PodSnapshot, PodSnapshotStore, RestartMarker};
pub use workload::{WorkloadCompletionTracker, WorkloadJob, WorkloadResult, WorkloadRole};
