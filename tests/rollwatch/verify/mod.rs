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

mod feature_gate_scenarios;
mod lifecycle_scenarios;
mod rolling_scenarios;
mod topic_scenarios;
mod workload_scenarios;

use rollwatch::rollwatch::api::Platform;
use rollwatch::rollwatch::test_support::FakeCluster;
use rollwatch::rollwatch::util::poll::PollPolicy;
use rollwatch::rollwatch::verify::templates::{ExampleClients, OperatorTemplate, StrimziTemplates};
use std::time::Duration;

pub(crate) const NAMESPACE: &str = "infra-namespace";
pub(crate) const CLUSTER: &str = "my-cluster";

/// One-second polls without jitter so paused-clock tests are deterministic.
pub(crate) fn policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(1), Duration::ZERO, Duration::from_secs(60))
}

pub(crate) fn templates() -> StrimziTemplates {
    StrimziTemplates::new("quay.io/strimzi/operator:test")
}

pub(crate) fn clients() -> ExampleClients {
    ExampleClients::new("quay.io/strimzi-test-clients/test-clients:test")
}

/// Starts reconciling replica groups without going through an installation.
pub(crate) async fn start_reconciler(fake: &FakeCluster) {
    let deployment = templates().operator_deployment(NAMESPACE);
    fake.apply_deployment(&deployment)
        .await
        .expect("apply operator deployment");
}
