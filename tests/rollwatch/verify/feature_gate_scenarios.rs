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

use super::{clients, policy, templates, CLUSTER, NAMESPACE};
use rollwatch::rollwatch::config::Timeouts;
use rollwatch::rollwatch::test_support::{make_pod, FakeCluster, JobOutcome};
use rollwatch::rollwatch::verify::{
    FeatureGateExpression, InstallationLifecycleManager, InstallationState, ReplicaGroupSelector,
    RollState, ScenarioSpec, VerificationError, Verifier,
};

fn full_roll() -> Vec<RollState> {
    vec![RollState::NotStarted, RollState::InProgress, RollState::Complete]
}

fn assert_cleaned_up(fake: &FakeCluster, spec: &ScenarioSpec) {
    assert!(fake.created().is_empty());
    assert!(!fake.has_job(NAMESPACE, &spec.producer));
    assert!(!fake.has_job(NAMESPACE, &spec.consumer));
}

#[tokio::test(start_paused = true)]
async fn scenario_control_plane_listener_disabled() {
    let fake = FakeCluster::new();
    let (templates, clients) = (templates(), clients());
    let timeouts = Timeouts::default();
    let verifier = Verifier::new(&fake, &fake, &templates, &clients, policy(), timeouts);
    let mut installation =
        InstallationLifecycleManager::new(&fake, &templates, policy(), timeouts.install);
    let spec = ScenarioSpec::control_plane_listener(NAMESPACE, CLUSTER).unwrap();

    let report = verifier
        .run(&mut installation, &spec)
        .await
        .expect("scenario passes");

    assert_eq!(report.feature_gates, "-ControlPlaneListener");
    assert_eq!(report.checks, vec!["control-plane-port"]);
    assert_eq!(
        report.disruptions,
        vec!["delete-pod(broker)", "manual-roll(broker)"]
    );
    assert_eq!(report.rolls.len(), 1);
    assert_eq!(report.rolls[0].group, "infra-namespace/my-cluster-kafka");
    assert_eq!(report.rolls[0].transitions, full_roll());
    assert_eq!(report.workloads.len(), 2);
    assert!(report.workloads.iter().all(|w| w.messages == 300));
    assert_eq!(
        fake.deleted_pods(),
        vec![(NAMESPACE.to_string(), "my-cluster-kafka-0".to_string())]
    );

    assert_eq!(installation.state(), InstallationState::Uninstalled);
    assert_cleaned_up(&fake, &spec);
}

#[tokio::test(start_paused = true)]
async fn scenario_control_plane_port_present_when_gate_enabled() {
    let fake = FakeCluster::new();
    let (templates, clients) = (templates(), clients());
    let timeouts = Timeouts::default();
    let verifier = Verifier::new(&fake, &fake, &templates, &clients, policy(), timeouts);
    let mut installation =
        InstallationLifecycleManager::new(&fake, &templates, policy(), timeouts.install);
    let mut spec = ScenarioSpec::control_plane_listener(NAMESPACE, CLUSTER).unwrap();
    spec.feature_gates = FeatureGateExpression::parse("+ControlPlaneListener").unwrap();
    spec.disruptions.clear();
    spec.message_count = 10;

    let report = verifier
        .run(&mut installation, &spec)
        .await
        .expect("port present with the gate enabled");
    assert_eq!(report.checks, vec!["control-plane-port"]);
    assert!(report.rolls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn scenario_pod_sets_enabled() {
    let fake = FakeCluster::new();
    let (templates, clients) = (templates(), clients());
    let timeouts = Timeouts::default();
    let verifier = Verifier::new(&fake, &fake, &templates, &clients, policy(), timeouts);
    let mut installation =
        InstallationLifecycleManager::new(&fake, &templates, policy(), timeouts.install);
    let spec = ScenarioSpec::pod_sets(NAMESPACE, CLUSTER).unwrap();

    let report = verifier
        .run(&mut installation, &spec)
        .await
        .expect("scenario passes");

    assert_eq!(report.feature_gates, "+UseStrimziPodSets");
    assert!(report.checks.is_empty());
    assert_eq!(
        fake.deleted_pods(),
        vec![
            (NAMESPACE.to_string(), "my-cluster-zookeeper-0".to_string()),
            (NAMESPACE.to_string(), "my-cluster-kafka-0".to_string()),
        ]
    );
    let groups: Vec<&str> = report.rolls.iter().map(|roll| roll.group.as_str()).collect();
    assert_eq!(
        groups,
        vec![
            "infra-namespace/my-cluster-zookeeper",
            "infra-namespace/my-cluster-kafka"
        ]
    );
    assert!(report.rolls.iter().all(|roll| roll.transitions == full_roll()));
    assert!(report.workloads.iter().all(|w| w.messages == 600));

    assert_eq!(installation.state(), InstallationState::Uninstalled);
    assert_cleaned_up(&fake, &spec);
}

#[tokio::test(start_paused = true)]
async fn scenario_short_consumer_count_is_a_product_defect() {
    let fake = FakeCluster::new();
    let (templates, clients) = (templates(), clients());
    let timeouts = Timeouts::default();
    let verifier = Verifier::new(&fake, &fake, &templates, &clients, policy(), timeouts);
    let mut installation =
        InstallationLifecycleManager::new(&fake, &templates, policy(), timeouts.install);
    let spec = ScenarioSpec::control_plane_listener(NAMESPACE, CLUSTER).unwrap();
    fake.set_job_outcome(&spec.consumer, JobOutcome::SucceedWith(250));

    let err = verifier
        .run(&mut installation, &spec)
        .await
        .expect_err("consumer lost messages");

    match &err {
        VerificationError::WorkloadIncomplete {
            identity,
            expected,
            observed,
            ..
        } => {
            assert_eq!(identity, &spec.consumer);
            assert_eq!((*expected, *observed), (300, Some(250)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_product_defect());
    assert_eq!(installation.state(), InstallationState::Uninstalled);
    assert_cleaned_up(&fake, &spec);
}

#[tokio::test(start_paused = true)]
async fn scenario_crashed_producer_is_not_a_product_defect() {
    let fake = FakeCluster::new();
    let (templates, clients) = (templates(), clients());
    let timeouts = Timeouts::default();
    let verifier = Verifier::new(&fake, &fake, &templates, &clients, policy(), timeouts);
    let mut installation =
        InstallationLifecycleManager::new(&fake, &templates, policy(), timeouts.install);
    let spec = ScenarioSpec::pod_sets(NAMESPACE, CLUSTER).unwrap();
    fake.set_job_outcome(&spec.producer, JobOutcome::Fail);

    let err = verifier
        .run(&mut installation, &spec)
        .await
        .expect_err("producer crashed");

    assert!(matches!(
        err,
        VerificationError::WorkloadFailed { failed_pods: 1, .. }
    ));
    assert!(!err.is_product_defect());
    assert_eq!(installation.state(), InstallationState::Uninstalled);
    assert_cleaned_up(&fake, &spec);
}

#[tokio::test(start_paused = true)]
async fn scenario_pod_gone_before_deletion_fails_the_disruption() {
    let fake = FakeCluster::new();
    let coordinators = ReplicaGroupSelector::zookeeper(NAMESPACE, CLUSTER);
    let listed: Vec<_> = ["gone-0", "gone-1", "gone-2"]
        .iter()
        .map(|name| make_pod(NAMESPACE, name, &format!("{name}-uid"), coordinators.labels(), true))
        .collect();
    fake.script_pods(NAMESPACE, coordinators.labels(), vec![listed]);

    let (templates, clients) = (templates(), clients());
    let timeouts = Timeouts::default();
    let verifier = Verifier::new(&fake, &fake, &templates, &clients, policy(), timeouts);
    let mut installation =
        InstallationLifecycleManager::new(&fake, &templates, policy(), timeouts.install);
    let spec = ScenarioSpec::pod_sets(NAMESPACE, CLUSTER).unwrap();

    let err = verifier
        .run(&mut installation, &spec)
        .await
        .expect_err("the listed pod no longer exists");

    match &err {
        VerificationError::StalePodReference { namespace, pod } => {
            assert_eq!(namespace, NAMESPACE);
            assert_eq!(pod, "gone-0");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(fake.deleted_pods().is_empty());
    assert_eq!(installation.state(), InstallationState::Uninstalled);
    assert_cleaned_up(&fake, &spec);
}
