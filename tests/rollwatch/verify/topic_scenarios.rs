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
use rollwatch::rollwatch::test_support::FakeCluster;
use rollwatch::rollwatch::verify::{
    InstallationLifecycleManager, InstallationState, ScenarioSpec, VerificationError, Verifier,
};

fn scalability(count: usize) -> ScenarioSpec {
    let mut spec = ScenarioSpec::topic_scalability(NAMESPACE, CLUSTER);
    if let Some(load) = spec.topic_load.as_mut() {
        load.count = count;
    }
    spec
}

#[tokio::test(start_paused = true)]
async fn scenario_thousand_topics_are_created_and_listed() {
    let fake = FakeCluster::new();
    let (templates, clients) = (templates(), clients());
    let timeouts = Timeouts::default();
    let verifier = Verifier::new(&fake, &fake, &templates, &clients, policy(), timeouts);
    let mut installation =
        InstallationLifecycleManager::new(&fake, &templates, policy(), timeouts.install);
    let spec = ScenarioSpec::topic_scalability(NAMESPACE, CLUSTER);

    let report = verifier
        .run(&mut installation, &spec)
        .await
        .expect("scenario passes");

    assert_eq!(report.scenario, "topic-scalability");
    assert_eq!(report.topics, 1000);
    assert!(report.feature_gates.is_empty());
    assert!(report.workloads.is_empty());
    assert!(report.rolls.is_empty());
    assert!(!fake.has_job(NAMESPACE, &spec.producer));
    assert!(!fake.has_job(NAMESPACE, &spec.consumer));

    assert_eq!(installation.state(), InstallationState::Uninstalled);
    assert!(fake.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn scenario_sampled_topic_never_ready() {
    let fake = FakeCluster::new();
    fake.hold_readiness("topic-example50");
    let (templates, clients) = (templates(), clients());
    let timeouts = Timeouts::default();
    let verifier = Verifier::new(&fake, &fake, &templates, &clients, policy(), timeouts);
    let mut installation =
        InstallationLifecycleManager::new(&fake, &templates, policy(), timeouts.install);
    let spec = scalability(120);

    let err = verifier
        .run(&mut installation, &spec)
        .await
        .expect_err("topic-example50 stays unready");

    match &err {
        VerificationError::CheckFailed { check, detail } => {
            assert_eq!(check, "topic-ready");
            assert!(detail.contains("KafkaTopic/infra-namespace/topic-example50"), "{detail}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_product_defect());
    assert_eq!(installation.state(), InstallationState::Uninstalled);
    assert!(fake.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn scenario_unsampled_topic_missing_from_listing() {
    let fake = FakeCluster::new();
    fake.drop_resource("topic-example7");
    let (templates, clients) = (templates(), clients());
    let timeouts = Timeouts::default();
    let verifier = Verifier::new(&fake, &fake, &templates, &clients, policy(), timeouts);
    let mut installation =
        InstallationLifecycleManager::new(&fake, &templates, policy(), timeouts.install);
    let spec = scalability(100);

    let err = verifier
        .run(&mut installation, &spec)
        .await
        .expect_err("one topic is never listed");

    match &err {
        VerificationError::CheckFailed { check, detail } => {
            assert_eq!(check, "topic-count");
            assert!(detail.starts_with("99 of 100 topics listed"), "{detail}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(installation.state(), InstallationState::Uninstalled);
    assert!(fake.created().is_empty());
}
