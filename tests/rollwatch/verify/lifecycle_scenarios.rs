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

use super::{policy, templates, NAMESPACE};
use rollwatch::rollwatch::api::Platform;
use rollwatch::rollwatch::test_support::FakeCluster;
use rollwatch::rollwatch::verify::templates::{OperatorTemplate, OPERATOR_NAME};
use rollwatch::rollwatch::verify::{
    FeatureGateExpression, InstallationConfig, InstallationLifecycleManager, InstallationState,
    VerificationError, WatchedNamespaces,
};
use std::time::Duration;

fn config() -> InstallationConfig {
    InstallationConfig::new(NAMESPACE)
        .watching(WatchedNamespaces::All)
        .with_feature_gates(FeatureGateExpression::parse("+UseStrimziPodSets").unwrap())
        .with_env("STRIMZI_FULL_RECONCILIATION_INTERVAL_MS", "30000")
}

#[tokio::test(start_paused = true)]
async fn scenario_install_injects_operator_environment() {
    let fake = FakeCluster::new();
    let templates = templates();
    let mut manager =
        InstallationLifecycleManager::new(&fake, &templates, policy(), Duration::from_secs(60));
    assert_eq!(manager.state(), InstallationState::Uninstalled);

    manager.install(config()).await.expect("install");
    assert_eq!(manager.state(), InstallationState::Installed);
    assert_eq!(manager.current(), Some(&config()));

    let deployment = fake
        .get_deployment(NAMESPACE, OPERATOR_NAME)
        .await
        .unwrap()
        .expect("operator deployed");
    let container = deployment
        .spec
        .template
        .spec
        .containers
        .iter()
        .find(|c| c.name == templates.operator_container())
        .expect("operator container");
    assert_eq!(container.env_value("STRIMZI_NAMESPACE"), Some("*"));
    assert_eq!(
        container.env_value("STRIMZI_FEATURE_GATES"),
        Some("+UseStrimziPodSets")
    );
    assert_eq!(
        container.env_value("STRIMZI_FULL_RECONCILIATION_INTERVAL_MS"),
        Some("30000")
    );
}

#[tokio::test(start_paused = true)]
async fn scenario_second_install_requires_uninstall() {
    let fake = FakeCluster::new();
    let templates = templates();
    let mut manager =
        InstallationLifecycleManager::new(&fake, &templates, policy(), Duration::from_secs(60));
    manager.install(config()).await.unwrap();

    let err = manager.install(config()).await.expect_err("already installed");
    assert!(matches!(err, VerificationError::AlreadyInstalled { ref namespace } if namespace == NAMESPACE));
    assert_eq!(manager.state(), InstallationState::Installed);

    manager.uninstall().await.unwrap();
    manager.uninstall().await.expect("uninstall is idempotent");
    assert_eq!(manager.state(), InstallationState::Uninstalled);
    assert!(fake
        .get_deployment(NAMESPACE, OPERATOR_NAME)
        .await
        .unwrap()
        .is_none());

    manager.install(config()).await.expect("reinstall after uninstall");
    assert_eq!(manager.state(), InstallationState::Installed);
}

#[tokio::test(start_paused = true)]
async fn scenario_foreign_installation_is_left_alone() {
    let fake = FakeCluster::new();
    let templates = templates();
    let foreign = templates.operator_deployment(NAMESPACE);
    fake.apply_deployment(&foreign).await.unwrap();

    let mut manager =
        InstallationLifecycleManager::new(&fake, &templates, policy(), Duration::from_secs(60));
    let err = manager.install(config()).await.expect_err("namespace taken");
    assert!(matches!(err, VerificationError::AlreadyInstalled { .. }));
    assert_eq!(manager.state(), InstallationState::Uninstalled);

    manager.uninstall().await.unwrap();
    assert!(fake
        .get_deployment(NAMESPACE, OPERATOR_NAME)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn scenario_operator_never_ready_times_out_and_still_uninstalls() {
    let fake = FakeCluster::new();
    fake.set_deployments_ready(false);
    let templates = templates();
    let mut manager =
        InstallationLifecycleManager::new(&fake, &templates, policy(), Duration::from_secs(30));

    let err = manager.install(config()).await.expect_err("never ready");
    match err {
        VerificationError::ComponentNotReady {
            component, waited, ..
        } => {
            assert_eq!(component, OPERATOR_NAME);
            assert!(waited >= Duration::from_secs(30));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(manager.state(), InstallationState::Installed);

    manager.uninstall().await.expect("cleanup after a failed install");
    assert_eq!(manager.state(), InstallationState::Uninstalled);
}
