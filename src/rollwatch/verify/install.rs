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

use super::error::VerificationError;
use super::features::{FeatureGateExpression, FEATURE_GATES_ENV};
use super::templates::OperatorTemplate;
use crate::rollwatch::api::{Platform, PlatformError};
use crate::rollwatch::k8s::deployment::Deployment;
use crate::rollwatch::k8s::selector::LabelSelector;
use crate::rollwatch::logger::log_info;
use crate::rollwatch::util::poll::{poll_until, PollError, PollPolicy, Probe};
use std::fmt;
use std::time::Duration;

const COMPONENT: &str = "install";
pub const WATCHED_NAMESPACES_ENV: &str = "STRIMZI_NAMESPACE";

/// Namespaces the operator reconciles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchedNamespaces {
    All,
    Only(Vec<String>),
}

impl WatchedNamespaces {
    pub fn to_env_value(&self) -> String {
        match self {
            WatchedNamespaces::All => "*".to_string(),
            WatchedNamespaces::Only(namespaces) => namespaces.join(","),
        }
    }
}

/// Settings for one operator installation. Consumed by
/// [`InstallationLifecycleManager::install`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationConfig {
    pub namespace: String,
    pub watched: WatchedNamespaces,
    pub feature_gates: FeatureGateExpression,
    /// Extra operator environment, applied in order after the settings above.
    pub env: Vec<(String, String)>,
}

impl InstallationConfig {
    /// Watches only its own namespace, default gates.
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            watched: WatchedNamespaces::Only(vec![namespace.to_string()]),
            feature_gates: FeatureGateExpression::default(),
            env: Vec::new(),
        }
    }

    pub fn watching(self, watched: WatchedNamespaces) -> Self {
        Self { watched, ..self }
    }

    pub fn with_feature_gates(self, feature_gates: FeatureGateExpression) -> Self {
        Self {
            feature_gates,
            ..self
        }
    }

    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.env.push((name.to_string(), value.to_string()));
        self
    }

    /// Environment overrides in the order they are applied.
    pub fn env_overrides(&self) -> Vec<(String, String)> {
        let mut overrides = vec![(
            WATCHED_NAMESPACES_ENV.to_string(),
            self.watched.to_env_value(),
        )];
        if !self.feature_gates.is_empty() {
            overrides.push((FEATURE_GATES_ENV.to_string(), self.feature_gates.to_string()));
        }
        overrides.extend(self.env.iter().cloned());
        overrides
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationState {
    Uninstalled,
    Installed,
}

impl fmt::Display for InstallationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallationState::Uninstalled => f.write_str("UNINSTALLED"),
            InstallationState::Installed => f.write_str("INSTALLED"),
        }
    }
}

struct Installation {
    config: InstallationConfig,
    deployment: String,
    selector: LabelSelector,
}

/// Owns at most one live operator installation. Not `Clone`: install and
/// uninstall need exclusive access.
pub struct InstallationLifecycleManager<'a, P, T> {
    platform: &'a P,
    template: &'a T,
    policy: PollPolicy,
    timeout: Duration,
    current: Option<Installation>,
}

impl<'a, P: Platform, T: OperatorTemplate> InstallationLifecycleManager<'a, P, T> {
    pub fn new(platform: &'a P, template: &'a T, policy: PollPolicy, timeout: Duration) -> Self {
        Self {
            platform,
            template,
            policy,
            timeout,
            current: None,
        }
    }

    pub fn state(&self) -> InstallationState {
        match self.current {
            Some(_) => InstallationState::Installed,
            None => InstallationState::Uninstalled,
        }
    }

    pub fn current(&self) -> Option<&InstallationConfig> {
        self.current.as_ref().map(|installation| &installation.config)
    }

    /// Applies the operator with `config` injected into its environment and
    /// waits for it to become ready.
    ///
    /// Fails with [`VerificationError::AlreadyInstalled`] while this manager
    /// holds an installation, or when an operator Deployment it does not own
    /// already exists in the target namespace.
    pub async fn install(&mut self, config: InstallationConfig) -> Result<(), VerificationError> {
        let namespace = config.namespace.clone();
        if self.current.is_some() {
            return Err(VerificationError::AlreadyInstalled { namespace });
        }

        let mut deployment = self.template.operator_deployment(&namespace);
        if self
            .platform
            .get_deployment(&namespace, deployment.name())
            .await?
            .is_some()
        {
            return Err(VerificationError::AlreadyInstalled { namespace });
        }

        let container_name = self.template.operator_container().to_string();
        let container = deployment.container_mut(&container_name).ok_or_else(|| {
            PlatformError::Invalid(format!(
                "operator template has no container named {container_name}"
            ))
        })?;
        for (name, value) in config.env_overrides() {
            container.set_env(&name, &value);
        }

        let applied = self.platform.apply_deployment(&deployment).await?;
        let gates = config.feature_gates.to_string();
        log_info(
            COMPONENT,
            "Applied operator deployment",
            &[
                ("namespace", namespace.as_str()),
                ("deployment", applied.name()),
                ("feature_gates", gates.as_str()),
            ],
        );
        let deployment_name = applied.name().to_string();
        let selector = applied.spec.selector.clone();
        self.current = Some(Installation {
            config,
            deployment: deployment_name.clone(),
            selector: selector.clone(),
        });

        self.wait_ready(&namespace, &deployment_name, &selector).await?;
        log_info(
            COMPONENT,
            "Operator is ready",
            &[("namespace", namespace.as_str()), ("deployment", deployment_name.as_str())],
        );
        Ok(())
    }

    async fn wait_ready(
        &self,
        namespace: &str,
        name: &str,
        selector: &LabelSelector,
    ) -> Result<(), VerificationError> {
        let policy = self.policy.with_timeout(self.timeout);
        let result = poll_until(&policy, move || async move {
            let Some(deployment) = self.platform.get_deployment(namespace, name).await? else {
                return Ok(Probe::Pending("deployment absent".to_string()));
            };
            if !deployment.is_rolled_out() {
                return Ok(Probe::Pending(rollout_detail(&deployment)));
            }
            let pods = self.platform.list_pods(namespace, selector).await?;
            let active: Vec<_> = pods.iter().filter(|pod| !pod.is_terminating()).collect();
            let ready = active.iter().filter(|pod| pod.is_ready()).count();
            if !active.is_empty() && ready == active.len() {
                Ok(Probe::Ready(()))
            } else {
                Ok::<_, PlatformError>(Probe::Pending(format!(
                    "{ready} of {} pods ready",
                    active.len()
                )))
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Probe(err)) => Err(err.into()),
            Err(PollError::Timeout { last, elapsed, .. }) => Err(VerificationError::ComponentNotReady {
                component: name.to_string(),
                namespace: namespace.to_string(),
                detail: last.unwrap_or_else(|| "never observed".to_string()),
                waited: elapsed,
            }),
        }
    }

    /// Removes the installation this manager holds, if any, and waits for
    /// the operator pods to disappear. Safe to call in any state.
    pub async fn uninstall(&mut self) -> Result<(), VerificationError> {
        let Some(installation) = self.current.as_ref() else {
            return Ok(());
        };
        let namespace = installation.config.namespace.clone();
        let name = installation.deployment.clone();
        let selector = installation.selector.clone();

        self.platform.delete_deployment(&namespace, &name).await?;
        let policy = self.policy.with_timeout(self.timeout);
        let platform = self.platform;
        let (namespace_ref, selector_ref) = (&namespace, &selector);
        let result = poll_until(&policy, move || async move {
            let remaining = platform.list_pods(namespace_ref, selector_ref).await?.len();
            Ok::<_, PlatformError>(if remaining == 0 {
                Probe::Ready(())
            } else {
                Probe::Pending(remaining)
            })
        })
        .await;

        match result {
            Ok(()) => {}
            Err(PollError::Probe(err)) => return Err(err.into()),
            Err(PollError::Timeout { last, elapsed, .. }) => {
                return Err(VerificationError::ComponentNotReady {
                    component: name,
                    namespace,
                    detail: format!("{} operator pods still present", last.unwrap_or(0)),
                    waited: elapsed,
                })
            }
        }

        self.current = None;
        log_info(
            COMPONENT,
            "Operator uninstalled",
            &[("namespace", namespace.as_str()), ("deployment", name.as_str())],
        );
        Ok(())
    }
}

fn rollout_detail(deployment: &Deployment) -> String {
    let status = deployment.status.clone().unwrap_or_default();
    format!(
        "{} of {} replicas ready",
        status.ready_replicas.unwrap_or(0),
        deployment.spec.replicas
    )
}
