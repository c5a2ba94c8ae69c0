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

use crate::rollwatch::logger::LogFormat;
use crate::rollwatch::util::poll::PollPolicy;
use std::env;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Enum for supported configuration parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Config {
    ApiServer,
    TokenFile,
    CaFile,
    Namespace,
    PollInterval,
    PollJitter,
    OperatorImage,
    ClientImage,
    LogFormat,
}

#[derive(Debug)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}='{}': {}", self.var, self.value, self.reason)
    }
}

impl Error for ConfigError {}

impl Config {
    /// Returns the associated environment variable for the config parameter.
    pub fn env_var(&self) -> &'static str {
        match self {
            Config::ApiServer => "ROLLWATCH_API_SERVER",
            Config::TokenFile => "ROLLWATCH_TOKEN_FILE",
            Config::CaFile => "ROLLWATCH_CA_FILE",
            Config::Namespace => "ROLLWATCH_NAMESPACE",
            Config::PollInterval => "ROLLWATCH_POLL_INTERVAL",
            Config::PollJitter => "ROLLWATCH_POLL_JITTER",
            Config::OperatorImage => "ROLLWATCH_OPERATOR_IMAGE",
            Config::ClientImage => "ROLLWATCH_CLIENT_IMAGE",
            Config::LogFormat => "ROLLWATCH_LOG_FORMAT",
        }
    }

    /// Returns the value used when the environment variable is unset.
    pub fn default_value(&self) -> &'static str {
        match self {
            Config::ApiServer => "https://kubernetes.default.svc",
            Config::TokenFile => "/var/run/secrets/kubernetes.io/serviceaccount/token",
            Config::CaFile => "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt",
            Config::Namespace => "infra-namespace",
            Config::PollInterval => "1s",
            Config::PollJitter => "250ms",
            Config::OperatorImage => "quay.io/strimzi/operator:latest",
            Config::ClientImage => "quay.io/strimzi-test-clients/test-clients:latest-kafka-3.7.0",
            Config::LogFormat => "text",
        }
    }

    /// Returns the effective value, either from environment or default.
    /// Blank values count as unset.
    pub fn get(&self) -> String {
        env::var(self.env_var())
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.default_value().to_string())
    }

    pub fn get_path(&self) -> PathBuf {
        PathBuf::from(self.get())
    }

    /// Parses the effective value as a human readable duration (`1s`, `250ms`).
    pub fn get_duration(&self) -> Result<Duration, ConfigError> {
        let value = self.get();
        humantime::parse_duration(&value).map_err(|err| ConfigError {
            var: self.env_var(),
            value,
            reason: err.to_string(),
        })
    }

    pub fn log_format() -> Result<LogFormat, ConfigError> {
        let value = Config::LogFormat.get();
        LogFormat::parse(&value).ok_or_else(|| ConfigError {
            var: Config::LogFormat.env_var(),
            value,
            reason: "expected 'text' or 'json'".to_string(),
        })
    }

    /// Poll cadence from the environment, with a placeholder bound that each
    /// wait replaces through [`PollPolicy::with_timeout`].
    pub fn poll_policy() -> Result<PollPolicy, ConfigError> {
        Ok(PollPolicy::new(
            Config::PollInterval.get_duration()?,
            Config::PollJitter.get_duration()?,
            Timeouts::default().pod_readiness,
        ))
    }
}

/// Default bounds for the waits a scenario performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub pod_readiness: Duration,
    pub roll_per_replica: Duration,
    pub install: Duration,
    pub job_running: Duration,
    pub resource_readiness: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            pod_readiness: Duration::from_secs(10 * 60),
            roll_per_replica: Duration::from_secs(5 * 60),
            install: Duration::from_secs(10 * 60),
            job_running: Duration::from_secs(5 * 60),
            resource_readiness: Duration::from_secs(15 * 60),
        }
    }
}

impl Timeouts {
    /// Bound for rolling every pod of a group of `replicas` pods.
    pub fn roll(&self, replicas: usize) -> Duration {
        let replicas = u32::try_from(replicas.max(1)).unwrap_or(u32::MAX);
        self.roll_per_replica.saturating_mul(replicas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_apply_when_unset_or_blank() {
        env::remove_var("ROLLWATCH_NAMESPACE");
        assert_eq!(Config::Namespace.get(), "infra-namespace");
        env::set_var("ROLLWATCH_NAMESPACE", "   ");
        assert_eq!(Config::Namespace.get(), "infra-namespace");
        env::set_var("ROLLWATCH_NAMESPACE", "kafka-e2e");
        assert_eq!(Config::Namespace.get(), "kafka-e2e");
        env::remove_var("ROLLWATCH_NAMESPACE");
    }

    #[test]
    #[serial]
    fn durations_parse_with_humantime() {
        env::set_var("ROLLWATCH_POLL_INTERVAL", "2s 500ms");
        assert_eq!(
            Config::PollInterval.get_duration().unwrap(),
            Duration::from_millis(2500)
        );
        env::set_var("ROLLWATCH_POLL_INTERVAL", "soon");
        let error = Config::PollInterval.get_duration().unwrap_err();
        assert_eq!(error.var, "ROLLWATCH_POLL_INTERVAL");
        assert!(error.to_string().contains("soon"));
        env::remove_var("ROLLWATCH_POLL_INTERVAL");

        let policy = Config::poll_policy().unwrap();
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert_eq!(policy.jitter, Duration::from_millis(250));
    }

    #[test]
    #[serial]
    fn log_format_is_validated() {
        env::set_var("ROLLWATCH_LOG_FORMAT", "JSON");
        assert_eq!(Config::log_format().unwrap(), LogFormat::Json);
        env::set_var("ROLLWATCH_LOG_FORMAT", "yaml");
        assert!(Config::log_format().is_err());
        env::remove_var("ROLLWATCH_LOG_FORMAT");
    }

    #[test]
    fn roll_bound_scales_with_replicas() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.roll(3), Duration::from_secs(15 * 60));
        assert_eq!(timeouts.roll(0), timeouts.roll_per_replica);
    }
}
