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

use std::error::Error;
use std::fmt;
use std::str::FromStr;

/// Operator environment variable carrying the gate expression.
pub const FEATURE_GATES_ENV: &str = "STRIMZI_FEATURE_GATES";

pub const CONTROL_PLANE_LISTENER: &str = "ControlPlaneListener";
pub const USE_STRIMZI_POD_SETS: &str = "UseStrimziPodSets";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGate {
    pub name: String,
    pub enabled: bool,
}

impl fmt::Display for FeatureGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.enabled { '+' } else { '-' };
        write!(f, "{sign}{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureGateError {
    MissingSign(String),
    EmptyName,
    InvalidName(String),
    Conflicting(String),
}

impl fmt::Display for FeatureGateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureGateError::MissingSign(toggle) => {
                write!(f, "feature gate '{toggle}' must start with '+' or '-'")
            }
            FeatureGateError::EmptyName => f.write_str("feature gate name is empty"),
            FeatureGateError::InvalidName(name) => {
                write!(f, "feature gate name '{name}' must be alphanumeric")
            }
            FeatureGateError::Conflicting(name) => {
                write!(f, "feature gate '{name}' is both enabled and disabled")
            }
        }
    }
}

impl Error for FeatureGateError {}

/// Ordered toggles applied on top of the operator's default gate set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureGateExpression {
    gates: Vec<FeatureGate>,
}

impl FeatureGateExpression {
    pub fn parse(input: &str) -> Result<Self, FeatureGateError> {
        let mut expression = Self::default();
        for toggle in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (enabled, name) = if let Some(name) = toggle.strip_prefix('+') {
                (true, name)
            } else if let Some(name) = toggle.strip_prefix('-') {
                (false, name)
            } else {
                return Err(FeatureGateError::MissingSign(toggle.to_string()));
            };
            expression = expression.with(name, enabled)?;
        }
        Ok(expression)
    }

    pub fn enable(self, name: &str) -> Result<Self, FeatureGateError> {
        self.with(name, true)
    }

    pub fn disable(self, name: &str) -> Result<Self, FeatureGateError> {
        self.with(name, false)
    }

    fn with(mut self, name: &str, enabled: bool) -> Result<Self, FeatureGateError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(FeatureGateError::EmptyName);
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(FeatureGateError::InvalidName(name.to_string()));
        }
        match self.state(name) {
            Some(existing) if existing != enabled => {
                Err(FeatureGateError::Conflicting(name.to_string()))
            }
            Some(_) => Ok(self),
            None => {
                self.gates.push(FeatureGate {
                    name: name.to_string(),
                    enabled,
                });
                Ok(self)
            }
        }
    }

    /// Explicit toggle for `name`, if the expression mentions it.
    pub fn state(&self, name: &str) -> Option<bool> {
        self.gates
            .iter()
            .find(|gate| gate.name == name)
            .map(|gate| gate.enabled)
    }

    /// Effective state of `name` given the operator's default for it.
    pub fn is_enabled(&self, name: &str, default: bool) -> bool {
        self.state(name).unwrap_or(default)
    }

    pub fn gates(&self) -> &[FeatureGate] {
        &self.gates
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

impl FromStr for FeatureGateExpression {
    type Err = FeatureGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FeatureGateExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, gate) in self.gates.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{gate}")?;
        }
        Ok(())
    }
}
