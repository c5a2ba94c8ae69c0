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

use super::platform::PlatformError;
use crate::rollwatch::k8s::selector::LabelSelector;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// An opaque declarative resource produced by a template builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    value: Value,
    await_ready: bool,
}

impl Manifest {
    /// Wraps a resource document. Custom resources (API groups containing a
    /// dot) are awaited until they report `Ready=True`; built-in kinds are
    /// considered ready once created.
    pub fn new(value: Value) -> Result<Self, PlatformError> {
        let manifest = Self {
            value,
            await_ready: false,
        };
        manifest.name()?;
        manifest.namespace()?;
        let (group, _) = manifest.group_version()?;
        let await_ready = group.contains('.');
        Ok(Self {
            await_ready,
            ..manifest
        })
    }

    pub fn await_ready(self, await_ready: bool) -> Self {
        Self {
            await_ready,
            ..self
        }
    }

    pub fn awaits_ready(&self) -> bool {
        self.await_ready
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn str_field(&self, pointer: &str) -> Result<&str, PlatformError> {
        self.value
            .pointer(pointer)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| PlatformError::Invalid(format!("manifest is missing {pointer}")))
    }

    pub fn kind(&self) -> Result<&str, PlatformError> {
        self.str_field("/kind")
    }

    pub fn name(&self) -> Result<&str, PlatformError> {
        self.str_field("/metadata/name")
    }

    pub fn namespace(&self) -> Result<&str, PlatformError> {
        self.str_field("/metadata/namespace")
    }

    /// Splits `apiVersion` into group and version; the core group is "".
    pub fn group_version(&self) -> Result<(&str, &str), PlatformError> {
        let api_version = self.str_field("/apiVersion")?;
        Ok(match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        })
    }

    /// Path segments of the namespaced collection this resource lives in.
    pub fn collection_segments(&self) -> Result<Vec<String>, PlatformError> {
        let (group, version) = self.group_version()?;
        let plural = plural_of(self.kind()?);
        let namespace = self.namespace()?.to_string();
        let mut segments = if group.is_empty() {
            vec!["api".to_string(), version.to_string()]
        } else {
            vec!["apis".to_string(), group.to_string(), version.to_string()]
        };
        segments.extend(["namespaces".to_string(), namespace, plural]);
        Ok(segments)
    }

    pub fn object_segments(&self) -> Result<Vec<String>, PlatformError> {
        let mut segments = self.collection_segments()?;
        segments.push(self.name()?.to_string());
        Ok(segments)
    }

    /// Human readable `Kind/namespace/name`, for logs and errors.
    pub fn describe(&self) -> String {
        format!(
            "{}/{}/{}",
            self.kind().unwrap_or("Unknown"),
            self.namespace().unwrap_or("-"),
            self.name().unwrap_or("-")
        )
    }
}

/// True when a resource document carries a `Ready` condition with status
/// `True`.
pub fn reports_ready(value: &Value) -> bool {
    value
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions.iter().any(|condition| {
                condition.get("type").and_then(Value::as_str) == Some("Ready")
                    && condition.get("status").and_then(Value::as_str) == Some("True")
            })
        })
        .unwrap_or(false)
}

fn plural_of(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        format!("{stem}ies")
    } else if lower.ends_with('s') {
        format!("{lower}es")
    } else {
        format!("{lower}s")
    }
}

/// Generic create-and-track bookkeeping for declarative resources.
pub trait ResourceManager: Send + Sync {
    /// Creates `manifest` and, when it awaits readiness, waits up to
    /// `timeout` for its `Ready` condition.
    fn create(
        &self,
        manifest: &Manifest,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Waits up to `timeout` for an already created resource to report
    /// `Ready=True`, whether or not it was created awaiting readiness.
    fn wait_ready(
        &self,
        manifest: &Manifest,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Counts the resources in the collection `sample` belongs to whose
    /// labels match `selector`.
    fn count_matching(
        &self,
        sample: &Manifest,
        selector: &LabelSelector,
    ) -> impl Future<Output = Result<usize, PlatformError>> + Send;

    /// Deletes everything created so far, newest first. Returns the number of
    /// resources deleted.
    fn cleanup(&self) -> impl Future<Output = Result<usize, PlatformError>> + Send;
}
