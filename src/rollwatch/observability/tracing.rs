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

//! Span identifiers for scenario runs. Spans are backed by the `tracing`
//! crate; a task-local [`TraceContext`] mirrors the identifiers so the logger
//! can stamp them on each line.

use rand::{rngs::OsRng, RngCore};
use std::fmt::Write;
use std::future::Future;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::task_local;
use tracing::Instrument;
use tracing_subscriber::registry::Registry;

#[derive(Clone, Debug)]
pub struct TraceContext {
    trace_id: Arc<str>,
    span_id: Arc<str>,
    scenario: Arc<str>,
}

impl TraceContext {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }
}

task_local! {
    static ACTIVE_TRACE: TraceContext;
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber exactly once.
pub fn init() {
    TRACING_INIT.get_or_init(|| {
        // Another subscriber may already be installed by an embedding binary.
        let _ = tracing::subscriber::set_global_default(Registry::default());
    });
}

pub fn current_context() -> Option<TraceContext> {
    ACTIVE_TRACE.try_with(|ctx| ctx.clone()).ok()
}

/// Runs `fut` inside a span named `step`. The outermost call opens a new
/// trace for `scenario`; nested calls keep the trace id and scenario of the
/// enclosing span and only mint a new span id.
pub async fn with_span<T>(
    scenario: &str,
    step: impl Into<String>,
    fut: impl Future<Output = T>,
) -> T {
    let existing = current_context();
    let (trace_id, scenario) = match existing {
        Some(ctx) => (ctx.trace_id, ctx.scenario),
        None => (
            Arc::<str>::from(random_hex(16)),
            Arc::<str>::from(scenario),
        ),
    };
    let span_id = Arc::<str>::from(random_hex(8));
    let step = step.into();
    let span = tracing::info_span!(
        "rollwatch",
        scenario = scenario.as_ref(),
        step = step.as_str(),
        trace_id = trace_id.as_ref(),
        span_id = span_id.as_ref(),
    );
    let context = TraceContext {
        trace_id,
        span_id,
        scenario,
    };

    ACTIVE_TRACE.scope(context, fut.instrument(span)).await
}

fn random_hex(bytes: usize) -> String {
    let mut data = vec![0u8; bytes];
    OsRng.fill_bytes(&mut data);
    let mut output = String::with_capacity(bytes * 2);
    for byte in data {
        let _ = write!(&mut output, "{:02x}", byte);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn nested_spans_share_trace_and_scenario() {
        assert!(current_context().is_none());
        let (outer, inner) = with_span("pod-sets", "outer", async {
            let outer = current_context().expect("outer context");
            let inner = with_span("ignored", "inner", async {
                current_context().expect("inner context")
            })
            .await;
            (outer, inner)
        })
        .await;

        assert_eq!(outer.trace_id(), inner.trace_id());
        assert_ne!(outer.span_id(), inner.span_id());
        assert_eq!(inner.scenario(), "pod-sets");
        assert_eq!(outer.trace_id().len(), 32);
        assert_eq!(outer.span_id().len(), 16);
        assert!(current_context().is_none());
    }
}
