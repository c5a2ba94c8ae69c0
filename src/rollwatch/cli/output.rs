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

use std::fmt;
use std::io::{self, Write};

use crate::rollwatch::verify::{PodSnapshot, RollReport, ScenarioReport};

const COLOR_ERROR: &str = "\x1b[31m";
const COLOR_RESET: &str = "\x1b[0m";

/// Line-oriented terminal output. Write failures (closed pipes) are ignored.
pub struct Terminal;

impl Terminal {
    pub fn stdout(args: fmt::Arguments<'_>) {
        let mut handle = io::stdout().lock();
        let _ = writeln!(handle, "{args}");
    }

    pub fn error(args: fmt::Arguments<'_>) {
        let mut handle = io::stderr().lock();
        let _ = writeln!(handle, "{COLOR_ERROR}{args}{COLOR_RESET}");
    }
}

pub(super) fn print_snapshot(group: &str, snapshot: &PodSnapshot) {
    Terminal::stdout(format_args!("Group: {group}"));
    let width = snapshot.names().map(str::len).max().unwrap_or(0).max(4);
    Terminal::stdout(format_args!("{:<width$}  RESTART MARKER", "NAME"));
    for (name, marker) in snapshot.iter() {
        Terminal::stdout(format_args!("{name:<width$}  {marker}"));
    }
}

pub(super) fn print_roll(group: &str, report: &RollReport) {
    let states: Vec<&str> = report.transitions.iter().map(|state| state.as_str()).collect();
    Terminal::stdout(format_args!(
        "{group} rolled after {} polls: {}",
        report.polls,
        states.join(" -> ")
    ));
    print_snapshot(group, &report.snapshot);
}

pub(super) fn print_report(report: &ScenarioReport, json: bool) -> Result<(), serde_json::Error> {
    if json {
        let rendered = serde_json::to_string_pretty(report)?;
        Terminal::stdout(format_args!("{rendered}"));
        return Ok(());
    }
    Terminal::stdout(format_args!(
        "Scenario {} passed in {}ms (namespace {}, gates {})",
        report.scenario,
        report.duration_ms,
        report.namespace,
        if report.feature_gates.is_empty() {
            "default"
        } else {
            report.feature_gates.as_str()
        }
    ));
    for check in &report.checks {
        Terminal::stdout(format_args!("  check       {check}"));
    }
    for disruption in &report.disruptions {
        Terminal::stdout(format_args!("  disruption  {disruption}"));
    }
    for roll in &report.rolls {
        let states: Vec<&str> = roll.transitions.iter().map(|state| state.as_str()).collect();
        Terminal::stdout(format_args!("  roll        {}: {}", roll.group, states.join(" -> ")));
    }
    if report.topics > 0 {
        Terminal::stdout(format_args!("  topics      {} created and listed", report.topics));
    }
    for workload in &report.workloads {
        Terminal::stdout(format_args!(
            "  workload    {} ({}): {} messages",
            workload.identity, workload.role, workload.messages
        ));
    }
    Ok(())
}
