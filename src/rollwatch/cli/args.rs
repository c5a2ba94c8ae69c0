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

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::time::Duration;

use crate::rollwatch::logger::LogFormat;
use crate::rollwatch::verify::{ReplicaRole, ScenarioSpec};

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    LogFormat::parse(s).ok_or_else(|| format!("Invalid log format '{s}'. Expected 'text' or 'json'."))
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|err| format!("Invalid duration '{s}': {err}"))
}

/// Verifies that an operator-managed broker cluster rolls safely.
#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Rollwatch {
    /// Log output format (text or json); defaults to ROLLWATCH_LOG_FORMAT
    #[arg(long, global = true, value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a built-in verification scenario end to end
    Run(RunArgs),

    /// Print the restart markers of a replica group
    Snapshot(GroupArgs),

    /// Annotate a replica group for a manual roll and wait for it to finish
    Roll(RollArgs),
}

#[derive(Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Broker,
    Coordinator,
}

impl From<RoleArg> for ReplicaRole {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Broker => ReplicaRole::Broker,
            RoleArg::Coordinator => ReplicaRole::Coordinator,
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// The scenario to run
    #[arg(value_parser = ScenarioSpec::NAMES)]
    pub scenario: String,

    /// Namespace for the operator and the cluster (defaults to ROLLWATCH_NAMESPACE)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Name of the cluster the scenario deploys
    #[arg(short, long, default_value = "my-cluster")]
    pub cluster: String,

    /// Print the scenario report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct GroupArgs {
    /// Name of the cluster owning the replica group
    #[arg()]
    pub cluster: String,

    /// Replica group to select
    #[arg(short, long, value_enum, default_value = "broker")]
    pub role: RoleArg,

    /// Namespace of the cluster (defaults to ROLLWATCH_NAMESPACE)
    #[arg(short, long)]
    pub namespace: Option<String>,
}

#[derive(Args)]
pub struct RollArgs {
    #[command(flatten)]
    pub group: GroupArgs,

    /// Expected replica count after the roll (defaults to the current count)
    #[arg(long)]
    pub replicas: Option<usize>,

    /// How long to wait for the roll (defaults to 5m per replica)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_only_known_scenarios() {
        let cli = Rollwatch::try_parse_from(["rollwatch", "run", "pod-sets", "-n", "infra"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.scenario, "pod-sets");
                assert_eq!(args.namespace.as_deref(), Some("infra"));
                assert_eq!(args.cluster, "my-cluster");
            }
            _ => panic!("expected run"),
        }
        assert!(Rollwatch::try_parse_from(["rollwatch", "run", "unknown"]).is_err());
    }

    #[test]
    fn roll_parses_group_and_timeout() {
        let cli = Rollwatch::try_parse_from([
            "rollwatch",
            "roll",
            "my-cluster",
            "--role",
            "coordinator",
            "--timeout",
            "90s",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        match cli.command {
            Commands::Roll(args) => {
                assert_eq!(args.group.cluster, "my-cluster");
                assert_eq!(ReplicaRole::from(args.group.role), ReplicaRole::Coordinator);
                assert_eq!(args.timeout, Some(Duration::from_secs(90)));
                assert_eq!(args.replicas, None);
            }
            _ => panic!("expected roll"),
        }
    }
}
