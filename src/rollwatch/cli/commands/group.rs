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

use crate::rollwatch::api::ClusterClient;
use crate::rollwatch::cli::args::{GroupArgs, RollArgs};
use crate::rollwatch::cli::output::{print_roll, print_snapshot};
use crate::rollwatch::config::{Config, Timeouts};
use crate::rollwatch::util::error::with_context;
use crate::rollwatch::verify::{
    ManualRollAnnotator, PodSnapshotStore, ReplicaGroupSelector, RollingUpdateDetector,
};

fn selector(args: &GroupArgs) -> ReplicaGroupSelector {
    let namespace = args.namespace.clone().unwrap_or_else(|| Config::Namespace.get());
    ReplicaGroupSelector::new(&namespace, &args.cluster, args.role.into())
}

pub(super) async fn handle_snapshot(args: &GroupArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let client = ClusterClient::from_config()
        .map_err(|err| with_context(err, "failed to configure the cluster client"))?;
    let selector = selector(args);
    let snapshot = PodSnapshotStore::new(&client).capture(&selector).await?;
    print_snapshot(&selector.to_string(), &snapshot);
    Ok(())
}

pub(super) async fn handle_roll(args: &RollArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let client = ClusterClient::from_config()
        .map_err(|err| with_context(err, "failed to configure the cluster client"))?;
    let selector = selector(&args.group);
    let snapshot = PodSnapshotStore::new(&client).capture(&selector).await?;
    let replicas = args.replicas.unwrap_or(snapshot.len());
    let timeout = args
        .timeout
        .unwrap_or_else(|| Timeouts::default().roll(replicas));

    let annotated = ManualRollAnnotator::new(&client)
        .trigger_with_resnapshot(&selector, snapshot)
        .await?;
    let report = RollingUpdateDetector::new(&client, Config::poll_policy()?)
        .wait_until_rolled(&selector, replicas, &annotated, timeout)
        .await?;
    print_roll(&selector.to_string(), &report);
    Ok(())
}
