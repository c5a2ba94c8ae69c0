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
use crate::rollwatch::cli::args::RunArgs;
use crate::rollwatch::cli::output::print_report;
use crate::rollwatch::config::{Config, Timeouts};
use crate::rollwatch::util::error::with_context;
use crate::rollwatch::verify::templates::{ExampleClients, StrimziTemplates};
use crate::rollwatch::verify::{InstallationLifecycleManager, ScenarioSpec, Verifier};

pub(super) async fn handle_run(args: &RunArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let namespace = args.namespace.clone().unwrap_or_else(|| Config::Namespace.get());
    let spec = ScenarioSpec::by_name(&args.scenario, &namespace, &args.cluster)?
        .ok_or_else(|| format!("unknown scenario '{}'", args.scenario))?;

    let policy = Config::poll_policy()?;
    let timeouts = Timeouts::default();
    let client = ClusterClient::from_config()
        .map_err(|err| with_context(err, "failed to configure the cluster client"))?;
    let templates = StrimziTemplates::from_config();
    let clients = ExampleClients::from_config();

    let verifier = Verifier::new(&client, &client, &templates, &clients, policy, timeouts);
    let mut installation =
        InstallationLifecycleManager::new(&client, &templates, policy, timeouts.install);
    let report = verifier
        .run(&mut installation, &spec)
        .await
        .map_err(|err| with_context(err, format!("scenario '{}' failed", spec.name)))?;
    print_report(&report, args.json)?;
    Ok(())
}
