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

mod group;
mod scenario;

use std::error::Error;

use crate::rollwatch::config::Config;
use crate::rollwatch::logger;
use crate::rollwatch::observability::tracing;

use super::args::{Commands, Rollwatch};

pub async fn run(cli: &Rollwatch) -> Result<(), Box<dyn Error + Send + Sync>> {
    let format = match cli.log_format {
        Some(format) => format,
        None => Config::log_format()?,
    };
    logger::set_log_format(format);
    tracing::init();

    match &cli.command {
        Commands::Run(args) => scenario::handle_run(args).await,
        Commands::Snapshot(args) => group::handle_snapshot(args).await,
        Commands::Roll(args) => group::handle_roll(args).await,
    }
}
