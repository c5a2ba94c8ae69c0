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

//! Narrow interfaces onto the orchestration platform and the generic
//! resource bookkeeping that scenarios rely on.

pub mod client;
pub mod platform;
pub mod resources;

pub use client::ClusterClient;
pub use platform::{Platform, PlatformError};
pub use resources::{Manifest, ResourceManager};
