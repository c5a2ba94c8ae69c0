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

//! Rolling-update verification for operator-managed broker clusters.
//!
//! The crate drives an operator through feature-gate installations, disrupts
//! the replica groups it manages (pod deletion, manual rolling update) and
//! checks that the groups are replaced exactly once while client workloads
//! keep delivering every message.

pub mod rollwatch;
