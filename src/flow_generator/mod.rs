/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

mod error;
pub mod flow_map;
pub mod scheduler;

pub use error::{Error, Result};
pub use flow_map::{FlowMap, FlowMapTrace};
pub use scheduler::ExpiryScheduler;

// the table is partitioned so packet workers on distinct flows rarely
// contend; must be a power of two
const HASH_SHARDS: usize = 16;
