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

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("unknown information element {0:?}")]
    UnknownFieldIdentifier(String),
    #[error("field {field} has size {size}, canonical size is {expected}")]
    FieldSizeMismatch {
        field: &'static str,
        size: u16,
        expected: u16,
    },
    // ids below 256 are reserved for template and options sets
    #[error("data set id {0} is reserved")]
    ReservedSetId(u16),
    #[error("template has no sets")]
    EmptyTemplate,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
