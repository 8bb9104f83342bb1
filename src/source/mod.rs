// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key sources: where raw key lists come from.
//!
//! - [`MemoryKeySource`]: in-process keyspace, used by tests and demos
//! - [`RedisKeySource`]: a Redis server (`INFO keyspace`, `SCAN MATCH`)

pub mod memory;
pub mod redis;
pub mod traits;

pub use memory::MemoryKeySource;
pub use redis::RedisKeySource;
pub use traits::{DatabaseInfo, FetchError, KeySource, Operations, ServerConnection};
