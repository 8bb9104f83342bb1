// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Arena-backed key tree and its view protocol.

mod arena;
mod key_index;
mod model;
mod node;
mod view;

pub use arena::NodeId;
pub use key_index::KeyIndex;
pub use model::TreeModel;
pub use node::{DatabaseState, Grouping, NamespaceState, Node, NodeKind};
pub use view::{Change, EventLog, NullObserver, TreeEvent, TreeObserver, TreeView};
