// src/node/builtin/mod.rs

//! Plumbing nodes shipped with flowloop.
//!
//! | kind           | variants                    |
//! |----------------|-----------------------------|
//! | `queue-reader` | producer                    |
//! | `queue-writer` | producer, blocking, non-blocking |
//! | `command`      | producer, blocking, non-blocking |
//! | `condition`    | conditional                 |
//! | `set`          | blocking, non-blocking      |

pub mod command;
pub mod condition;
pub mod queue_reader;
pub mod queue_writer;
pub mod set;

use super::registry::NodeRegistry;

pub use command::CommandNode;
pub use condition::ConditionNode;
pub use queue_reader::QueueReaderNode;
pub use queue_writer::QueueWriterNode;
pub use set::SetNode;

/// Register every built-in kind.
pub fn register_all(registry: &mut NodeRegistry) {
    registry
        .register(queue_reader::KIND, queue_reader::build)
        .register(queue_writer::KIND, queue_writer::build)
        .register(command::KIND, command::build)
        .register(condition::KIND, condition::build)
        .register(set::KIND, set::build);
}
