//! Runtime pieces of the mesh node that sit outside the order watcher core.

pub mod block_watcher;

pub use block_watcher::{BlockWatchError, BlockWatcher};
