//! Lean language-server client backing the info pipeline.

pub mod codec;

mod backend;
pub(crate) mod diagnostics;
mod error;
pub(crate) mod protocol;
pub(crate) mod rpc;
pub(crate) mod server;

pub use backend::InfoBackend;
pub use error::{BackendError, codes};
pub use protocol::{PathToUriError, path_to_file_uri};
pub use server::{LeanServer, ServerEvent, StopReason};
