//! Request dispatch: one store batch per RPC, one [`status::Status`] per reply.

/// RPC dispatcher over a running store.
pub mod dispatcher;
/// Reply and error descriptor types.
pub mod status;

pub use dispatcher::RaceService;
pub use status::{ErrorCode, GetReply, ItemError, Status};
