pub mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use error::{envelope, Reply};
pub use router::handle_request;
pub use types::{AppState, Request};
