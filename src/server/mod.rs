//! HTTP surface of the background process, so page-side processes can post
//! messages to a long-lived background.

mod handlers;
mod models;
mod state;

pub use handlers::{router, run_server};
