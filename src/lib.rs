pub mod cancel;
pub mod config;
pub mod dependencytrack;
mod error;
pub mod publisher;
pub mod sbomreport;
pub mod server;
pub mod template;
mod uploader;

pub use cancel::{Cancellation, cancellation};
pub use config::Config;
pub use error::Error;
pub use publisher::ProjectIdentity;
pub use uploader::{RunOutcome, Uploader};
