pub mod cancel;
pub mod error;

pub use cancel::cancellable;
pub use error::{RepoError, Result};
