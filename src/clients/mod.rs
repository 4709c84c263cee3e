pub mod library_api;
pub mod remote;

pub use library_api::HttpLibraryClient;
pub use remote::{DeleteReport, LinkOutcome, LinkRefresh, RemoteError, RemoteLibrary};
