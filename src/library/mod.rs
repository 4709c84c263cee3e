//! Episode library synchronization for the per-folder file management view.
//!
//! A [`LibraryContext`] owns everything shared between views: the snapshot
//! cache, the request governor and the batch refresh orchestrator. Each open
//! view is a [`FolderSession`], which keeps its own record list and view
//! state and routes every mutation through the [`MutationCoordinator`].

pub mod batch;
pub mod cache;
pub mod coordinator;
pub mod error;
pub mod governor;
pub mod session;
pub mod store;
pub mod view;

pub use batch::{
    BatchJob, BatchOutcome, BatchPolicy, BatchProgress, BatchRefreshOrchestrator, BatchStatus,
    RefreshItem, RefreshResult,
};
pub use cache::{CacheEntry, CacheFreshness, EpisodeCache, FetchTicket};
pub use coordinator::{DeleteSummary, MutationCoordinator};
pub use error::{LibraryError, PreconditionFailure};
pub use governor::{ActionClass, ActionKey, RequestGovernor};
pub use session::{FolderSession, LibraryContext, LoadOutcome, LoadSource};
pub use store::EpisodeStore;
pub use view::{ViewAction, ViewMachine, ViewState};
