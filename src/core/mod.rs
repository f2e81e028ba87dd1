pub mod engine;
pub mod executor;
pub mod outcome;
pub mod reference;
pub mod resolver;
pub mod retry;
pub mod tree;

pub use engine::{MirrorEngine, RunOptions};
pub use executor::{Downloader, TransferTask};
pub use outcome::{MirrorReport, Outcome, OutcomeSink, OutcomeStatus, RunStatus};
pub use reference::RemoteRef;
pub use resolver::{PathResolver, RemoteHandle, RemoteKind};
pub use retry::RetryPolicy;
pub use tree::TreeSynchronizer;
