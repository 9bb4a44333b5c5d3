pub mod download_engine;
pub mod notify;
pub mod save;
pub mod session;
pub mod tracker;

pub use download_engine::{DownloadEngine, ProgressCallback, ZipStream};
pub use notify::{LogNotifier, Notifier, NullNotifier};
pub use save::{DirectorySink, SaveSink};
pub use session::{
    AuthState, CredentialStore, LoginOutcome, MemoryCredentialStore, SessionEvent, SessionStore,
    StoredCredentials,
};
pub use tracker::{DownloadEvent, DownloadTracker};
