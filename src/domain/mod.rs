pub mod error;
pub mod model;

pub use error::DownloadError;
pub use model::{
    DownloadItem, DownloadPhase, DownloadRequest, DownloadedFile, ImageAsset, ImageAssetRequest,
    ZipOutcome, ZipRequest,
};
