pub mod downloader;
pub mod scheduler;
pub mod uploader;

pub use downloader::{Downloader, RunReport};
pub use scheduler::{DownloadRun, PartState};
pub use uploader::Uploader;
