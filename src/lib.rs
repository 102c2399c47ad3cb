pub mod config;
pub mod downloader;
pub mod errors;
pub mod metadata;
pub mod playlist;
pub mod store;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use crate::config::QueueConfig;
pub use crate::downloader::{DownloadScheduler, DownloadState, Entry, EntryContext, ReadySignal};
pub use crate::errors::{AppError, Result};
pub use crate::playlist::{PlaybackStatus, Playlist, PlaylistEvent, QueueManager};
