pub mod cli;
pub mod config;
pub mod converter;
pub mod downloader;
pub mod error;
pub mod file_manager;
pub mod html_parser;
pub mod model;
pub mod patch;
pub mod rewriter;

// Re-export main types for convenience
pub use cli::ConvertCommand;
pub use config::ConvertConfig;
pub use converter::{ConvertSummary, Converter};
pub use downloader::{FetchOutcome, FetchReport, FetchStatus, HttpTransport, ImagePool, Transport};
pub use error::FetchError;
pub use html_parser::{extract_image_refs, ImageRef, Page};
pub use rewriter::rewrite_images;
