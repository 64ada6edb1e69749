//! HTTP and filesystem implementations of the pipeline's collaborators.

pub mod fetcher;
pub mod generator;
pub mod index;
pub mod publisher;

pub use fetcher::{caption_from_metadata, png_dimensions, HttpImageFetcher};
pub use generator::{GenerationError, OnnxImageGenerator};
pub use index::{PostEntry, PostIndex};
pub use publisher::{escape_html, render_post, FolderPublisher, HtmlPublisher};
