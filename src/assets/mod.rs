//! Chapter manifests and card image resolution.
pub mod fetch;
pub mod preload;
pub mod resolver;

pub use fetch::{ChapterHints, ManifestStore};
pub use preload::Preloader;
pub use resolver::{AssetResolver, Resolution};
