use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("font size {0} outside 12..=150")]
    FontSize(u32),
    #[error("invalid color '{0}'")]
    Color(String),
    #[error("export quality {0} outside 0..=1")]
    Quality(f32),
    #[error("invalid font: {0}")]
    Font(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Invalid canvas dimensions")]
    EmptySurface,
    #[error("No images provided for ZIP")]
    EmptyArchive,
    #[error("All images must have valid filenames")]
    InvalidFilename,
    #[error("Encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-image failure; stored on the entry as a message, never propagated out of the batch.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Source no longer available")]
    SourceReleased,
    #[error("Failed to load image: {0}")]
    Decode(String),
    #[error("Image has zero width or height")]
    EmptyImage,
}
