use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Invalid tile size: width={0}, height={1} (both must be positive)")]
    InvalidTileSize(u32, u32),

    #[error("Invalid image dimensions: width={0}, height={1}")]
    InvalidDimensions(u32, u32),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported compression codec: {0}")]
    UnsupportedCodec(String),

    #[error("I/O failure on {context}: {source}")]
    IoFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read region: {0}")]
    ReadFailure(String),

    #[error("Failed to write region: {0}")]
    WriteFailure(String),

    #[error("Failed to close: {0}")]
    CloseFailure(String),
}

impl ConversionError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ConversionError::IoFailure {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConversionError>;
