use thiserror::Error;

#[derive(Debug, Error)]
pub enum XpsError {
    /// A conversion entry point received an argument it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("no such service: {0}")]
    MissingService(&'static str),
    #[error("font error: {0}")]
    Font(String),
    #[error("image error: {0}")]
    Image(String),
    #[error("package error: {0}")]
    Package(String),
    #[error("markup error: {0}")]
    Markup(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for XpsError {
    fn from(value: image::ImageError) -> Self {
        XpsError::Image(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, XpsError>;
