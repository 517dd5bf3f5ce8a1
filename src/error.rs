use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripeError {
    // Session-fatal conditions
    #[error("Invalid geometry")]
    InvalidGeometry = 1,
    #[error("Buffer type cannot hold the requested sample precision")]
    PrecisionMismatch = 2,
    #[error("Tile creation failed")]
    TileCreationFailed = 3,
    #[error("Stripe height mismatch")]
    StripeHeightMismatch = 4,
    #[error("Incomplete image")]
    IncompleteImage = 5,
    #[error("Buffer too small")]
    BufferTooSmall = 6,

    // Codestream conditions
    #[error("Invalid data")]
    InvalidData = 20,
    #[error("Unsupported codestream feature")]
    Unsupported = 21,
    #[error("Thread pool creation failed")]
    ThreadPoolFailed = 22,

    // Logic errors
    #[error("Invalid state")]
    InvalidState = 100,
    #[error("Invalid argument")]
    InvalidArgument = 101,
}

pub type Result<T> = std::result::Result<T, StripeError>;
