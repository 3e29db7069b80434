#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("invalid build request: {message}")]
    InvalidRequest { message: String },
    #[error("pty setup failed: {message}")]
    PtySetup { message: String },
    #[error("worker spawn failed: {message}")]
    Spawn { message: String },
    #[error("worker runtime error: {message}")]
    Runtime { message: String },
}
