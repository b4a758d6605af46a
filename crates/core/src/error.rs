use crate::smb::NtStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("{op} failed: {status}")]
    Status { op: &'static str, status: NtStatus },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("upload to {path} failed: {message}")]
    Upload { path: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("telegram bot api error: {message}")]
    Telegram { message: String },
}

impl Error {
    pub fn status(&self) -> Option<NtStatus> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
