use thiserror::Error;

pub type Result<T> = std::result::Result<T, XfbError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XfbError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
