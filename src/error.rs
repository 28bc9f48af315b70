use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model deserialization error: {0}")]
    Deserialization(#[from] bincode::Error),

    #[error("Parse error at line {line}, field `{field}`: {message}")]
    Parse {
        line: usize,
        field: &'static str,
        message: String,
    },

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Cascade has no stages")]
    EmptyCascade,

    #[error("Model with {channels} channel(s) has no rescale coefficients")]
    NotResizable { channels: usize },

    #[error("Model reads {model} channel(s) but the window has {window}")]
    ChannelMismatch { model: usize, window: usize },

    #[error("Invalid scale factor: {0}")]
    InvalidScale(f32),
}

pub type Result<T> = std::result::Result<T, Error>;
