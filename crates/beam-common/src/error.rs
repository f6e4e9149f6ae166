use thiserror::Error;

#[derive(Error, Debug)]
pub enum BeamError {
    #[error("Configuration Error: {0}")]
    Config(String),
}
