use thiserror::Error;

/// Enumeration of errors for operations with the spout.
/// Per-batch failures are not errors: they travel through the retry path and
/// the completion channel as data. Only conditions that prevent the spout
/// from running at all surface here.
#[derive(Error, Debug)]
pub enum SpoutError {
    #[error("failed to start the push source: {0}")]
    Init(String),
    #[error("the spout is shut down")]
    ShutDown,
}

/// The error returned when parsing an invalid consumption mode string.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid ConsumptionMode")]
pub struct ParseConsumptionModeError(pub String);

/// The error returned when parsing an invalid batch state string.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid BatchState")]
pub struct ParseBatchStateError(pub String);
