//! Mistral adapter errors.

use thiserror::Error;

use kernel_pool::{ClientCacheError, PoolError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MistralError {
    #[error("Invalid Mistral endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    ClientCache(#[from] ClientCacheError),
}
