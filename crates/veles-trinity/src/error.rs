//! Error types for the Trinity schema readers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// FlatBuffer structure could not be decoded.
    #[error("invalid {schema}: {source}")]
    Decode {
        schema: &'static str,
        #[source]
        source: veles_common::Error,
    },
}

impl Error {
    pub(crate) fn decode(schema: &'static str) -> impl FnOnce(veles_common::Error) -> Self {
        move |source| Error::Decode { schema, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
