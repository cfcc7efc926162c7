//! Error kinds for the prediction and sealing engine.
//!
//! One variant per §7 of the design: the reader treats structural
//! corruption as fatal, the parser recovers by leaving events unparsed,
//! and the rehasher turns unavailability into either a soft fallback or
//! a hard error depending on the event kind (see `eventlog::rehash`).

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("truncated event log: {0}")]
    Truncated(String),

    #[error("malformed data: {0}")]
    BadFormat(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgo(String),

    #[error("unrecognized event variant: {0}")]
    UnknownVariant(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("TPM operation failed: {0}")]
    Tpm(String),

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("PCR policy did not match sealed state")]
    PolicyMismatch,

    #[error("required source unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, PredictError>;

impl From<tss_esapi::Error> for PredictError {
    fn from(e: tss_esapi::Error) -> Self {
        PredictError::Tpm(e.to_string())
    }
}

impl From<serde_json::Error> for PredictError {
    fn from(e: serde_json::Error) -> Self {
        PredictError::BadFormat(e.to_string())
    }
}

impl From<picky_asn1_der::Asn1DerError> for PredictError {
    fn from(e: picky_asn1_der::Asn1DerError) -> Self {
        PredictError::BadFormat(format!("ASN.1 error: {e}"))
    }
}
