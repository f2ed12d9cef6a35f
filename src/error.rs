use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while interpreting draws or scheduling resampling work.
#[derive(Error, Debug)]
pub enum Error {
    #[error("draw at site `{site}` reached Standard without a random key, try stacking a ThreadRandomKey")]
    MissingRandomKey { site: String },

    #[error("draw at site `{site}` fell off the end of the interpreter chain")]
    NoDelegate { site: String },

    #[error("interpreter is already linked into this chain")]
    AlreadyLinked,

    #[error("interpreters are not reentrant: the same instance cannot be nested")]
    Reentrant,

    #[error("site `{site}` was drawn twice in one execution")]
    DuplicateSite { site: String },

    #[error("random key for site `{site}` was consumed more than once")]
    KeyReused { site: String },

    #[error("observed site `{site}` was never visited by the program")]
    UnobservedSite { site: String },

    #[error("site `{site}` was not recorded in the replayed trace")]
    UnknownSite { site: String },

    #[error("distribution at site `{site}` failed")]
    Distribution {
        site: String,
        #[source]
        source: BoxError,
    },

    #[error("key-value store failure")]
    Store(#[source] BoxError),

    #[error("could not encode or decode a cached value")]
    Serialization(#[from] serde_json::Error),

    #[error("resampling site `{site}` failed")]
    SiteFailed {
        site: String,
        #[source]
        source: Box<Error>,
    },

    #[error("observed site `{site}` was overwritten during sampling")]
    ObservationOverwritten { site: String },

    #[error("unit of work panicked: {message}")]
    Panicked { message: String },

    #[error("sampling was cancelled")]
    Cancelled,

    #[error("could not start worker threads")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Cancellation is propagated, never reported as a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::SiteFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    pub(crate) fn store(err: impl Into<BoxError>) -> Self {
        Error::Store(err.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
