pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for `evcal-core`.
///
/// Following this workspace's convention (see `flydra-feature-detector`'s
/// `errors.rs`), only configuration problems are fatal. Everything else --
/// out-of-bounds events, rejected normal-flow fits, unmatched clusters,
/// ungrounded circle fits, grids that fail to resolve -- is reported through
/// plain return values (empty vectors, `None`, or the observability
/// counters on [`crate::Sae`]), never through this type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    ConfigInvalid(#[from] evcal_types::Error),
}

/// Internal signal that a small fixed-size linear fit (plane, circle,
/// homography) was degenerate. Never escapes this crate: every call site
/// turns it into the appropriate "rejected" outcome from the error
/// taxonomy above (a dropped pixel, cluster, or circle pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Singular;
