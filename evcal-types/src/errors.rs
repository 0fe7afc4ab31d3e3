pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by configuration construction.
///
/// Every other failure mode in this workspace (out-of-bounds events, rejected
/// normal-flow fits, unmatched clusters, ungrounded circle fits, grids that
/// can't be recovered) is reported through a plain return value rather than
/// through this type — see the crate-level docs on `evcal-core`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}
