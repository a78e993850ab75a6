/// The error type returned by [`TableBuilder::try_build`][try-build].
///
/// [try-build]: ./struct.TableBuilder.html#method.try_build
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The requested initial capacity was zero. Every generation of the table
    /// needs at least one slot to probe.
    #[error("the initial capacity of a hash table must be at least 1")]
    ZeroCapacity,
}
