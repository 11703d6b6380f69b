/// Recommended error type for your scenario `main` function and any shared probe code that you
/// write. Probe calls return this type so you can use `?` to propagate errors.
pub type GaleResult<T> = anyhow::Result<T>;
