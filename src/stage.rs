use crate::error::BoxError;
use std::fmt;
use std::marker::PhantomData;

/// A transformation applied to every item flowing through a pipeline stage.
///
/// One instance is shared by all workers of a stage, so `process` takes
/// `&self`. A failure is recorded against the item and the stage carries on.
pub trait Stage<I, O>: Send + Sync + 'static {
    /// Transform one input item
    fn process(&self, input: I) -> Result<O, BoxError>;

    /// Get a human-readable name for this stage
    fn name(&self) -> &str {
        "stage"
    }
}

/// A pass-through stage that forwards items unchanged
pub struct PassthroughStage<T> {
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> PassthroughStage<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for PassthroughStage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PassthroughStage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PassthroughStage")
    }
}

impl<T: Send + 'static> Stage<T, T> for PassthroughStage<T> {
    fn process(&self, input: T) -> Result<T, BoxError> {
        Ok(input)
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// A mapping stage with an infallible transform
pub struct MapStage<F> {
    name: String,
    mapper: F,
}

impl<F> MapStage<F> {
    /// Create a new map stage
    pub fn new(name: impl Into<String>, mapper: F) -> Self {
        Self {
            name: name.into(),
            mapper,
        }
    }
}

impl<F> fmt::Debug for MapStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapStage").field("name", &self.name).finish()
    }
}

impl<I, O, F> Stage<I, O> for MapStage<F>
where
    F: Fn(I) -> O + Send + Sync + 'static,
{
    fn process(&self, input: I) -> Result<O, BoxError> {
        Ok((self.mapper)(input))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A mapping stage whose transform may fail
pub struct TryMapStage<F> {
    name: String,
    mapper: F,
}

impl<F> TryMapStage<F> {
    /// Create a new fallible map stage
    pub fn new(name: impl Into<String>, mapper: F) -> Self {
        Self {
            name: name.into(),
            mapper,
        }
    }
}

impl<F> fmt::Debug for TryMapStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TryMapStage").field("name", &self.name).finish()
    }
}

impl<I, O, E, F> Stage<I, O> for TryMapStage<F>
where
    F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    fn process(&self, input: I) -> Result<O, BoxError> {
        (self.mapper)(input).map_err(Into::into)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
