use playtime_core::TrackerError;

/// Lift a collaborator's `anyhow` failure into a [`TrackerError`] variant
pub(crate) trait Catch<T>: Sized {
    fn catch(self, kind: fn(String) -> TrackerError) -> Result<T, TrackerError>;
}

impl<T> Catch<T> for anyhow::Result<T> {
    fn catch(self, kind: fn(String) -> TrackerError) -> Result<T, TrackerError> {
        self.map_err(|e| kind(format!("{e:#}")))
    }
}
