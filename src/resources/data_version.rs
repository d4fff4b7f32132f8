//! Edit counting for caller-owned storage data.
//!
//! A mapped storage carries a [`DataVersion`]; the orchestrator remembers the
//! version it last uploaded and uploads again once the two differ.

/// Number of times a mapped storage's data was handed out for writing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DataVersion(u64);

impl DataVersion {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Write access to a mapped storage's values. Dropping it advances the
/// storage's version, so the edit reaches the GPU on the next frame.
pub struct DataGuard<'a> {
    data: &'a mut Vec<f32>,
    version: &'a mut DataVersion,
}

impl<'a> DataGuard<'a> {
    pub(crate) fn new(data: &'a mut Vec<f32>, version: &'a mut DataVersion) -> Self {
        Self { data, version }
    }
}

impl std::ops::Deref for DataGuard<'_> {
    type Target = Vec<f32>;

    fn deref(&self) -> &Vec<f32> {
        self.data
    }
}

impl std::ops::DerefMut for DataGuard<'_> {
    fn deref_mut(&mut self) -> &mut Vec<f32> {
        self.data
    }
}

impl Drop for DataGuard<'_> {
    fn drop(&mut self) {
        *self.version = self.version.next();
    }
}
