/// Size of the region mapped when the allocator is initialised: 1 MiB.
pub const INITIAL_REGION_SIZE: usize = 1024 * 1024;

/// Allocator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Bytes requested from the region provider on initialisation. Later
    /// growth requests are sized after the allocation that triggered them.
    pub initial_region_size: usize,
}

impl Config {
    pub const DEFAULT: Self = Self {
        initial_region_size: INITIAL_REGION_SIZE,
    };

    pub const fn with_initial_region_size(mut self, initial_region_size: usize) -> Self {
        self.initial_region_size = initial_region_size;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}
