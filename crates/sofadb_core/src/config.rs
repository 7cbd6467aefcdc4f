//! Database configuration.

/// Smallest accepted B-tree order.
pub const MIN_BTREE_ORDER: usize = 4;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database file if it doesn't exist.
    /// Ignored for read-only handles.
    pub create_if_missing: bool,

    /// Whether to open the file read-only.
    pub read_only: bool,

    /// Maximum number of entries in a B-tree node before it splits.
    pub btree_order: usize,

    /// Maximum number of decoded nodes kept in the node cache (0 disables it).
    pub node_cache_capacity: usize,

    /// Whether `commit` fsyncs the file (safer but slower).
    pub sync_on_commit: bool,

    /// Whether document bodies are LZ4-compressed when written.
    /// Has no effect without the `compression` feature.
    pub compress_bodies: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            read_only: false,
            btree_order: 32,
            node_cache_capacity: 4096,
            sync_on_commit: true,
            compress_bodies: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to open read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the B-tree order.
    #[must_use]
    pub const fn btree_order(mut self, order: usize) -> Self {
        self.btree_order = order;
        self
    }

    /// Sets the node cache capacity.
    #[must_use]
    pub const fn node_cache_capacity(mut self, capacity: usize) -> Self {
        self.node_cache_capacity = capacity;
        self
    }

    /// Sets whether to fsync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether bodies are compressed.
    #[must_use]
    pub const fn compress_bodies(mut self, value: bool) -> Self {
        self.compress_bodies = value;
        self
    }

    /// Returns the B-tree order clamped to the supported minimum.
    #[must_use]
    pub fn effective_order(&self) -> usize {
        self.btree_order.max(MIN_BTREE_ORDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(!config.read_only);
        assert!(config.sync_on_commit);
        assert!(!config.compress_bodies);
        assert_eq!(config.btree_order, 32);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .btree_order(2)
            .compress_bodies(true);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert!(config.compress_bodies);
        assert_eq!(config.effective_order(), MIN_BTREE_ORDER);
    }
}
