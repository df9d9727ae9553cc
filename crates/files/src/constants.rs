//! Storage layout constants.

/// Directory under the storage root that holds in-flight uploads before promotion.
pub const TEMP_DIR_NAME: &str = ".tmp";

/// Suffix appended to a blob's full file name to form its sidecar path.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Chunk size used when streaming bytes into the store.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Number of leading bytes retained for content sniffing.
pub const SNIFF_LEN: usize = 8192;
