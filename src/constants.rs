//! Socket Inbox constants

/// Default TCP port to listen on
pub const DEFAULT_PORT: u16 = 15001;

/// Default maximum number of simultaneously active connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default idle read timeout per connection, in seconds (0 disables)
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Default wall-clock limit for one post-processing run, in seconds (0 disables)
pub const DEFAULT_POST_PROCESSING_TIMEOUT_SECS: u64 = 60;

/// Size of the per-read socket buffer
pub const READ_CHUNK_SIZE: usize = 4096;

/// Pause after a failed accept before trying again, in milliseconds
pub const ACCEPT_ERROR_BACKOFF_MS: u64 = 100;

/// Name of the inbox subdirectory inside the data directory
pub const INBOX_DIR_NAME: &str = "inbox";

/// Name of the archive subdirectory inside the data directory
pub const ARCHIVE_DIR_NAME: &str = "archive";

/// Extension given to persisted message files
pub const MESSAGE_FILE_EXTENSION: &str = "raw";

/// How many file names the store tries before giving up on a save
pub const MAX_NAME_ATTEMPTS: u64 = 16;

/// Maximum size for stdin input to `send` in bytes (10MB)
pub const MAX_STDIN_SIZE: usize = 10 * 1024 * 1024;
