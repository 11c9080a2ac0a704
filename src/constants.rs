// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;

// Runtime configuration constants
pub const DEFAULT_WORKER_THREADS: usize = 4;
pub const LISTEN_BACKLOG: u32 = 1024;

// Wire envelope: `<event>:<body>`
pub const EVENT_SEPARATOR: char = ':';
