/// Configuration default values
///
/// Kept in one place so the `Default` impls and the serde defaults agree.
// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8083;

// Scheduler defaults
pub const DEFAULT_TIMEZONE: &str = "UTC";
pub const DEFAULT_SCHEDULE: &str = "0 * * * *";

// Git defaults
pub const DEFAULT_GIT_BINARY: &str = "git";

// Remote provider defaults
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_REQUEST_TIMEOUT: &str = "30s";
pub const DEFAULT_USER_AGENT: &str = concat!("repo-sync/", env!("CARGO_PKG_VERSION"));

// Environment overrides
pub const ENV_PREFIX: &str = "REPO_SYNC_";
pub const ENV_SEPARATOR: &str = "__";
