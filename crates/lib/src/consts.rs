//! Constants shared across the engine.

/// Prefix of every tag derived from a content digest.
pub const TAG_PREFIX: &str = "tilt-";

/// Number of hex characters of the digest kept in a derived tag.
pub const TAG_HEX_LEN: usize = 16;

/// Exit code a run step uses to report that its process was killed on purpose.
///
/// The container's process is relaunched externally, so no restart is issued.
pub const DEFAULT_KILL_EXIT_CODE: i64 = 137;

/// Quiet period that closes a batch of file events.
pub const DEFAULT_WATCH_MIN_REST_MS: u64 = 200;

/// Upper bound on how long a batch of file events may stay open.
pub const DEFAULT_WATCH_MAX_DURATION_MS: u64 = 10_000;

/// Dockerfile name used inside a generated build context.
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Name of the singleton target that watches configuration files.
pub const CONFIGS_TARGET_NAME: &str = "singleton";

/// Tracing target for run-step and image-build output.
pub const BUILD_LOG_TARGET: &str = "build_log";

/// Label put on every deployed object and pod template.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] on objects this engine deployed.
pub const MANAGED_BY_VALUE: &str = "devloop";
