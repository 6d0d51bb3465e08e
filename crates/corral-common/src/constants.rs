//! System-wide constants and default paths.

/// Default base directory for all runtime state.
pub const DEFAULT_ROOT_DIR: &str = "/var/lib/corral";

/// Environment variable that overrides the base directory.
pub const ROOT_DIR_ENV: &str = "CORRAL_ROOT";

/// Directory under the root holding one subdirectory per container.
pub const CONTAINERS_DIR: &str = "containers";

/// Directory under the root holding image tarballs.
pub const IMAGES_DIR: &str = "images";

/// Directory under the root holding network records and IPAM state.
pub const NETWORK_ROOT_DIR: &str = "network";

/// File name of a container's metadata record.
pub const CONFIG_FILE: &str = "config.json";

/// File name of a detached container's log.
pub const CONTAINER_LOG_FILE: &str = "container.log";

/// Read-only image layer directory of a container workspace.
pub const LOWER_LAYER_DIR: &str = "lowerLayer";
/// Writable layer directory of a container workspace.
pub const UPPER_LAYER_DIR: &str = "upperLayer";
/// Overlay scratch directory of a container workspace.
pub const WORK_LAYER_DIR: &str = "workLayer";
/// Merged mount point of a container workspace.
pub const MERGED_DIR: &str = "mnt";

/// File name of the IPAM bitmap table.
pub const IPAM_FILE: &str = "subnet.json";

/// Mount table of the calling process.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Descriptor slot on which the init process receives its command.
pub const INIT_PIPE_FD: i32 = 3;

/// Hidden subcommand the runtime re-executes itself with.
pub const INIT_SUBCOMMAND: &str = "init";

/// Prefix of the per-container cgroup directory name.
pub const CGROUP_PREFIX: &str = "corral-";

/// `PATH` given to containers that do not set one.
pub const DEFAULT_CONTAINER_PATH: &str =
    "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Application name used in CLI output.
pub const APP_NAME: &str = "corral";
