//! CPU weight control.
//!
//! v1 writes `cpu.shares` verbatim; the unified hierarchy only knows
//! `cpu.weight`, so numeric shares are rescaled into its range first.

use corral_common::error::Result;

use super::{CgroupDir, CgroupVersion, write_control};

/// Smallest value accepted by `cpu.shares`.
const MIN_SHARES: u64 = 2;
/// Largest value accepted by `cpu.shares`.
const MAX_SHARES: u64 = 262_144;
/// Largest value accepted by `cpu.weight`.
const MAX_WEIGHT: u64 = 10_000;

/// Writes the CPU share for a cgroup.
///
/// # Errors
///
/// Returns an error if writing the control file fails.
pub fn set_cpu_shares(dir: &CgroupDir, shares: &str) -> Result<()> {
    match dir.version {
        CgroupVersion::V1 => write_control(&dir.path, "cpu.shares", shares)?,
        CgroupVersion::V2 => {
            let weight = shares
                .trim()
                .parse::<u64>()
                .map_or_else(|_| shares.to_owned(), |s| shares_to_weight(s).to_string());
            write_control(&dir.path, "cpu.weight", &weight)?;
        }
    }
    tracing::debug!(shares, path = %dir.path.display(), "CPU share set");
    Ok(())
}

/// Maps `[2, 262144]` shares linearly onto `[1, 10000]` weight.
pub(crate) fn shares_to_weight(shares: u64) -> u64 {
    let shares = shares.clamp(MIN_SHARES, MAX_SHARES);
    1 + ((shares - MIN_SHARES) * (MAX_WEIGHT - 1)) / (MAX_SHARES - MIN_SHARES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_conversion_covers_range_ends() {
        assert_eq!(shares_to_weight(2), 1);
        assert_eq!(shares_to_weight(262_144), 10_000);
        assert_eq!(shares_to_weight(1024), 39);
        assert_eq!(shares_to_weight(0), 1);
    }

    #[test]
    fn v1_writes_shares_verbatim() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = CgroupDir {
            path: tmp.path().to_path_buf(),
            version: CgroupVersion::V1,
        };
        set_cpu_shares(&dir, "512").expect("set");
        let content = std::fs::read_to_string(tmp.path().join("cpu.shares")).expect("read");
        assert_eq!(content, "512");
    }

    #[test]
    fn v2_writes_converted_weight() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = CgroupDir {
            path: tmp.path().to_path_buf(),
            version: CgroupVersion::V2,
        };
        set_cpu_shares(&dir, "1024").expect("set");
        let content = std::fs::read_to_string(tmp.path().join("cpu.weight")).expect("read");
        assert_eq!(content, "39");
    }
}
