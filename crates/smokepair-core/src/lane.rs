//! The two execution tracks of a comparison run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One of the two independent execution tracks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Baseline: the application as it is today.
    Before,

    /// Candidate: the application with the change applied.
    After,
}

impl Lane {
    /// Both lanes, baseline first.
    pub const ALL: [Lane; 2] = [Lane::Before, Lane::After];

    /// Lane name, also used as its output subdirectory.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Before => "before",
            Lane::After => "after",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Working directories of the two lanes for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanePair {
    pub before: PathBuf,
    pub after: PathBuf,
}

impl LanePair {
    pub fn directory(&self, lane: Lane) -> &Path {
        match lane {
            Lane::Before => &self.before,
            Lane::After => &self.after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_names() {
        assert_eq!(Lane::Before.as_str(), "before");
        assert_eq!(Lane::After.to_string(), "after");
        assert_eq!(Lane::ALL, [Lane::Before, Lane::After]);
    }

    #[test]
    fn test_lane_pair_directory() {
        let pair = LanePair {
            before: PathBuf::from("/app"),
            after: PathBuf::from("/app/tmp/smokepair/rails/worktree"),
        };
        assert_eq!(pair.directory(Lane::Before), Path::new("/app"));
        assert!(pair.directory(Lane::After).ends_with("worktree"));
    }
}
