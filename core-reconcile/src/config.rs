//! Scanner tuning.

use core_runtime::config::{CoreConfig, DEFAULT_VIDEO_EXTENSIONS};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Lower-case extensions counted as media files
    pub video_extensions: Vec<String>,
    /// Upper bound on one scan, listing included
    pub scan_timeout: Duration,
    /// Probe proxy targets that live outside the listed remote root
    pub probe_unlisted_targets: bool,
    /// Scan jobs returned by history queries
    pub history_limit: u32,
}

impl ScanConfig {
    pub fn from_core_config(config: &CoreConfig) -> Self {
        Self {
            video_extensions: config.video_extensions.clone(),
            ..Self::default()
        }
    }

    pub fn is_video_extension(&self, extension: &str) -> bool {
        self.video_extensions.iter().any(|e| e == extension)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            video_extensions: DEFAULT_VIDEO_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            scan_timeout: Duration::from_secs(2 * 60 * 60),
            probe_unlisted_targets: true,
            history_limit: 20,
        }
    }
}
