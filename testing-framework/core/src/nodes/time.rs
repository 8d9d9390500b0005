use std::{collections::BTreeMap, fmt, path::Path};

use serde::{Deserialize, Serialize};

/// Clock a node process sees, applied through libfaketime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TimeControl {
    /// Relative offset in faketime syntax, e.g. `+10d` or `-2h`.
    Offset(String),
    /// Absolute start time (`YYYY-mm-dd HH:MM:SS`), optionally sped up.
    StartAt { at: String, speed_up: Option<u32> },
    /// Real time running `factor` times faster.
    SpeedUp(u32),
}

impl TimeControl {
    #[must_use]
    pub fn faketime(&self) -> String {
        match self {
            Self::Offset(offset) => offset.clone(),
            Self::StartAt { at, speed_up: None } => format!("@{at}"),
            Self::StartAt {
                at,
                speed_up: Some(factor),
            } => format!("@{at} x{factor}"),
            Self::SpeedUp(factor) => format!("+0 x{factor}"),
        }
    }

    /// Environment a process needs to run under this clock.
    #[must_use]
    pub fn env(&self, libfaketime: &Path) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("FAKETIME".to_owned(), self.faketime()),
            ("LD_PRELOAD".to_owned(), libfaketime.display().to_string()),
            ("FAKETIME_DONT_RESET".to_owned(), "1".to_owned()),
            ("TZ".to_owned(), "UTC".to_owned()),
        ])
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.faketime())
    }
}
