//! Persistent tick counter in `system/state.json`.

use std::path::Path;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::error::HarnessError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickState {
    #[serde(default)]
    pub tick_count: u64,
    #[serde(default)]
    pub last_tick: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_tick_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub first_tick_date: Option<NaiveDate>,
}

impl TickState {
    /// A missing file is a fresh install; a corrupt one is logged and reset.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read tick state");
                return Self::default();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "tick state is corrupt, starting over");
            Self::default()
        })
    }

    /// Written to a temp file and renamed so a crash never leaves half a file.
    pub fn save(&self, path: &Path) -> Result<(), HarnessError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HarnessError::persistence("save tick state", parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HarnessError::persistence("save tick state", path, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| HarnessError::persistence("save tick state", &tmp, e))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| HarnessError::persistence("save tick state", path, e))
    }

    /// Advances the counter and returns the new tick number.
    pub fn begin_tick(&mut self, now: DateTime<Utc>) -> u64 {
        self.tick_count += 1;
        self.last_tick = Some(now);
        if self.first_tick_date.is_none() {
            self.first_tick_date = Some(now.date_naive());
        }
        self.tick_count
    }

    pub fn end_tick(&mut self, now: DateTime<Utc>) {
        self.last_tick_end = Some(now);
    }
}
