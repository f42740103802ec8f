//! Backup request lifecycle phases
//!
//! Both backends share one phase vocabulary. The polling variant walks
//! `Started -> Creating -> Created -> Uploading -> Completed`, the export
//! variant goes straight from `Started` to `Completed` or `Failed`.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Persisted lifecycle phase of a backup request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    /// Never observed by the operator
    #[default]
    #[serde(rename = "")]
    Unstarted,
    Started,
    Creating,
    Created,
    CreateFailed,
    Uploading,
    UploadFailed,
    Completed,
    Failed,
}

/// Something that happened to a backup request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseEvent {
    Start,
    CreateRequested,
    CreateSucceeded,
    CreateFailed,
    UploadRequested,
    UploadSucceeded,
    UploadFailed,
    ExportSucceeded,
    ExportFailed,
}

impl Phase {
    /// Next phase for `event`, or `None` when the edge does not exist
    pub fn on(self, event: PhaseEvent) -> Option<Phase> {
        use Phase::*;
        use PhaseEvent as E;

        match (self, event) {
            (Unstarted, E::Start) => Some(Started),
            (Started, E::CreateRequested) => Some(Creating),
            (Creating, E::CreateSucceeded) => Some(Created),
            (Creating, E::CreateFailed) => Some(CreateFailed),
            (Created, E::UploadRequested) => Some(Uploading),
            (Uploading, E::UploadSucceeded) => Some(Completed),
            (Uploading, E::UploadFailed) => Some(UploadFailed),
            (Started, E::ExportSucceeded) => Some(Completed),
            (Started, E::ExportFailed) => Some(Failed),
            _ => None,
        }
    }

    /// Terminal phases are never left automatically
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::CreateFailed | Phase::UploadFailed | Phase::Completed | Phase::Failed
        )
    }

    /// Terminal phase reached through a failure
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Phase::CreateFailed | Phase::UploadFailed | Phase::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Unstarted => "",
            Phase::Started => "Started",
            Phase::Creating => "Creating",
            Phase::Created => "Created",
            Phase::CreateFailed => "CreateFailed",
            Phase::Uploading => "Uploading",
            Phase::UploadFailed => "UploadFailed",
            Phase::Completed => "Completed",
            Phase::Failed => "Failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
