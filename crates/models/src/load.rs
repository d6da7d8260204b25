use std::fmt;

/// How a run selects the quarters it will process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Everything after the latest SUCCESS quarter in metadata.
    Delta,
    /// An explicit caller-supplied quarter set; quarters are independent.
    Partial,
    /// The entire advertised history, realized as sequential per-quarter
    /// loads with delta-merge replacement.
    Full,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Delta => "delta",
            LoadMode::Partial => "partial",
            LoadMode::Full => "full",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal and non-terminal states of a quarter load, as persisted to the
/// load-history table. Only `Success` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Started,
    Success,
    Failed,
    RolledBack,
}

impl LoadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStatus::Started => "STARTED",
            LoadStatus::Success => "SUCCESS",
            LoadStatus::Failed => "FAILED",
            LoadStatus::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
