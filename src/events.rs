use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Progress,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Progress => "progress",
        })
    }
}

/// Everything the background runner reports, in emission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunnerEvent {
    Log { level: LogLevel, text: String },
    Progress { index: usize, total: usize },
    Error(String),
    Finished { success: bool },
}

impl RunnerEvent {
    pub fn log(level: LogLevel, text: impl Into<String>) -> Self {
        RunnerEvent::Log {
            level,
            text: text.into(),
        }
    }
}
