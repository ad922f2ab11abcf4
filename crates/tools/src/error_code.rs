use serde::{Deserialize, Serialize};

/// `SCREAMING_CASE` error codes a tool may report so prompts can key off
/// them programmatically, not just by matching the human-readable string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolErrorCode {
    FileNotFound,
    PathIsDirectory,
    BinaryFile,
    LineOutOfRange,
    TextNotFound,
    BackupNotFound,
    ConfirmationRequired,
    PathTraversalDetected,
    LlmRequestFailed,
}

impl ToolErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ToolErrorCode::PathIsDirectory => "PATH_IS_DIRECTORY",
            ToolErrorCode::BinaryFile => "BINARY_FILE",
            ToolErrorCode::LineOutOfRange => "LINE_OUT_OF_RANGE",
            ToolErrorCode::TextNotFound => "TEXT_NOT_FOUND",
            ToolErrorCode::BackupNotFound => "BACKUP_NOT_FOUND",
            ToolErrorCode::ConfirmationRequired => "CONFIRMATION_REQUIRED",
            ToolErrorCode::PathTraversalDetected => "PATH_TRAVERSAL_DETECTED",
            ToolErrorCode::LlmRequestFailed => "LLM_REQUEST_FAILED",
        }
    }
}

impl std::fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_screaming_case() {
        assert_eq!(ToolErrorCode::FileNotFound.as_str(), "FILE_NOT_FOUND");
        assert_eq!(ToolErrorCode::PathTraversalDetected.to_string(), "PATH_TRAVERSAL_DETECTED");
    }
}
