use std::fmt;

#[derive(Debug)]
pub enum ClinichatSDKError {
    JsonError(String),
    NotFound(String),
    Other(String),
    IO(String),
    Transport(String),
    Http { status: u16, message: String },
    Serialization(String),
    NotConnected,
    Config(String),
    Upload(String),
    Timeout(String),
}

impl fmt::Display for ClinichatSDKError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClinichatSDKError::JsonError(e) => write!(f, "JSON error: {}", e),
            ClinichatSDKError::NotFound(e) => write!(f, "Not found: {}", e),
            ClinichatSDKError::Other(e) => write!(f, "Other error: {}", e),
            ClinichatSDKError::IO(e) => write!(f, "IO error: {}", e),
            ClinichatSDKError::Transport(e) => write!(f, "Transport error: {}", e),
            ClinichatSDKError::Http { status, message } => {
                write!(f, "HTTP error [{}]: {}", status, message)
            }
            ClinichatSDKError::Serialization(e) => write!(f, "Serialization error: {}", e),
            ClinichatSDKError::NotConnected => write!(f, "Not connected"),
            ClinichatSDKError::Config(e) => write!(f, "Config error: {}", e),
            ClinichatSDKError::Upload(e) => write!(f, "Upload error: {}", e),
            ClinichatSDKError::Timeout(e) => write!(f, "Timeout: {}", e),
        }
    }
}

impl std::error::Error for ClinichatSDKError {}

impl From<serde_json::Error> for ClinichatSDKError {
    fn from(error: serde_json::Error) -> Self {
        ClinichatSDKError::JsonError(error.to_string())
    }
}

impl From<std::io::Error> for ClinichatSDKError {
    fn from(error: std::io::Error) -> Self {
        ClinichatSDKError::IO(error.to_string())
    }
}

impl From<reqwest::Error> for ClinichatSDKError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ClinichatSDKError::Timeout(error.to_string())
        } else {
            ClinichatSDKError::Transport(error.to_string())
        }
    }
}

impl ClinichatSDKError {
    /// 判断错误是否属于瞬时 I/O 故障（下个周期可自动恢复）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClinichatSDKError::Transport(_)
                | ClinichatSDKError::Timeout(_)
                | ClinichatSDKError::Http { status: 500..=599, .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ClinichatSDKError>;
