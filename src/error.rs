/// Broad failure category, used for batch error policy and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid run parameter. Fatal before any I/O.
    Config,
    /// Missing/unreadable input or failed write.
    Io,
    /// Malformed or empty spectrum (skipped, batch continues).
    Data,
    /// The kinematic fitter could not produce a solution.
    FitNonConvergence,
}

#[derive(Clone)]
pub struct AppError {
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Data, message)
    }

    pub fn fit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FitNonConvergence, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether a batch may log this error and move on to the next spectrum.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind, ErrorKind::Data | ErrorKind::Io)
    }

    pub fn exit_code(&self) -> u8 {
        match self.kind {
            ErrorKind::Config | ErrorKind::Io => 2,
            ErrorKind::Data => 3,
            ErrorKind::FitNonConvergence => 4,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_kind() {
        assert_eq!(AppError::config("x").exit_code(), 2);
        assert_eq!(AppError::io("x").exit_code(), 2);
        assert_eq!(AppError::data("x").exit_code(), 3);
        assert_eq!(AppError::fit("x").exit_code(), 4);
    }

    #[test]
    fn only_data_and_io_are_recoverable() {
        assert!(AppError::data("x").is_recoverable());
        assert!(AppError::io("x").is_recoverable());
        assert!(!AppError::config("x").is_recoverable());
        assert!(!AppError::fit("x").is_recoverable());
    }
}
