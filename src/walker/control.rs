// Filter verdicts and walk outcomes shared by every walk level

use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Answer of a filter hook for one volume or file system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterVerdict {
    /// Enter the branch
    #[default]
    Continue,
    /// Leave the branch out, keep walking its siblings
    Skip,
    /// Abort the whole walk
    Stop,
}

/// Result of a processing hook or of a walk
#[derive(Debug)]
pub enum WalkOutcome {
    Ok,
    /// Early termination requested by a hook
    Stop,
    Error(EngineError),
}

impl WalkOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, WalkOutcome::Ok)
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, WalkOutcome::Stop)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, WalkOutcome::Error(_))
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            WalkOutcome::Error(e) => Some(e),
            _ => None,
        }
    }

    /// `Ok` and `Stop` are successful terminations
    pub fn into_result(self) -> EngineResult<bool> {
        match self {
            WalkOutcome::Ok => Ok(true),
            WalkOutcome::Stop => Ok(false),
            WalkOutcome::Error(e) => Err(e),
        }
    }
}

impl From<EngineError> for WalkOutcome {
    fn from(err: EngineError) -> Self {
        WalkOutcome::Error(err)
    }
}

impl From<EngineResult<WalkOutcome>> for WalkOutcome {
    fn from(result: EngineResult<WalkOutcome>) -> Self {
        result.unwrap_or_else(WalkOutcome::Error)
    }
}

impl fmt::Display for WalkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalkOutcome::Ok => write!(f, "ok"),
            WalkOutcome::Stop => write!(f, "stopped"),
            WalkOutcome::Error(e) => write!(f, "error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_predicates() {
        assert!(WalkOutcome::Ok.is_ok());
        assert!(WalkOutcome::Stop.is_stop());
        let err = WalkOutcome::from(EngineError::hook("bad"));
        assert!(err.is_error());
        assert!(matches!(err.error(), Some(EngineError::Hook(_))));
        assert_eq!(FilterVerdict::default(), FilterVerdict::Continue);
    }

    #[test]
    fn test_outcome_into_result() {
        assert!(WalkOutcome::Ok.into_result().unwrap());
        assert!(!WalkOutcome::Stop.into_result().unwrap());
        let failed: EngineResult<WalkOutcome> = Err(EngineError::NoFileSystem { offset: 0 });
        assert!(WalkOutcome::from(failed).into_result().is_err());
        assert_eq!(WalkOutcome::Stop.to_string(), "stopped");
    }
}
