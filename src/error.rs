use serde::Serialize;
use thiserror::Error;

/// Errors raised by the calibration core.
///
/// Only the first two kinds abort a run in practice. Numerical trouble inside an
/// objective never surfaces here; it is absorbed by sentinel costs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CalibError {
    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("{stage} failed{band}: {source}")]
    Stage {
        stage: &'static str,
        band: StageBand,
        #[source]
        source: Box<CalibError>,
    },
}

/// Which colors a stage was working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageBand {
    All,
    Color(usize),
    Pair(usize, usize),
}

impl StageBand {
    /// Short `00` or `00/01` label; `None` for whole-sample stages.
    pub fn label(self) -> Option<String> {
        match self {
            StageBand::All => None,
            StageBand::Color(j) => Some(format!("{j:02}")),
            StageBand::Pair(j, k) => Some(format!("{j:02}/{k:02}")),
        }
    }
}

impl std::fmt::Display for StageBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageBand::All => Ok(()),
            StageBand::Color(j) => write!(f, " for color {j:02}"),
            StageBand::Pair(j, k) => write!(f, " for colors {j:02} and {k:02}"),
        }
    }
}

impl CalibError {
    pub fn config(message: impl Into<String>) -> Self {
        CalibError::Configuration(message.into())
    }

    /// Attach the calibration stage (and color band, if any) to a fatal error.
    pub fn in_stage(self, stage: &'static str, band: StageBand) -> Self {
        CalibError::Stage {
            stage,
            band,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping any stage wrappers.
    pub fn root(&self) -> &CalibError {
        match self {
            CalibError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Check that a paired input has the expected length.
pub fn ensure_len(what: &'static str, expected: usize, found: usize) -> Result<(), CalibError> {
    if expected == found {
        Ok(())
    } else {
        Err(CalibError::DimensionMismatch {
            what,
            expected,
            found,
        })
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<CalibError> for AppError {
    fn from(err: CalibError) -> Self {
        let exit_code = match err.root() {
            CalibError::Configuration(_) => 2,
            CalibError::InsufficientData(_) => 3,
            _ => 4,
        };
        AppError::new(exit_code, err.to_string())
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
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
