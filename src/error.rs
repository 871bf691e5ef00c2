use std::collections::TryReserveError;
use std::error::Error;
use std::fmt::Display;

#[derive(Debug)]
pub enum GaussError {
    CapacityExceeded { capacity: usize },
    ConvergenceFailure(String),
    SingularSystem(String),
    DomainError(String),
    AllocationFailure(String),
    InvalidInput(String),
    File(std::io::Error),
    Yaml(serde_yaml::Error),
    Json(serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GaussError>;

impl From<std::io::Error> for GaussError {
    fn from(err: std::io::Error) -> GaussError {
        GaussError::File(err)
    }
}

impl From<serde_yaml::Error> for GaussError {
    fn from(err: serde_yaml::Error) -> GaussError {
        GaussError::Yaml(err)
    }
}

impl From<serde_json::Error> for GaussError {
    fn from(err: serde_json::Error) -> GaussError {
        GaussError::Json(err)
    }
}

impl From<TryReserveError> for GaussError {
    fn from(err: TryReserveError) -> Self {
        GaussError::AllocationFailure(err.to_string())
    }
}

impl Display for GaussError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GaussError::CapacityExceeded { capacity } => {
                write!(f, "List is full, capacity of {capacity} entries exceeded")
            }
            GaussError::ConvergenceFailure(x) => write!(f, "Fit did not converge: {x}"),
            GaussError::SingularSystem(x) => write!(f, "Matrix is singular: {x}"),
            GaussError::DomainError(x) => write!(f, "Equation could not be evaluated: {x}"),
            GaussError::AllocationFailure(x) => write!(f, "Unable to allocate memory: {x}"),
            GaussError::InvalidInput(x) => write!(f, "Invalid input: {x}"),
            GaussError::File(x) => write!(f, "File I/O error: {x}"),
            GaussError::Yaml(x) => write!(f, "Error parsing the configuration: {x}"),
            GaussError::Json(x) => write!(f, "Error handling JSON data: {x}"),
        }
    }
}

impl Error for GaussError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GaussError::File(x) => Some(x),
            GaussError::Yaml(x) => Some(x),
            GaussError::Json(x) => Some(x),
            _ => None,
        }
    }
}

/// Allocates a zeroed buffer, reporting failure instead of aborting.
pub fn zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(len)?;
    buffer.resize(len, T::default());
    Ok(buffer)
}
