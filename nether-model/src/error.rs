//! Model loading error types
//!
//! Loading distinguishes six classes of failure. Three of them terminate a
//! load on the spot (malformed container, bounds violation, configuration
//! violation); the other three are recorded in a [`Diagnostics`] collector so
//! that one pass over a broken file reports as many problems as possible.

use core::fmt;

/// Failure class of a model load problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad magic/version/length, bad chunk tag, missing required entry
    MalformedContainer,
    /// Missing required field, wrong element/component type or count
    Schema,
    /// Accessor or buffer view range exceeds its backing storage
    Bounds,
    /// Dangling index or a node graph cycle
    Reference,
    /// Joint, vertex or index count above the engine maximum
    Resource,
    /// A required shading program is unavailable
    Configuration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MalformedContainer => "malformed container",
            ErrorKind::Schema => "schema violation",
            ErrorKind::Bounds => "bounds violation",
            ErrorKind::Reference => "reference violation",
            ErrorKind::Resource => "resource violation",
            ErrorKind::Configuration => "configuration violation",
        };
        f.write_str(name)
    }
}

/// One recorded diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("bounds violation: {0}")]
    Bounds(String),

    #[error("configuration violation: {0}")]
    Configuration(String),

    #[error("failed to load '{file}': {}", summarize(.problems))]
    Invalid { file: String, problems: Vec<Problem> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("document parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid loader config: {0}")]
    Config(#[from] toml::de::Error),
}

fn summarize(problems: &[Problem]) -> String {
    match problems {
        [] => "no problems recorded".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more)", first, rest.len()),
    }
}

impl ModelError {
    /// Failure class of this error, if it belongs to the load taxonomy.
    ///
    /// For an aggregate [`ModelError::Invalid`] this is the class of the first
    /// recorded problem. Document parse errors count as schema violations and
    /// archive errors as malformed containers.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ModelError::MalformedContainer(_) | ModelError::Zip(_) => {
                Some(ErrorKind::MalformedContainer)
            }
            ModelError::Bounds(_) => Some(ErrorKind::Bounds),
            ModelError::Configuration(_) => Some(ErrorKind::Configuration),
            ModelError::Invalid { problems, .. } => problems.first().map(|p| p.kind),
            ModelError::Json(_) => Some(ErrorKind::Schema),
            ModelError::Io(_) | ModelError::Config(_) => None,
        }
    }

    /// Whether any recorded problem (or the error itself) is of `kind`.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        match self {
            ModelError::Invalid { problems, .. } => problems.iter().any(|p| p.kind == kind),
            other => other.kind() == Some(kind),
        }
    }

    /// Recorded problems of an aggregate error; empty for every other variant.
    pub fn problems(&self) -> &[Problem] {
        match self {
            ModelError::Invalid { problems, .. } => problems,
            _ => &[],
        }
    }
}

/// Problem collector for a single load.
///
/// A load is "loaded" exactly while no problem has been recorded.
#[derive(Debug)]
pub(crate) struct Diagnostics {
    file: String,
    problems: Vec<Problem>,
}

impl Diagnostics {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            problems: Vec::new(),
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn record(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(file = %self.file, %kind, "{message}");
        self.problems.push(Problem { kind, message });
    }

    pub fn schema(&mut self, message: impl Into<String>) {
        self.record(ErrorKind::Schema, message);
    }

    pub fn reference(&mut self, message: impl Into<String>) {
        self.record(ErrorKind::Reference, message);
    }

    pub fn resource(&mut self, message: impl Into<String>) {
        self.record(ErrorKind::Resource, message);
    }

    pub fn is_loaded(&self) -> bool {
        self.problems.is_empty()
    }

    /// Resolve an index from the document against a collection length.
    ///
    /// Negative or out-of-range values record a reference violation.
    pub fn index(&mut self, value: i64, len: usize, what: impl fmt::Display) -> Option<usize> {
        match usize::try_from(value) {
            Ok(index) if index < len => Some(index),
            _ => {
                self.reference(format!("invalid {what} index {value} (count {len})"));
                None
            }
        }
    }

    /// Convert the collected state into the load result.
    pub fn finish<T>(self, value: T) -> Result<T, ModelError> {
        if self.problems.is_empty() {
            Ok(value)
        } else {
            tracing::warn!(
                file = %self.file,
                problems = self.problems.len(),
                "could not load model"
            );
            Err(ModelError::Invalid {
                file: self.file,
                problems: self.problems,
            })
        }
    }
}

/// Log and build a fatal bounds violation.
pub(crate) fn bounds_violation(file: &str, message: impl Into<String>) -> ModelError {
    let message = message.into();
    tracing::error!(file = %file, "bounds violation: {message}");
    ModelError::Bounds(message)
}

/// Log and build a malformed container failure.
pub(crate) fn malformed(file: &str, message: impl Into<String>) -> ModelError {
    let message = message.into();
    tracing::error!(file = %file, "malformed container: {message}");
    ModelError::MalformedContainer(message)
}
