use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("dataset at {path} could not be parsed: {message}")]
    #[diagnostic(help("the upsert moves the file aside and starts the portal from an empty dataset"))]
    CorruptedDataset { path: Utf8PathBuf, message: String },

    #[error("record has no usable identity: {0}")]
    MissingIdentity(String),

    #[error("portal dataset does not exist yet: {0}")]
    MissingSourceFile(Utf8PathBuf),

    #[error("atomic write of {path} failed before replace: {message}")]
    PartialWrite { path: Utf8PathBuf, message: String },

    #[error("failed to read config file at {path}: {message}")]
    ConfigRead { path: Utf8PathBuf, message: String },

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unknown portal: {0}")]
    UnknownPortal(String),

    #[error("invalid encoding name: {0}")]
    InvalidEncoding(String),

    #[error("failed to encode dataset: {0}")]
    Encoding(String),

    #[error("collector failed: {0}")]
    Collector(String),

    #[error("failed to install interrupt handler: {0}")]
    Interrupt(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
