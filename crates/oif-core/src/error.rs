use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgDecodeError {
    #[error("argument pack has {0} entries but a null type or value table")]
    NullTable(usize),

    #[error("argument #{index} has a null value pointer")]
    NullValue { index: usize },

    #[error("array argument #{index} has a null descriptor or data pointer")]
    NullArray { index: usize },

    #[error("array argument #{index} has negative extent {extent}")]
    NegativeExtent { index: usize, extent: i64 },
}
