use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("write out of bounds: offset {offset}, length {length}, capacity {capacity}")]
    OutOfBounds {
        offset: u64,
        length: usize,
        capacity: u64,
    },
}
