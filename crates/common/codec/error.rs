use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    #[error("Unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("Array has {0} elements, maximum is 255")]
    ArrayTooLarge(usize),
    #[error("Packed integer is {0} bytes wide, maximum is 32")]
    IntTooLarge(usize),
    #[error("Length prefix {0} does not fit in memory")]
    LengthOverflow(u64),
}
