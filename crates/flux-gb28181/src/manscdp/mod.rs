pub mod builder;
pub mod decoder;
pub mod types;

pub use builder::{BasicParams, ControlType, Field, ManscdpBody, QueryType};
pub use decoder::{
    decode, decode_with_fallback, extract_command_type, extract_field, CommandKey,
};
pub use types::*;
