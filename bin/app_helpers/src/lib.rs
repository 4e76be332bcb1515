pub mod pipeline;
pub mod sample_format;
