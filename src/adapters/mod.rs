pub mod openai;
pub mod service;
pub mod simulated;
