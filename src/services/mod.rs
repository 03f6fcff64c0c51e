pub mod amounts;
pub mod archive;
pub mod crypto;
pub mod csv_io;
pub mod openai;
pub mod platform;
pub mod processor;
pub mod progress;
pub mod reports;
pub mod state;
pub mod storage;
pub mod text_extraction;

#[cfg(test)]
pub(crate) mod testing;
