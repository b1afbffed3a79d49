pub mod clock;
pub mod data;
pub mod error;
pub mod outcome;
pub mod release;
pub mod retry;
pub mod version;

#[cfg(test)]
pub mod fakes;
