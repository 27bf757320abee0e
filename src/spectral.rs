pub mod fft;
pub mod filter;
