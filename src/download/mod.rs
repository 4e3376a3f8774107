mod downloader;
mod parts;

pub use downloader::{Downloader, PART_SIZE};
#[cfg(test)]
pub(crate) use downloader::tests::PatternSource;
