mod fmri;
mod version;

pub use fmri::{Fmri, MalformedFmri};
pub use version::{DotSequence, Version};

#[cfg(test)]
mod tests;
