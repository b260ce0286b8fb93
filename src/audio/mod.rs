//! Audio plumbing: decode provider bytes, analyse the spectrum, play it back.

pub mod analyser;
pub mod decode;
#[cfg(feature = "cpal-audio")]
pub mod device;
pub mod playback;
