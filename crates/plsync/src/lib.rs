//! Physical layer synchronisation for DVB-S2 receivers.
//!
//! The stages are meant to be chained as
//! ```text
//! IQ samples -> Rotator -> SymbolSync -> PlSync -> XFECFRAME symbols
//! ```
//! where the rotator is driven by the frequency corrections published by [`plsync::PlSync`].

pub mod error;
pub mod delay_line;
pub mod linear_bucket;
pub mod reed_muller;
pub mod pi2_bpsk;
pub mod pl_signalling;
pub mod pl_frame_sync;
pub mod pl_freq_sync;
pub mod pl_descrambler;
pub mod interpolators;
pub mod symbol_sync;
pub mod rotator;
pub mod plsync;

#[cfg(test)]
pub(crate) mod test_helpers;
