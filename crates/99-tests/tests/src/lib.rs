//! Cross-crate tests for stream buffers running against the software device.

#[cfg(all(test, not(target_arch = "wasm32")))]
mod native_e2e;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod ring_props;
