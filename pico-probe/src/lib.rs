//! # pico-probe
//!
//! Streams synthetic frames to a running Pico Pixel viewer, gated by a
//! marker the viewer can re-arm. Handy for checking a viewer setup without
//! instrumenting a real application.

pub mod config;
pub mod pattern;
