//! # chorus-channels
//!
//! Chat surfaces owned by Chorus itself. Third-party gateways plug in through
//! `chorus_core::traits::ChannelProvider`.

pub mod web;
