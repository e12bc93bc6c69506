//! # UI Module
//!
//! UI components for the Sound Check game.

pub mod game_display;
