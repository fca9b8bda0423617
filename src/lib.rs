//! MaskFE: interactive mask annotation for image datasets.
//!
//! The editing core (`session`, `workspace` and everything below them) is
//! toolkit-independent and runs on one thread; `app` is a thin eframe shell
//! and `cli` a headless batch front end.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

pub mod logger;

pub mod app;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod compositor;
pub mod io;
pub mod ops;
pub mod session;
pub mod settings;
pub mod viewport;
pub mod workspace;
