mod command;
mod config;
mod core;
mod fallback;
mod image;
mod markup;
mod ops;
mod selection;
mod session;
mod snapshot;
mod storage;
mod style;
mod surface;

pub use crate::command::*;
pub use crate::config::*;
pub use crate::core::*;
pub use crate::fallback::*;
pub use crate::image::*;
pub use crate::markup::*;
pub use crate::ops::*;
pub use crate::selection::*;
pub use crate::session::*;
pub use crate::snapshot::*;
pub use crate::storage::*;
pub use crate::style::*;
pub use crate::surface::*;
