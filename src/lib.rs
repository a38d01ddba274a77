#![warn(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::too_long_first_doc_paragraph)]

pub mod codec;
pub mod config;
pub mod datafile;
pub mod directory;
pub mod engine;
pub mod error;
pub mod index;
pub mod lockfile;
pub mod meta;
pub mod version;

pub use codec::Entry;
pub use config::{Config, ConfigOverrides};
pub use directory::Item;
pub use engine::{Bitcask, PutOptions, Stats};
pub use error::{Error, Result};
