//! Section providers backed by external data.
//!
//! - [`ChannelFileProvider`]: current value per channel, read from a JSON file

mod file;

pub use file::{ChannelFileProvider, CHANNEL_FILTER};
