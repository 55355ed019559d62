//! # hopper-core
//!
//! Building blocks shared by every hopper replica:
//!
//! - **Wire codec**: [`FrameWriter`] / [`FrameReader`] for length-prefixed
//!   binary frames, plus [`FrameDecoder`] for splitting a byte stream
//! - **Node ring**: [`NodeRing`], a fixed membership list with a lock-free
//!   round-robin cursor
//! - **Group configuration**: [`GroupConfig`], validated once at startup
//! - **Core types**: [`ServerId`], [`NetworkAddress`], [`Endpoint`]
//!
//! ## Frame layout
//!
//! ```text
//! +----------------------+---------------------------+
//! | length: u32 LE (4B)  | payload (length bytes)    |
//! +----------------------+---------------------------+
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod config;
mod ring;
mod types;

// Codec exports
pub use codec::{
    CodecError, Frame, FrameDecoder, FrameReader, FrameWriter, LENGTH_HEADER_SIZE,
    MAX_FRAME_SIZE, NULL_STRING_MARKER, try_split_frame,
};

// Configuration exports
pub use config::{ConfigError, GroupConfig, majority};

// Ring exports
pub use ring::{NodeRing, RingError};

// Core type exports
pub use types::{Endpoint, NetworkAddress, NetworkAddressParseError, ServerId};
