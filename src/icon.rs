//! Icon representation for matches.
//!
//! Modeled as an enum rather than a class hierarchy: a match's icon is
//! either a themed name the UI resolves itself, inline raster data handed
//! over the wire by an IPC runner, or absent.

/// Raw raster image data as handed over the IPC wire by a remote runner's
/// `icon-data` match property.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Bytes per row, which may be larger than `width * channels` due to padding.
    pub row_stride: u32,
    /// Whether the data contains an alpha channel.
    pub has_alpha: bool,
    /// Bits per color sample.
    pub bits_per_sample: u32,
    /// Number of color channels.
    pub channels: u32,
    /// Raw pixel bytes, `row_stride * height` long.
    pub data: Vec<u8>,
}

/// A match or action's icon.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Icon {
    /// Resolved by the UI's icon theme from a symbolic or file name.
    Named(String),
    /// Inline image data, typically supplied by an out-of-process runner
    /// that has no icon theme of its own to name.
    Inline(RemoteImage),
    /// No icon.
    #[default]
    None,
}

impl Icon {
    /// Shorthand for a named icon.
    pub fn named(name: impl Into<String>) -> Self {
        Icon::Named(name.into())
    }
}
