//! The stream naming convention shared with the upload side.
//!
//! Every file a device uploads carries a fixed-width prefix identifying
//! the stream that produced it:
//!
//! ```text
//! {data_type_id:6}{device_id:12}{sensor_index:3}<free-form suffix>
//! ```
//!
//! `data_type_id` is 6 ASCII alphanumerics (right-padded with `_` for
//! shorter ids), `device_id` is the 12-hex-char machine id, and
//! `sensor_index` is 3 decimal digits. Two files belong to the same
//! stream iff their 21-byte prefixes are byte-identical.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Width of the `data_type_id` segment.
pub const DATA_TYPE_ID_LEN: usize = 6;
/// Width of the `device_id` segment.
pub const DEVICE_ID_LEN: usize = 12;
/// Width of the `sensor_index` segment.
pub const SENSOR_INDEX_LEN: usize = 3;
/// Total fixed width of the stream prefix.
pub const STREAM_PREFIX_LEN: usize = DATA_TYPE_ID_LEN + DEVICE_ID_LEN + SENSOR_INDEX_LEN;

/// Padding character for short `data_type_id`s.
const PAD: char = '_';

/// Identity of one sensor stream: which processing pipeline applies and
/// where its output is archived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    /// Stream type id, e.g. `audio`, `temp`, `trapcm`.
    pub data_type_id: String,
    /// Machine id of the producing device (12 hex chars).
    pub device_id: String,
    /// Index of the sensor on the device (port number etc).
    pub sensor_index: u16,
}

impl StreamKey {
    /// Build a key, validating segment shapes.
    pub fn new(
        data_type_id: impl Into<String>,
        device_id: impl Into<String>,
        sensor_index: u16,
    ) -> Result<Self> {
        let data_type_id = data_type_id.into();
        let device_id = device_id.into();

        if data_type_id.is_empty() || data_type_id.len() > DATA_TYPE_ID_LEN {
            return Err(Error::Naming(format!(
                "data_type_id must be 1..={DATA_TYPE_ID_LEN} chars, got {data_type_id:?}"
            )));
        }
        if !data_type_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Naming(format!(
                "data_type_id must be ASCII alphanumeric, got {data_type_id:?}"
            )));
        }
        if device_id.len() != DEVICE_ID_LEN
            || !device_id.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(Error::Naming(format!(
                "device_id must be {DEVICE_ID_LEN} hex chars, got {device_id:?}"
            )));
        }
        if sensor_index > 999 {
            return Err(Error::Naming(format!(
                "sensor_index must fit {SENSOR_INDEX_LEN} digits, got {sensor_index}"
            )));
        }

        Ok(Self {
            data_type_id,
            device_id,
            sensor_index,
        })
    }

    /// The 21-char prefix this key renders to.
    pub fn prefix(&self) -> String {
        format!(
            "{:_<PAD_WIDTH$}{}{:03}",
            self.data_type_id,
            self.device_id,
            self.sensor_index,
            PAD_WIDTH = DATA_TYPE_ID_LEN,
        )
    }

    /// Parse a key out of a processing filename.
    ///
    /// Only the leading `STREAM_PREFIX_LEN` bytes are inspected; the
    /// suffix is free-form and ignored.
    pub fn from_filename(name: &str) -> Result<Self> {
        let prefix = raw_prefix(name)?;

        let type_part = &prefix[..DATA_TYPE_ID_LEN];
        let device_part = &prefix[DATA_TYPE_ID_LEN..DATA_TYPE_ID_LEN + DEVICE_ID_LEN];
        let index_part = &prefix[DATA_TYPE_ID_LEN + DEVICE_ID_LEN..];

        let data_type_id = type_part.trim_end_matches(PAD).to_string();
        // str::parse would accept a leading `+`, which renders back as a
        // different prefix than the file carries.
        if !index_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Naming(format!("bad sensor_index in {name:?}")));
        }
        let sensor_index: u16 = index_part
            .parse()
            .map_err(|_| Error::Naming(format!("bad sensor_index in {name:?}")))?;

        Self::new(data_type_id, device_part, sensor_index)
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.data_type_id, self.device_id, self.sensor_index
        )
    }
}

/// Extract the raw 21-byte prefix of a filename, without interpreting it.
///
/// Registry bookkeeping keys on the raw prefix: it is cheaper than a full
/// parse and byte-identity is the definition of stream identity.
pub fn raw_prefix(name: &str) -> Result<&str> {
    if name.len() < STREAM_PREFIX_LEN || !name.is_char_boundary(STREAM_PREFIX_LEN) {
        return Err(Error::Naming(format!(
            "filename shorter than the {STREAM_PREFIX_LEN}-char stream prefix: {name:?}"
        )));
    }
    Ok(&name[..STREAM_PREFIX_LEN])
}
