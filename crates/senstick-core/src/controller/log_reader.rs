//! Read position for streaming a logged session back over the protocol

use crate::config::SettingError;

/// Size of the log id characteristic blob.
pub const LOG_ID_BLOB_SIZE: usize = 7;

/// Marker for "no session" in the metadata blob.
pub const NO_LOG_ID: u8 = 0xff;

/// Where the next read of a logged session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCursor {
    pub log_id: u8,
    /// Records skipped between two returned records.
    pub skip_count: u16,
    /// Index of the next record to return.
    pub position: u32,
}

impl LogCursor {
    /// Parse `[log_id][skip_count u16 LE][position u32 LE]`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SettingError> {
        if bytes.len() != LOG_ID_BLOB_SIZE {
            return Err(SettingError::InvalidLength {
                length: bytes.len(),
                expected: LOG_ID_BLOB_SIZE,
            });
        }

        Ok(Self {
            log_id: bytes[0],
            skip_count: u16::from_le_bytes([bytes[1], bytes[2]]),
            position: u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
        })
    }

    pub fn write_bytes(&self, out: &mut [u8]) -> usize {
        if out.len() < LOG_ID_BLOB_SIZE {
            return 0;
        }

        out[0] = self.log_id;
        out[1..3].copy_from_slice(&self.skip_count.to_le_bytes());
        out[3..7].copy_from_slice(&self.position.to_le_bytes());
        LOG_ID_BLOB_SIZE
    }

    /// Distance between two consecutive returned records.
    pub fn stride(&self) -> u32 {
        self.skip_count as u32 + 1
    }

    pub(crate) fn advance(&mut self) {
        self.position = self.position.saturating_add(self.stride());
    }
}
