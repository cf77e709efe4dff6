// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Tunables for the decoder session and the player-wide settings consulted by
//! [`crate::process_info::ProcessInfo`].

use std::time::Duration;

/// Parameters of a hardware decode session that the client may want to adjust.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    /// How long the decoder may go without producing a frame while compressed data is pending
    /// before it is considered stalled.
    pub decoder_timeout: Duration,
    /// Fill level of the stream buffer, in percent, below which the decoder asks for more data
    /// instead of being polled for frames.
    pub minimum_buffer_level: f32,
    /// Fill level, in percent, above which `add_data` refuses new input.
    pub buffer_full_level: f32,
    /// Upper bound on the time `close_decoder` waits for pending buffers to drain.
    pub drain_timeout: Duration,
    /// Forward PTS jump above which a discontinuity is assumed.
    pub discontinuity_threshold: Duration,
    /// Number of PTS deltas used for the rolling frame duration estimate.
    pub duration_window: usize,
    /// Number of times a partially accepted access unit is retried before giving up.
    pub write_retries: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            decoder_timeout: Duration::from_millis(5000),
            minimum_buffer_level: 5.0,
            buffer_full_level: 99.0,
            drain_timeout: Duration::from_millis(500),
            discontinuity_threshold: Duration::from_secs(1),
            duration_window: 16,
            write_retries: 8,
        }
    }
}

/// Player-wide settings, normally coming from the advanced settings of the application.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSettings {
    /// Highest tempo the user allows, extending the platform maximum.
    pub max_tempo: f32,
    /// Longest off-sync period tolerated for audio passthrough before resyncing.
    pub max_passthrough_offsync_duration: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            max_tempo: 1.55,
            max_passthrough_offsync_duration: Duration::from_millis(10),
        }
    }
}
