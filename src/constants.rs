//! # Hardware Constants Module
//!
//! Constants shared by the sensor drivers, grouped by functional area.

/// HC-SR04 style ultrasonic sensor constants
pub mod ultrasonic {
    /// Round-trip microseconds per centimetre of distance
    pub const MICROS_PER_CM: u32 = 58;

    /// Round-trip microseconds per inch of distance
    pub const MICROS_PER_INCH: u32 = 148;

    /// Low settle time before the trigger pulse
    pub const TRIGGER_SETUP_DELAY_US: u64 = 2;

    /// Width of the trigger pulse
    pub const TRIGGER_PULSE_DURATION_US: u64 = 10;

    /// Delay between level checks when polling the echo pin
    pub const POLLING_DELAY_US: u64 = 1;

    /// Range used by foreground and background measurements (400cm)
    pub const MAX_RANGE_CM: u32 = 400;

    /// Range of the one-shot "initialize and measure" helper (500cm)
    pub const ONE_SHOT_RANGE_CM: u32 = 500;

    /// Round-trip time recorded when nothing answers ("no object")
    pub const NO_OBJECT_ROUND_TRIP_US: u32 = 4000;

    /// Number of samples kept for the median filter
    pub const WINDOW_LEN: usize = 5;

    /// Maximum number of registered distance handlers
    pub const MAX_OBSERVERS: usize = 8;

    /// Background measurement period
    pub const CYCLE_MS: u64 = 145;

    /// Extra age, on top of a full cycle, before the newest sample counts as stale
    pub const STALE_SLACK_MS: u64 = 10;
}

/// DHT11 single-wire protocol timings
pub mod dht11 {
    /// Host start signal: line held low for at least 18ms
    pub const START_SIGNAL_MS: u32 = 18;

    /// Wait after releasing the line before expecting the sensor response
    pub const RESPONSE_DELAY_US: u32 = 40;

    /// Sample point after the rising edge of a data bit.
    /// A '0' is ~26us high, a '1' is ~70us high.
    pub const BIT_SAMPLE_DELAY_US: u32 = 28;

    /// Upper bound for any single phase of the response
    pub const EDGE_TIMEOUT_US: u32 = 100;

    /// Data bits in one frame (5 bytes)
    pub const FRAME_BITS: usize = 40;

    /// Minimum interval between two reads accepted by the sensor
    pub const MIN_READ_INTERVAL_MS: u64 = 2000;
}

/// Timing Constants (in milliseconds unless specified)
pub mod timing {
    /// Standard delay for visual feedback (500ms)
    pub const VISUAL_DELAY_MS: u64 = 500;
}

/// Communication Buffer Sizes
pub mod buffers {
    /// Formatted message buffer size
    pub const MESSAGE_BUFFER_SIZE: usize = 128;

    /// Serial message channel depth
    pub const SERIAL_CHANNEL_DEPTH: usize = 10;
}
