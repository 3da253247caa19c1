// src/config/constants.rs
//! Node-wide constants. Everything configurable defaults to a value from here.

/// Bus identity of the node on the host I2C bus
pub mod identity {
    /// 7-bit address this node answers to unless configured otherwise
    pub const DEFAULT_SLAVE_ADDRESS: u8 = 0x09;
    /// The node whose acquisition counters start in phase; all others start half a period late
    pub const CANONICAL_SLAVE_ADDRESS: u8 = 0x08;
    /// Lowest non-reserved 7-bit address
    pub const MIN_SLAVE_ADDRESS: u8 = 0x08;
    /// Highest non-reserved 7-bit address
    pub const MAX_SLAVE_ADDRESS: u8 = 0x77;
}

/// Acquisition period limits and defaults
pub mod periods {
    /// Every period written by the host is clamped to this value
    pub const MAX_PERIOD: u16 = 9999;
    pub const DEFAULT_IMPEDANCE_PERIOD_MS: u16 = 9999;
    pub const DEFAULT_TEMPERATURE_PERIOD_MS: u16 = 9999;
    /// Legacy EMG interval, also used as the settle delay before an EMG conversion
    pub const DEFAULT_EMG_PERIOD_US: u16 = 750;
}

/// Millisecond scheduler constants
pub mod scheduler {
    pub const TICK_PERIOD_MS: u64 = 1;
    pub const DEFAULT_HEARTBEAT_PERIOD_MS: u16 = 1000;
    pub const DEFAULT_ABSENT_INDICATOR_PERIOD_MS: u16 = 1000;
}

/// Slave protocol engine sizing
pub mod protocol {
    /// A host write carries at most a command byte or a 16-bit value
    pub const RX_BUFFER_LEN: usize = 2;
    /// Longest response (the combined impedance frame)
    pub const TX_BUFFER_MAX_LEN: usize = 8;
    /// Legacy period getters always answer with four ASCII bytes
    pub const PERIOD_RESPONSE_LEN: usize = 4;
    /// Byte clocked out when the host reads past the end of a response
    pub const IDLE_FILL_BYTE: u8 = 0xFF;
    pub const DEFAULT_INBOX_CAPACITY: usize = 64;
    pub const MIN_INBOX_CAPACITY: usize = 8;
    /// Host setting requests waiting for the main loop
    pub const SETTINGS_QUEUE_CAPACITY: usize = 8;
}

/// AD5933 impedance analyzer constants
pub mod impedance {
    pub const INTERNAL_CLOCK_HZ: u32 = 16_776_000;
    pub const EXTERNAL_CLOCK_HZ: u32 = 1_000_000;
    pub const DEFAULT_START_FREQUENCY_HZ: u32 = 1000;
    pub const DEFAULT_INCREMENT_FREQUENCY_HZ: u32 = 0;
    pub const DEFAULT_INCREMENT_COUNT: u16 = 0;
    pub const DEFAULT_SETTLING_CYCLES: u16 = 500;
    pub const DEFAULT_SETTLING_MULTIPLIER: u8 = 1;
    pub const MAX_INCREMENT_COUNT: u16 = 511;
    pub const MAX_SETTLING_CYCLES: u16 = 511;
    /// Frequency codes are 24-bit
    pub const MAX_FREQUENCY_CODE: u32 = 0x00FF_FFFF;
    /// Control register value after power-on reset (power-down mode)
    pub const POST_RESET_CONTROL: u16 = 0xA000;
    /// Status reads allowed per polling phase before the sweep reports a timeout
    pub const DEFAULT_POLL_BUDGET: u32 = 200_000;
    pub const DEFAULT_SWEEP_ATTEMPTS: u32 = 3;
    pub const DEFAULT_SWITCH_SETTLE_US: u32 = 0;

    /// Placeholder frame published before the first sweep completes
    pub const PLACEHOLDER_PAIR_1_REAL: i16 = 100;
    pub const PLACEHOLDER_PAIR_1_IMAGINARY: i16 = 150;
    pub const PLACEHOLDER_PAIR_2_REAL: i16 = 200;
    pub const PLACEHOLDER_PAIR_2_IMAGINARY: i16 = 250;
}

/// MAX30205 temperature sensor constants
pub mod temperature {
    /// Hysteresis register value after power-on reset
    pub const POST_RESET_HYSTERESIS: u16 = 0x4B00;
    /// Degrees Celsius per LSB of the temperature register
    pub const CELSIUS_PER_LSB: f32 = 1.0 / 256.0;
}

/// Diagnostic halt mode
pub mod diagnostics {
    pub const FAULT_BLINK_INTERVAL_MS: u32 = 500;
}
