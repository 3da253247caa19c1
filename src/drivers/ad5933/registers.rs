//! AD5933 register map

/// Address and width of one chip register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub address: u8,
    pub len: usize,
}

/// Addressable registers of the impedance analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Control,
    StartFrequency,
    FrequencyIncrement,
    IncrementCount,
    SettlingCycles,
    Status,
    Temperature,
    Real,
    Imaginary,
}

/// Register table, indexed by `Register as usize`
pub const REGISTER_TABLE: [RegisterDescriptor; 9] = [
    RegisterDescriptor { address: 0x80, len: 2 },
    RegisterDescriptor { address: 0x82, len: 3 },
    RegisterDescriptor { address: 0x85, len: 3 },
    RegisterDescriptor { address: 0x88, len: 2 },
    RegisterDescriptor { address: 0x8A, len: 2 },
    RegisterDescriptor { address: 0x8F, len: 1 },
    RegisterDescriptor { address: 0x92, len: 2 },
    RegisterDescriptor { address: 0x94, len: 2 },
    RegisterDescriptor { address: 0x96, len: 2 },
];

/// Widest register, in bytes
pub const MAX_REGISTER_LEN: usize = 3;

impl Register {
    pub const ALL: [Register; 9] = [
        Register::Control,
        Register::StartFrequency,
        Register::FrequencyIncrement,
        Register::IncrementCount,
        Register::SettlingCycles,
        Register::Status,
        Register::Temperature,
        Register::Real,
        Register::Imaginary,
    ];

    pub const fn descriptor(self) -> RegisterDescriptor {
        REGISTER_TABLE[self as usize]
    }

    pub const fn address(self) -> u8 {
        self.descriptor().address
    }

    pub const fn len(self) -> usize {
        self.descriptor().len
    }
}

/// Command byte that loads the register address pointer
pub const ADDRESS_POINTER: u8 = 0xB0;

/// Bit patterns of the control register. The high byte (0x80) carries the
/// control mode nibble, output range and PGA gain; the low byte (0x81) carries
/// reset and clock source.
pub mod control {
    pub const MODE_MASK: u8 = 0xF0;
    pub const RANGE_MASK: u8 = 0b0000_0110;
    pub const PGA_MASK: u8 = 0b0000_0001;

    pub const NO_OPERATION: u8 = 0b0000_0000;
    pub const INIT_START_FREQUENCY: u8 = 0b0001_0000;
    pub const START_FREQUENCY_SWEEP: u8 = 0b0010_0000;
    pub const INCREMENT_FREQUENCY: u8 = 0b0011_0000;
    pub const REPEAT_FREQUENCY: u8 = 0b0100_0000;
    pub const MEASURE_TEMPERATURE: u8 = 0b1001_0000;
    pub const POWER_DOWN_MODE: u8 = 0b1010_0000;
    pub const STANDBY_MODE: u8 = 0b1011_0000;

    pub const OUTPUT_RANGE_1: u8 = 0b0000_0000;
    pub const OUTPUT_RANGE_2: u8 = 0b0000_0110;
    pub const OUTPUT_RANGE_3: u8 = 0b0000_0100;
    pub const OUTPUT_RANGE_4: u8 = 0b0000_0010;

    pub const PGA_GAIN_X1: u8 = 0b0000_0001;
    pub const PGA_GAIN_X5: u8 = 0b0000_0000;

    pub const RESET: u8 = 0b0001_0000;
    pub const CLOCK_EXTERNAL: u8 = 0b0000_1000;
    pub const CLOCK_INTERNAL: u8 = 0b0000_0000;
}

/// Status register bits
pub mod status {
    pub const TEMPERATURE_VALID: u8 = 0x01;
    pub const DATA_VALID: u8 = 0x02;
    pub const SWEEP_COMPLETE: u8 = 0x04;
}
