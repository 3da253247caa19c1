// src/protocol/command.rs
//! Host command codes

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// First byte of every host exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    /// Latest EMG conversion, also triggers a new one
    Emg = 0x00,
    Imp1Real = 0x01,
    Imp1Imaginary = 0x02,
    Imp2Real = 0x03,
    Imp2Imaginary = 0x04,
    /// All four impedance words from one pass; clears readiness
    ImpAll = 0x05,
    Temperature = 0x06,
    /// Legacy EMG interval in µs, readable as ASCII and writable
    EmgPeriod = 0x07,
    ImpPeriod = 0x08,
    TempPeriod = 0x09,
    /// Start a full impedance and temperature acquisition
    RequestRead = 0x0A,
    /// One byte, 1 once the requested acquisition has completed
    ReadReady = 0x0B,
    StopPeriodic = 0x0C,
    StartPeriodic = 0x0D,
    /// Output range selector 1-4
    SetOutputRange = 0x0E,
    /// PGA gain factor 1 or 5
    SetPgaGain = 0x0F,
    /// Reference switch, 0 opens it
    SetReferenceSwitch = 0x10,
}

impl CommandCode {
    pub const ALL: [CommandCode; 17] = [
        CommandCode::Emg,
        CommandCode::Imp1Real,
        CommandCode::Imp1Imaginary,
        CommandCode::Imp2Real,
        CommandCode::Imp2Imaginary,
        CommandCode::ImpAll,
        CommandCode::Temperature,
        CommandCode::EmgPeriod,
        CommandCode::ImpPeriod,
        CommandCode::TempPeriod,
        CommandCode::RequestRead,
        CommandCode::ReadReady,
        CommandCode::StopPeriodic,
        CommandCode::StartPeriodic,
        CommandCode::SetOutputRange,
        CommandCode::SetPgaGain,
        CommandCode::SetReferenceSwitch,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::try_from(byte).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_contiguous() {
        for (index, code) in CommandCode::ALL.iter().enumerate() {
            assert_eq!(u8::from(*code) as usize, index);
            assert_eq!(CommandCode::from_byte(index as u8), Some(*code));
        }
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(CommandCode::from_byte(0x11), None);
        assert_eq!(CommandCode::from_byte(0xFF), None);
    }
}
