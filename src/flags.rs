//! Bitmask types shared between the supervisory core and the AFE drivers.
//!
//! The error flag bit positions are part of the external data interface
//! (UI and remote parameter access read the raw value), so they must not be
//! reordered.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Generates a transparent bitmask newtype with the usual set operations.
macro_rules! mask_type {
    ($(#[$meta:meta])* $name:ident($repr:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            pub const NONE: Self = Self(0);

            /// Returns true if all bits of `other` are set in `self`.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Returns true if any bit of `other` is set in `self`.
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub fn set(&mut self, other: Self, value: bool) {
                if value {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl std::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl std::ops::Not for $name {
            type Output = Self;
            fn not(self) -> Self {
                Self(!self.0)
            }
        }
    };
}

mask_type! {
    /// Set of BMS error conditions, one bit per condition.
    ErrorFlags(u16)
}

impl ErrorFlags {
    /// Cell undervoltage
    pub const CELL_UNDERVOLTAGE: Self = Self(1 << 0);
    /// Cell overvoltage
    pub const CELL_OVERVOLTAGE: Self = Self(1 << 1);
    /// Pack short circuit (discharge direction)
    pub const SHORT_CIRCUIT: Self = Self(1 << 2);
    /// Pack overcurrent (discharge direction)
    pub const DIS_OVERCURRENT: Self = Self(1 << 3);
    /// Pack overcurrent (charge direction)
    pub const CHG_OVERCURRENT: Self = Self(1 << 4);
    /// Cell open wire
    pub const OPEN_WIRE: Self = Self(1 << 5);
    /// Temperature below discharge minimum limit
    pub const DIS_UNDERTEMP: Self = Self(1 << 6);
    /// Temperature above discharge maximum limit
    pub const DIS_OVERTEMP: Self = Self(1 << 7);
    /// Temperature below charge minimum limit
    pub const CHG_UNDERTEMP: Self = Self(1 << 8);
    /// Temperature above charge maximum limit
    pub const CHG_OVERTEMP: Self = Self(1 << 9);
    /// Internal temperature above limit (e.g. BMS IC)
    pub const INT_OVERTEMP: Self = Self(1 << 10);
    /// Cell failure (too high voltage difference between cells)
    pub const CELL_FAILURE: Self = Self(1 << 11);
    /// Discharge FET is off even though it should be on
    pub const DIS_OFF: Self = Self(1 << 12);
    /// Charge FET is off even though it should be on
    pub const CHG_OFF: Self = Self(1 << 13);
    /// MOSFET temperature above limit
    pub const FET_OVERTEMP: Self = Self(1 << 14);

    pub const ALL: Self = Self(0x7FFF);

    const NAMES: [(Self, &'static str); 15] = [
        (Self::CELL_UNDERVOLTAGE, "cell_undervoltage"),
        (Self::CELL_OVERVOLTAGE, "cell_overvoltage"),
        (Self::SHORT_CIRCUIT, "short_circuit"),
        (Self::DIS_OVERCURRENT, "dis_overcurrent"),
        (Self::CHG_OVERCURRENT, "chg_overcurrent"),
        (Self::OPEN_WIRE, "open_wire"),
        (Self::DIS_UNDERTEMP, "dis_undertemp"),
        (Self::DIS_OVERTEMP, "dis_overtemp"),
        (Self::CHG_UNDERTEMP, "chg_undertemp"),
        (Self::CHG_OVERTEMP, "chg_overtemp"),
        (Self::INT_OVERTEMP, "int_overtemp"),
        (Self::CELL_FAILURE, "cell_failure"),
        (Self::DIS_OFF, "dis_off"),
        (Self::CHG_OFF, "chg_off"),
        (Self::FET_OVERTEMP, "fet_overtemp"),
    ];

    /// Conditions which forbid charging.
    pub const CHG_ERRORS: Self = Self(
        Self::CELL_OVERVOLTAGE.0
            | Self::CHG_OVERCURRENT.0
            | Self::OPEN_WIRE.0
            | Self::CHG_UNDERTEMP.0
            | Self::CHG_OVERTEMP.0
            | Self::INT_OVERTEMP.0
            | Self::CELL_FAILURE.0
            | Self::CHG_OFF.0,
    );

    /// Conditions which forbid discharging.
    pub const DIS_ERRORS: Self = Self(
        Self::CELL_UNDERVOLTAGE.0
            | Self::SHORT_CIRCUIT.0
            | Self::DIS_OVERCURRENT.0
            | Self::OPEN_WIRE.0
            | Self::DIS_UNDERTEMP.0
            | Self::DIS_OVERTEMP.0
            | Self::INT_OVERTEMP.0
            | Self::CELL_FAILURE.0
            | Self::DIS_OFF.0,
    );

    /// Returns true if any charging error flag is set.
    pub const fn chg_error(self) -> bool {
        self.intersects(Self::CHG_ERRORS)
    }

    /// Returns true if any discharging error flag is set.
    pub const fn dis_error(self) -> bool {
        self.intersects(Self::DIS_ERRORS)
    }
}

impl fmt::Display for ErrorFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

mask_type! {
    /// Selection of the power-path switches controlled by the AFE.
    SwitchMask(u8)
}

impl SwitchMask {
    /// Charge MOSFET
    pub const CHG: Self = Self(1 << 0);
    /// Discharge MOSFET
    pub const DIS: Self = Self(1 << 1);
    /// Pre-discharge path
    pub const PDSG: Self = Self(1 << 2);
    /// Pre-charge path
    pub const PCHG: Self = Self(1 << 3);
}

mask_type! {
    /// Selection of configuration groups for `AfeDriver::configure`.
    ConfigParts(u32)
}

impl ConfigParts {
    pub const VOLTAGE_LIMITS: Self = Self(1 << 0);
    pub const TEMP_LIMITS: Self = Self(1 << 1);
    pub const CURRENT_LIMITS: Self = Self(1 << 2);
    pub const BALANCING: Self = Self(1 << 3);
    pub const ALERTS: Self = Self(1 << 4);
    pub const VOLTAGE_REGS: Self = Self(1 << 5);
    pub const ALL: Self = Self(0x3F);
}

mask_type! {
    /// Selection of measurement groups for `AfeDriver::read_data`.
    DataParts(u32)
}

impl DataParts {
    pub const CELL_VOLTAGES: Self = Self(1 << 0);
    pub const PACK_VOLTAGES: Self = Self(1 << 1);
    pub const TEMPERATURES: Self = Self(1 << 2);
    pub const CURRENT: Self = Self(1 << 3);
    pub const BALANCING: Self = Self(1 << 4);
    pub const ERROR_FLAGS: Self = Self(1 << 5);
    pub const ALL: Self = Self(0x3F);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_are_stable() {
        // external interface contract, do not reorder
        assert_eq!(ErrorFlags::CELL_UNDERVOLTAGE.0, 1 << 0);
        assert_eq!(ErrorFlags::CELL_OVERVOLTAGE.0, 1 << 1);
        assert_eq!(ErrorFlags::SHORT_CIRCUIT.0, 1 << 2);
        assert_eq!(ErrorFlags::DIS_OVERCURRENT.0, 1 << 3);
        assert_eq!(ErrorFlags::CHG_OVERCURRENT.0, 1 << 4);
        assert_eq!(ErrorFlags::OPEN_WIRE.0, 1 << 5);
        assert_eq!(ErrorFlags::DIS_UNDERTEMP.0, 1 << 6);
        assert_eq!(ErrorFlags::DIS_OVERTEMP.0, 1 << 7);
        assert_eq!(ErrorFlags::CHG_UNDERTEMP.0, 1 << 8);
        assert_eq!(ErrorFlags::CHG_OVERTEMP.0, 1 << 9);
        assert_eq!(ErrorFlags::INT_OVERTEMP.0, 1 << 10);
        assert_eq!(ErrorFlags::CELL_FAILURE.0, 1 << 11);
        assert_eq!(ErrorFlags::DIS_OFF.0, 1 << 12);
        assert_eq!(ErrorFlags::CHG_OFF.0, 1 << 13);
        assert_eq!(ErrorFlags::FET_OVERTEMP.0, 1 << 14);
    }

    #[test]
    fn chg_and_dis_error_sets() {
        assert!(ErrorFlags::CELL_OVERVOLTAGE.chg_error());
        assert!(!ErrorFlags::CELL_OVERVOLTAGE.dis_error());

        assert!(ErrorFlags::CELL_UNDERVOLTAGE.dis_error());
        assert!(!ErrorFlags::CELL_UNDERVOLTAGE.chg_error());

        // common to both directions
        for flag in [
            ErrorFlags::OPEN_WIRE,
            ErrorFlags::INT_OVERTEMP,
            ErrorFlags::CELL_FAILURE,
        ] {
            assert!(flag.chg_error());
            assert!(flag.dis_error());
        }

        // FET temperature is reported but does not block either direction
        assert!(!ErrorFlags::FET_OVERTEMP.chg_error());
        assert!(!ErrorFlags::FET_OVERTEMP.dis_error());
    }

    #[test]
    fn display_lists_names() {
        let flags = ErrorFlags::CELL_OVERVOLTAGE | ErrorFlags::CHG_OVERTEMP;
        assert_eq!(flags.to_string(), "cell_overvoltage|chg_overtemp");
        assert_eq!(ErrorFlags::NONE.to_string(), "none");
    }

    #[test]
    fn set_operations() {
        let mut flags = ErrorFlags::NONE;
        flags.insert(ErrorFlags::SHORT_CIRCUIT);
        assert!(flags.contains(ErrorFlags::SHORT_CIRCUIT));
        flags.set(ErrorFlags::SHORT_CIRCUIT, false);
        assert!(flags.is_empty());
    }
}
