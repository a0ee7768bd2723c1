//! BMS context: measurement aggregation, error flag evaluation, the safety
//! state machine and balancing orchestration.

use std::fmt;
use std::time::Instant;

use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::afe::{AfeData, AfeDriver, BalanceRequest, MAX_CELLS};
use crate::balancing::{self, SECTION_CHANNELS};
use crate::config::BmsConfig;
use crate::error::{Error, Result};
use crate::flags::{ConfigParts, DataParts, ErrorFlags, SwitchMask};
use crate::soc::{self, SocEstimator};

const NUM_SECTIONS: usize = MAX_CELLS / SECTION_CHANNELS;

/// Ideal diode control: enable the opposite-direction switch above this
/// current magnitude (A) and disable it again below the release threshold.
const IDEAL_DIODE_SET_CURRENT: f32 = 0.5;
const IDEAL_DIODE_RELEASE_CURRENT: f32 = 0.1;

/// Operating state of the power path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BmsState {
    /// Both power switches off
    Off,
    /// Only charging allowed
    Chg,
    /// Only discharging allowed
    Dis,
    /// Charging and discharging allowed
    Normal,
    /// Lowest power state, requires a power cycle to recover
    Shutdown,
}

impl fmt::Display for BmsState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BmsState::Off => "OFF",
            BmsState::Chg => "CHG",
            BmsState::Dis => "DIS",
            BmsState::Normal => "NORMAL",
            BmsState::Shutdown => "SHUTDOWN",
        };
        write!(f, "{}", s)
    }
}

/// The BMS context, owning the AFE driver, the configuration and the
/// continuously updated status data.
///
/// All methods assume exclusive access; `update` is meant to be called from
/// a single periodic task (250 ms or faster for accurate SOC counting).
pub struct Bms<D: AfeDriver> {
    driver: D,
    /// Configuration values. Changes take effect after `apply_config`.
    pub conf: BmsConfig,
    /// Latest measurements and hardware status.
    pub data: AfeData,
    /// Charging allowed by the user / remote control
    pub chg_enable: bool,
    /// Discharging allowed by the user / remote control
    pub dis_enable: bool,
    /// Battery is full, set by the charge termination logic
    pub full: bool,
    /// Battery is empty, set by the discharge termination logic
    pub empty: bool,
    /// State of charge (%)
    pub soc: f32,
    state: BmsState,
    no_idle_timestamp: Instant,
    soc_estimator: SocEstimator,
}

impl<D: AfeDriver> Bms<D> {
    pub fn new(driver: D, conf: BmsConfig) -> Self {
        Self {
            driver,
            conf,
            data: AfeData::default(),
            chg_enable: true,
            dis_enable: true,
            full: false,
            empty: false,
            soc: 0.0,
            state: BmsState::Off,
            no_idle_timestamp: Instant::now(),
            soc_estimator: SocEstimator::default(),
        }
    }

    pub fn state(&self) -> BmsState {
        self.state
    }

    /// Direct access to the driver, e.g. for chip-specific setup.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Writes the complete configuration to the AFE. Values the hardware
    /// only supports in discrete steps are adjusted in `conf` to the
    /// actually applied value. Returns the configuration parts the driver
    /// supports.
    pub fn apply_config(&mut self) -> Result<ConfigParts> {
        self.driver.configure(&mut self.conf, ConfigParts::ALL)
    }

    /// Runs one full measurement and control cycle.
    ///
    /// A communication error aborts the remainder of the cycle; previous
    /// measurements and error flags stay valid and the next cycle retries.
    pub fn update(&mut self) -> Result<()> {
        let now = Instant::now();

        self.driver.read_data(
            &mut self.data,
            DataParts::CELL_VOLTAGES | DataParts::PACK_VOLTAGES,
        )?;

        self.driver.read_data(&mut self.data, DataParts::CURRENT)?;
        if self.data.current.abs() > self.conf.bal_idle_current {
            self.no_idle_timestamp = now;
        }

        self.soc_estimator.update_at(
            now,
            self.data.current,
            self.conf.nominal_capacity_ah,
            &mut self.soc,
        );

        self.driver.read_data(&mut self.data, DataParts::TEMPERATURES)?;

        self.update_error_flags()?;
        self.state_machine();
        self.apply_balancing(now)?;

        Ok(())
    }

    /// Charging conditions, ignoring the charge-FET-off flag (it reports an
    /// unexpected off state and must not block the transition meant to turn
    /// the FET on).
    pub fn chg_allowed(&self) -> bool {
        !(self.data.error_flags & !ErrorFlags::CHG_OFF).chg_error()
            && !self.full
            && self.chg_enable
    }

    /// Discharging conditions, ignoring the discharge-FET-off flag.
    pub fn dis_allowed(&self) -> bool {
        !(self.data.error_flags & !ErrorFlags::DIS_OFF).dis_error()
            && !self.empty
            && self.dis_enable
    }

    fn update_error_flags(&mut self) -> Result<()> {
        let prev = self.data.error_flags;

        // hardware-latched flags; on error the data is untouched and the
        // previous flags stay valid
        self.driver.read_data(&mut self.data, DataParts::ERROR_FLAGS)?;
        let mut flags = self.data.error_flags;

        // charge overcurrent is checked in software, most chips only
        // protect the discharge direction
        flags.set(
            ErrorFlags::CHG_OVERCURRENT,
            self.data.current > self.conf.chg_oc_limit,
        );

        // temperature limits are checked in software with hysteresis: a
        // raised flag only clears after the temperature recovers past
        // limit -/+ t_limit_hyst
        let hyst = |flag| {
            if prev.contains(flag) {
                self.conf.t_limit_hyst
            } else {
                0.0
            }
        };
        flags.set(
            ErrorFlags::CHG_OVERTEMP,
            self.data.cell_temp_max > self.conf.chg_ot_limit - hyst(ErrorFlags::CHG_OVERTEMP),
        );
        flags.set(
            ErrorFlags::CHG_UNDERTEMP,
            self.data.cell_temp_min < self.conf.chg_ut_limit + hyst(ErrorFlags::CHG_UNDERTEMP),
        );
        flags.set(
            ErrorFlags::DIS_OVERTEMP,
            self.data.cell_temp_max > self.conf.dis_ot_limit - hyst(ErrorFlags::DIS_OVERTEMP),
        );
        flags.set(
            ErrorFlags::DIS_UNDERTEMP,
            self.data.cell_temp_min < self.conf.dis_ut_limit + hyst(ErrorFlags::DIS_UNDERTEMP),
        );

        self.data.error_flags = flags;
        Ok(())
    }

    fn chg_switch(&mut self, enable: bool) {
        // switch failures show up as the chg-off flag next cycle, the state
        // machine is not rolled back
        if let Err(err) = self.driver.set_switches(SwitchMask::CHG, enable) {
            error!("charge switch request failed: {}", err);
        }
    }

    fn dis_switch(&mut self, enable: bool) {
        if let Err(err) = self.driver.set_switches(SwitchMask::DIS, enable) {
            error!("discharge switch request failed: {}", err);
        }
    }

    fn state_machine(&mut self) {
        match self.state {
            BmsState::Off => {
                if self.dis_allowed() {
                    self.dis_switch(true);
                    self.state = BmsState::Dis;
                    info!("OFF -> DIS (error flags: {})", self.data.error_flags);
                } else if self.chg_allowed() {
                    self.chg_switch(true);
                    self.state = BmsState::Chg;
                    info!("OFF -> CHG (error flags: {})", self.data.error_flags);
                }
            }
            BmsState::Chg => {
                if !self.chg_allowed() {
                    self.chg_switch(false);
                    // may be on because of ideal diode control
                    self.dis_switch(false);
                    self.state = BmsState::Off;
                    info!("CHG -> OFF (error flags: {})", self.data.error_flags);
                } else if self.dis_allowed() {
                    self.dis_switch(true);
                    self.state = BmsState::Normal;
                    info!("CHG -> NORMAL (error flags: {})", self.data.error_flags);
                } else if !self.driver.has_ideal_diode() {
                    // ideal diode control for discharge MOSFET (hysteresis
                    // against chatter at the zero crossing)
                    if self.data.current > IDEAL_DIODE_SET_CURRENT {
                        self.dis_switch(true);
                    } else if self.data.current < IDEAL_DIODE_RELEASE_CURRENT {
                        self.dis_switch(false);
                    }
                }
            }
            BmsState::Dis => {
                if !self.dis_allowed() {
                    self.dis_switch(false);
                    self.chg_switch(false);
                    self.state = BmsState::Off;
                    info!("DIS -> OFF (error flags: {})", self.data.error_flags);
                } else if self.chg_allowed() {
                    self.chg_switch(true);
                    self.state = BmsState::Normal;
                    info!("DIS -> NORMAL (error flags: {})", self.data.error_flags);
                } else if !self.driver.has_ideal_diode() {
                    // ideal diode control for charge MOSFET
                    if self.data.current < -IDEAL_DIODE_SET_CURRENT {
                        self.chg_switch(true);
                    } else if self.data.current > -IDEAL_DIODE_RELEASE_CURRENT {
                        self.chg_switch(false);
                    }
                }
            }
            BmsState::Normal => {
                if !self.dis_allowed() {
                    self.dis_switch(false);
                    self.state = BmsState::Chg;
                    info!("NORMAL -> CHG (error flags: {})", self.data.error_flags);
                } else if !self.chg_allowed() {
                    self.chg_switch(false);
                    self.state = BmsState::Dis;
                    info!("NORMAL -> DIS (error flags: {})", self.data.error_flags);
                }
            }
            BmsState::Shutdown => {
                // terminal until power cycle
            }
        }
    }

    fn apply_balancing(&mut self, now: Instant) -> Result<()> {
        if !self.conf.auto_balancing {
            return Ok(());
        }

        let idle_secs = now.duration_since(self.no_idle_timestamp).as_secs();
        let should_balance = idle_secs >= u64::from(self.conf.bal_idle_delay)
            && self.data.cell_voltage_max > self.conf.bal_cell_voltage_min
            && self.data.cell_voltage_max - self.data.cell_voltage_min
                > self.conf.bal_cell_voltage_diff;

        if should_balance {
            let mask = balancing::select_cells(
                &self.data.cell_voltages,
                self.data.cell_voltage_min,
                self.conf.bal_cell_voltage_diff,
                NUM_SECTIONS,
            );
            if mask != self.data.balancing_status {
                self.driver.balance(BalanceRequest::Cells(mask))?;
                self.data.balancing_status = mask;
            }
        } else if self.data.balancing_status != 0 {
            self.driver.balance(BalanceRequest::Off)?;
            self.data.balancing_status = 0;
        }

        Ok(())
    }

    /// Balances exactly the cells in `mask`. Only available while automatic
    /// balancing is disabled.
    pub fn balance_manually(&mut self, mask: u32) -> Result<()> {
        if self.conf.auto_balancing {
            return Err(Error::Busy);
        }
        self.driver.balance(BalanceRequest::Cells(mask))?;
        self.data.balancing_status = mask;
        Ok(())
    }

    /// Re-seeds the SOC. Values of 0 to 100 are taken over directly, any
    /// other value estimates the SOC from the average open circuit voltage.
    /// Only call while the battery is relaxed (no significant current).
    pub fn soc_reset(&mut self, percent: i32) {
        if (0..=100).contains(&percent) {
            self.soc = percent as f32;
        } else {
            self.soc = soc::estimate_from_voltage(&self.conf, self.data.cell_voltage_avg);
        }
        self.soc_estimator.reset();
    }

    /// Disables both switches and puts the AFE into its lowest power state.
    /// The state machine stays in SHUTDOWN until the device is power-cycled.
    pub fn shutdown(&mut self) {
        self.chg_switch(false);
        self.dis_switch(false);
        self.driver.shutdown();
        info!("{} -> SHUTDOWN", self.state);
        self.state = BmsState::Shutdown;
    }

    /// Reinitializes the runtime status: switches off, balancing stopped,
    /// error flags cleared, state OFF and the SOC re-seeded from the open
    /// circuit voltage. The configuration is kept.
    pub fn reset(&mut self) -> Result<()> {
        self.driver
            .set_switches(SwitchMask::CHG | SwitchMask::DIS, false)?;
        self.driver.balance(BalanceRequest::Off)?;
        self.data.error_flags = ErrorFlags::NONE;
        self.data.balancing_status = 0;
        self.state = BmsState::Off;
        self.full = false;
        self.empty = false;
        self.chg_enable = true;
        self.dis_enable = true;
        self.no_idle_timestamp = Instant::now();
        self.soc_reset(-1);
        Ok(())
    }

    /// Chip register dump for diagnostics, if the driver supports it.
    pub fn registers_dump(&mut self) -> Result<String> {
        self.driver.registers_dump()
    }
}
