//! Driver contract between the supervisory core and the analog front-end.

use serde::{Deserialize, Serialize};

use crate::config::BmsConfig;
use crate::error::Result;
use crate::flags::{ConfigParts, DataParts, ErrorFlags, SwitchMask};

/// Maximum number of cell channels (3 balancing sections of 5 channels).
pub const MAX_CELLS: usize = 15;

/// Maximum number of external thermistors.
pub const MAX_THERMISTORS: usize = 3;

/// Cells with a measured voltage above this threshold count as connected (V).
pub const CELL_CONNECTED_THRESHOLD: f32 = 0.5;

/// Balancing request passed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceRequest {
    /// Stop balancing on all channels.
    Off,
    /// Let the IC balance automatically (only some chips support this).
    Auto,
    /// Balance exactly the cells set in the mask (bit 0 = first cell).
    /// Adjacent bits within a section must not be set simultaneously.
    Cells(u32),
}

/// Snapshot of the measurements read back from the AFE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AfeData {
    /// Single cell voltages (V), unconnected channels read near 0 V
    pub cell_voltages: [f32; MAX_CELLS],
    /// Maximum cell voltage (V)
    pub cell_voltage_max: f32,
    /// Minimum cell voltage (V)
    pub cell_voltage_min: f32,
    /// Average cell voltage over the connected cells (V)
    pub cell_voltage_avg: f32,
    /// Voltage of the entire stack (V)
    pub total_voltage: f32,
    /// Pack current, charging positive (A)
    pub current: f32,
    /// External thermistor temperatures (°C)
    pub cell_temps: [f32; MAX_THERMISTORS],
    /// Maximum cell temperature (°C)
    pub cell_temp_max: f32,
    /// Minimum cell temperature (°C)
    pub cell_temp_min: f32,
    /// Average cell temperature (°C)
    pub cell_temp_avg: f32,
    /// Internal temperature of the AFE chip (°C)
    pub ic_temp: f32,
    /// MOSFET temperature (°C), if the board measures it
    pub mosfet_temp: f32,
    /// Temperature of the host MCU (°C), filled in by the integrating
    /// firmware, not by the AFE driver
    pub mcu_temp: f32,
    /// Number of channels with a cell attached
    pub connected_cells: usize,
    /// Currently balanced cells (bit 0 = first cell)
    pub balancing_status: u32,
    /// Error flags latched by the hardware
    pub error_flags: ErrorFlags,
}

impl Default for AfeData {
    fn default() -> Self {
        Self {
            cell_voltages: [0.0; MAX_CELLS],
            cell_voltage_max: 0.0,
            cell_voltage_min: 0.0,
            cell_voltage_avg: 0.0,
            total_voltage: 0.0,
            current: 0.0,
            cell_temps: [0.0; MAX_THERMISTORS],
            cell_temp_max: 0.0,
            cell_temp_min: 0.0,
            cell_temp_avg: 0.0,
            ic_temp: 0.0,
            mosfet_temp: 0.0,
            mcu_temp: 0.0,
            connected_cells: 0,
            balancing_status: 0,
            error_flags: ErrorFlags::NONE,
        }
    }
}

impl AfeData {
    /// Recomputes min/max/avg, total voltage and the connected cell count
    /// from the per-cell voltages. Drivers call this after filling in
    /// `cell_voltages`.
    pub fn refresh_cell_stats(&mut self) {
        let mut min = f32::MAX;
        let mut max = -f32::MAX;
        let mut sum = 0.0;
        let mut connected = 0;
        for v in self.cell_voltages {
            if v > CELL_CONNECTED_THRESHOLD {
                connected += 1;
                sum += v;
                min = min.min(v);
                max = max.max(v);
            }
        }
        if connected > 0 {
            self.cell_voltage_min = min;
            self.cell_voltage_max = max;
            self.cell_voltage_avg = sum / connected as f32;
            self.total_voltage = sum;
        } else {
            self.cell_voltage_min = 0.0;
            self.cell_voltage_max = 0.0;
            self.cell_voltage_avg = 0.0;
            self.total_voltage = 0.0;
        }
        self.connected_cells = connected;
    }

    /// Recomputes the temperature statistics from the thermistor readings.
    /// `num_sensors` limits the evaluation to the populated channels.
    pub fn refresh_temp_stats(&mut self, num_sensors: usize) {
        let n = num_sensors.min(MAX_THERMISTORS).max(1);
        let temps = &self.cell_temps[..n];
        self.cell_temp_min = temps.iter().copied().fold(f32::MAX, f32::min);
        self.cell_temp_max = temps.iter().copied().fold(-f32::MAX, f32::max);
        self.cell_temp_avg = temps.iter().sum::<f32>() / n as f32;
    }
}

/// Interface implemented by each supported AFE chip (and the emulator).
///
/// All methods take `&mut self` as most chips require stateful register
/// transactions even for reads.
pub trait AfeDriver {
    /// Writes the selected configuration parts to the chip.
    ///
    /// Thresholds which the hardware only supports in discrete steps are
    /// rounded down to the next available step and the actually applied
    /// value is written back into `conf`. Returns the parts the driver
    /// actually applied, which may be a subset of `parts`.
    fn configure(&mut self, conf: &mut BmsConfig, parts: ConfigParts) -> Result<ConfigParts>;

    /// Reads the selected measurement groups into `data`.
    ///
    /// On error, `data` must be left as it was so the caller keeps the
    /// previous valid measurements.
    fn read_data(&mut self, data: &mut AfeData, parts: DataParts) -> Result<()>;

    /// Enables or disables the selected power-path switches.
    fn set_switches(&mut self, switches: SwitchMask, enable: bool) -> Result<()>;

    /// Starts, stops or redirects balancing.
    fn balance(&mut self, request: BalanceRequest) -> Result<()>;

    /// Puts the chip into its lowest power state. Recovery usually requires
    /// a hardware event (e.g. charger attached), so no error is reported.
    fn shutdown(&mut self);

    /// Human-readable dump of the chip registers for diagnostics.
    fn registers_dump(&mut self) -> Result<String> {
        Err(crate::error::Error::NotSupported)
    }

    /// True if the chip implements ideal-diode behaviour for the power path
    /// itself, making the software hysteresis in the state machine
    /// unnecessary.
    fn has_ideal_diode(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_stats_ignore_unconnected_channels() {
        let mut data = AfeData::default();
        data.cell_voltages[0] = 3.3;
        data.cell_voltages[1] = 3.4;
        data.cell_voltages[2] = 0.1; // open channel
        data.cell_voltages[3] = 3.5;
        data.refresh_cell_stats();

        assert_eq!(data.connected_cells, 3);
        assert_eq!(data.cell_voltage_min, 3.3);
        assert_eq!(data.cell_voltage_max, 3.5);
        assert!((data.cell_voltage_avg - 3.4).abs() < 1e-6);
        assert!((data.total_voltage - 10.2).abs() < 1e-6);
    }

    #[test]
    fn cell_stats_with_no_cells() {
        let mut data = AfeData::default();
        data.refresh_cell_stats();
        assert_eq!(data.connected_cells, 0);
        assert_eq!(data.cell_voltage_max, 0.0);
        assert_eq!(data.total_voltage, 0.0);
    }

    #[test]
    fn temp_stats() {
        let mut data = AfeData::default();
        data.cell_temps = [20.0, 25.0, 18.0];
        data.refresh_temp_stats(3);
        assert_eq!(data.cell_temp_min, 18.0);
        assert_eq!(data.cell_temp_max, 25.0);
        assert!((data.cell_temp_avg - 21.0).abs() < 1e-6);

        data.refresh_temp_stats(2);
        assert_eq!(data.cell_temp_min, 20.0);
        assert_eq!(data.cell_temp_max, 25.0);
    }
}
