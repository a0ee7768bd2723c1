//! Full update cycle tests: SOC behaviour, balancing, configuration
//! write-back and transient communication failures.

use packbms_lib::balancing::mask_has_adjacent_cells;
use packbms_lib::config::{BmsConfig, CellType};
use packbms_lib::emulated::EmulatedAfe;
use packbms_lib::flags::ErrorFlags;
use packbms_lib::{Bms, Error};

fn test_bms() -> Bms<EmulatedAfe> {
    let conf = BmsConfig::with_cell_type(CellType::Lfp, 45.0);
    let mut bms = Bms::new(EmulatedAfe::with_cells(4, 3.3), conf);
    bms.apply_config().unwrap();
    bms.update().unwrap();
    bms
}

#[test]
fn config_write_back_reflects_hardware_steps() {
    let mut bms = test_bms();
    // 45 A at 1 mOhm lands on the 44 mV step
    assert_eq!(bms.conf.dis_oc_limit, 44.0);
    assert_eq!(bms.conf.dis_sc_limit, 89.0);

    bms.conf.dis_oc_limit = 5.0; // below the lowest step
    bms.apply_config().unwrap();
    assert_eq!(bms.conf.dis_oc_limit, 8.0);
}

#[test]
fn soc_stays_in_bounds_and_does_not_drift_at_zero_current() {
    let mut bms = test_bms();
    bms.soc_reset(50);

    for _ in 0..100 {
        bms.update().unwrap();
        assert_eq!(bms.soc, 50.0);
    }

    bms.soc_reset(100);
    bms.driver_mut().set_current(5.0);
    for _ in 0..10 {
        bms.update().unwrap();
        assert!((0.0..=100.0).contains(&bms.soc));
    }
    assert_eq!(bms.soc, 100.0);
}

#[test]
fn balancing_starts_when_idle_and_spread_too_large() {
    let mut bms = test_bms();
    bms.conf.bal_idle_delay = 0;

    // balanced pack: nothing to do
    bms.update().unwrap();
    assert_eq!(bms.data.balancing_status, 0);

    // one cell 30 mV above the rest
    bms.driver_mut().set_cell_voltage(1, 3.33);
    bms.update().unwrap();
    assert_eq!(bms.data.balancing_status, 1 << 1);
}

#[test]
fn balancing_respects_voltage_floor() {
    let mut bms = test_bms();
    bms.conf.bal_idle_delay = 0;

    // spread is large but all cells below bal_cell_voltage_min (3.30 V)
    bms.driver_mut().set_all_cell_voltages(3.20);
    bms.driver_mut().set_cell_voltage(1, 3.25);
    bms.update().unwrap();
    assert_eq!(bms.data.balancing_status, 0);
}

#[test]
fn balancing_stops_when_current_flows() {
    let mut bms = test_bms();
    bms.conf.bal_idle_delay = 0;
    bms.driver_mut().set_cell_voltage(1, 3.33);
    bms.update().unwrap();
    assert_ne!(bms.data.balancing_status, 0);

    // load current resets the idle timestamp; require an hour of idle again
    bms.conf.bal_idle_delay = 3600;
    bms.driver_mut().set_current(-5.0);
    bms.update().unwrap();
    assert_eq!(bms.data.balancing_status, 0);
    assert_eq!(bms.driver_mut().balancing_mask(), 0);
}

#[test]
fn balancing_mask_never_contains_adjacent_cells() {
    let mut bms = test_bms();
    bms.conf.bal_idle_delay = 0;

    // all four cells above the minimum with different spreads
    bms.driver_mut().set_cell_voltage(0, 3.36);
    bms.driver_mut().set_cell_voltage(1, 3.35);
    bms.driver_mut().set_cell_voltage(2, 3.34);
    bms.driver_mut().set_cell_voltage(3, 3.30);
    bms.update().unwrap();

    assert_ne!(bms.data.balancing_status, 0);
    assert!(!mask_has_adjacent_cells(bms.data.balancing_status, 3));
}

#[test]
fn manual_balancing_needs_auto_mode_off() {
    let mut bms = test_bms();
    assert!(matches!(bms.balance_manually(0b101), Err(Error::Busy)));

    bms.conf.auto_balancing = false;
    bms.balance_manually(0b10001).unwrap();
    assert_eq!(bms.driver_mut().balancing_mask(), 0b10001);
}

#[test]
fn transient_read_failure_keeps_state_and_recovers() {
    let mut bms = test_bms();
    bms.driver_mut().set_temperature(0, 50.0);
    bms.update().unwrap();
    let state = bms.state();
    let flags = bms.data.error_flags;
    assert!(flags.contains(ErrorFlags::CHG_OVERTEMP));

    bms.driver_mut().fail_next_reads(3);
    for _ in 0..3 {
        assert!(bms.update().is_err());
        assert_eq!(bms.state(), state);
        assert_eq!(bms.data.error_flags, flags);
    }

    // communication restored, the next cycle works again
    bms.update().unwrap();
}

#[test]
fn hardware_overvoltage_blocks_charging_until_reset_threshold() {
    let mut bms = test_bms();
    bms.update().unwrap(); // Dis -> Normal

    let ov_limit = bms.conf.cell_ov_limit;
    bms.driver_mut().set_cell_voltage(0, ov_limit + 0.05);
    bms.update().unwrap();
    assert!(bms.data.error_flags.contains(ErrorFlags::CELL_OVERVOLTAGE));
    assert!(!bms.chg_allowed());

    // back below the limit but above the reset threshold: still latched
    let ov_reset = bms.conf.cell_ov_reset;
    bms.driver_mut().set_cell_voltage(0, ov_reset + 0.05);
    bms.update().unwrap();
    assert!(!bms.chg_allowed());

    bms.driver_mut().set_cell_voltage(0, ov_reset - 0.05);
    bms.update().unwrap();
    assert!(bms.chg_allowed());
}

#[test]
fn register_dump_shows_balancing() {
    let mut bms = test_bms();
    bms.conf.auto_balancing = false;
    bms.balance_manually(0b00101).unwrap();
    let dump = bms.registers_dump().unwrap();
    assert!(dump.contains("CELLBAL1:  0b00000101"));
}
