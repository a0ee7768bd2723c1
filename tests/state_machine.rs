//! State machine transition tests against the emulated AFE.

use packbms_lib::config::{BmsConfig, CellType};
use packbms_lib::emulated::EmulatedAfe;
use packbms_lib::flags::SwitchMask;
use packbms_lib::{Bms, BmsState};

fn test_bms() -> Bms<EmulatedAfe> {
    let conf = BmsConfig::with_cell_type(CellType::Lfp, 45.0);
    let mut bms = Bms::new(EmulatedAfe::with_cells(4, 3.3), conf);
    bms.apply_config().unwrap();
    bms
}

#[test]
fn off_to_dis_has_priority_over_chg() {
    let mut bms = test_bms();
    assert_eq!(bms.state(), BmsState::Off);

    // both directions allowed: discharge is checked first
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Dis);
    assert!(bms.driver_mut().switch_requested(SwitchMask::DIS));
    assert!(!bms.driver_mut().switch_requested(SwitchMask::CHG));
}

#[test]
fn no_off_to_dis_if_discharging_blocked() {
    let mut bms = test_bms();
    bms.empty = true;
    bms.chg_enable = false;

    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Off);
    assert!(!bms.driver_mut().switch_requested(SwitchMask::DIS));
}

#[test]
fn no_off_to_dis_on_undervoltage() {
    let mut bms = test_bms();
    bms.chg_enable = false;
    // one cell below the UV limit latches the undervoltage fault
    bms.driver_mut().set_cell_voltage(0, 2.0);

    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Off);
}

#[test]
fn off_to_chg_if_discharging_blocked() {
    let mut bms = test_bms();
    bms.empty = true;

    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Chg);
    assert!(bms.driver_mut().switch_requested(SwitchMask::CHG));
}

#[test]
fn chg_to_off_disables_both_switches() {
    let mut bms = test_bms();
    bms.empty = true;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Chg);

    bms.full = true;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Off);
    assert!(!bms.driver_mut().switch_requested(SwitchMask::CHG));
    assert!(!bms.driver_mut().switch_requested(SwitchMask::DIS));
}

#[test]
fn chg_to_normal_when_discharging_recovers() {
    let mut bms = test_bms();
    bms.empty = true;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Chg);

    bms.empty = false;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Normal);
    assert!(bms.driver_mut().switch_requested(SwitchMask::CHG));
    assert!(bms.driver_mut().switch_requested(SwitchMask::DIS));
}

#[test]
fn dis_to_off_disables_both_switches() {
    let mut bms = test_bms();
    bms.full = true;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Dis);

    bms.empty = true;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Off);
    assert!(!bms.driver_mut().switch_requested(SwitchMask::CHG));
    assert!(!bms.driver_mut().switch_requested(SwitchMask::DIS));
}

#[test]
fn dis_to_normal_when_charging_recovers() {
    let mut bms = test_bms();
    bms.full = true;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Dis);

    bms.full = false;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Normal);
}

#[test]
fn normal_to_chg_when_discharging_blocked() {
    let mut bms = test_bms();
    bms.update().unwrap();
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Normal);

    bms.empty = true;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Chg);
    assert!(!bms.driver_mut().switch_requested(SwitchMask::DIS));
}

#[test]
fn normal_to_dis_when_charging_blocked() {
    let mut bms = test_bms();
    bms.update().unwrap();
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Normal);

    bms.full = true;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Dis);
    assert!(!bms.driver_mut().switch_requested(SwitchMask::CHG));
}

#[test]
fn ideal_diode_hysteresis_in_chg_state() {
    let mut bms = test_bms();
    bms.empty = true;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Chg);

    // charge current above the set threshold turns the discharge FET on
    bms.driver_mut().set_current(1.0);
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Chg);
    assert!(bms.driver_mut().switch_requested(SwitchMask::DIS));

    // within the dead band: hold
    bms.driver_mut().set_current(0.3);
    bms.update().unwrap();
    assert!(bms.driver_mut().switch_requested(SwitchMask::DIS));

    // below the release threshold: off again
    bms.driver_mut().set_current(0.05);
    bms.update().unwrap();
    assert!(!bms.driver_mut().switch_requested(SwitchMask::DIS));
}

#[test]
fn ideal_diode_hysteresis_in_dis_state() {
    let mut bms = test_bms();
    bms.full = true;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Dis);

    bms.driver_mut().set_current(-1.0);
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Dis);
    assert!(bms.driver_mut().switch_requested(SwitchMask::CHG));

    bms.driver_mut().set_current(-0.05);
    bms.update().unwrap();
    assert!(!bms.driver_mut().switch_requested(SwitchMask::CHG));
}

#[test]
fn fet_fault_is_reported_without_blocking_retries() {
    use packbms_lib::flags::ErrorFlags;

    let mut bms = test_bms();
    bms.full = true;
    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Dis);

    // driver stage failure: discharge FET does not follow the request. The
    // flag is raised, but masked in the allowed check so the state machine
    // keeps requesting the FET instead of deadlocking.
    bms.driver_mut().force_switches_off(SwitchMask::DIS);
    bms.update().unwrap();
    assert!(bms.data.error_flags.contains(ErrorFlags::DIS_OFF));
    assert_eq!(bms.state(), BmsState::Dis);
    assert!(bms.dis_allowed());
}

#[test]
fn shutdown_is_terminal() {
    let mut bms = test_bms();
    bms.update().unwrap();
    bms.shutdown();
    assert_eq!(bms.state(), BmsState::Shutdown);

    bms.update().unwrap();
    assert_eq!(bms.state(), BmsState::Shutdown);
    assert!(!bms.driver_mut().switch_requested(SwitchMask::DIS));
}
