use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use super::*;
use crate::sensors::lps25hb::LPS25HB_ADDRESS;
use crate::storage::RamFlash;
use crate::test_support::{
    FakeBus, FakeDriver, FakeDriverLog, TEST_METADATA, compact_descriptors, table_extent,
};

type TestController = SensorController<FakeBus, RamFlash<2>>;
type DriverLog = Rc<RefCell<FakeDriverLog>>;

fn controller_with(bus: FakeBus, capacities: [u32; 6]) -> TestController {
    let table = compact_descriptors(capacities);
    let flash = RamFlash::new(table_extent(&table));
    let storage = StorageRegionAllocator::new(flash, table, TEST_METADATA).unwrap();
    SensorController::new(bus, storage)
}

/// Power-cycle: rebuild the controller from nothing but the flash contents.
fn reboot(controller: TestController) -> TestController {
    let (bus, storage) = controller.release();
    let table = *storage.descriptors();
    let storage = StorageRegionAllocator::new(storage.release(), table, TEST_METADATA).unwrap();
    SensorController::new(bus, storage)
}

fn controller(capacities: [u32; 6]) -> TestController {
    controller_with(FakeBus::new(), capacities)
}

fn install_fake(controller: &mut TestController, sensor: SensorType) -> DriverLog {
    let raw_size = controller.storage().descriptor(sensor).raw_sample_size;
    let (driver, log) = FakeDriver::boxed(sensor, raw_size);
    controller.install_driver(driver);
    log
}

fn blob(status: SensorStatus, period_ms: u16, range: u8) -> [u8; 4] {
    let mut out = [0u8; 4];
    SensorSetting {
        status,
        sampling_period_ms: period_ms,
        range,
    }
    .write_bytes(&mut out);
    out
}

fn work(controller: &mut TestController, log_id: Option<u8>) {
    controller.observe_control_command(
        ControlCommand::ShouldWork,
        log_id.is_some(),
        log_id.unwrap_or(0),
    );
}

#[test]
fn test_work_enables_present_sensors_only() {
    let mut controller = controller([4; 6]);
    let accel = install_fake(&mut controller, SensorType::Accelerometer);
    install_fake(&mut controller, SensorType::Brightness);

    work(&mut controller, None);

    assert!(controller.is_working());
    assert!(controller.bus().powered);
    assert_eq!(controller.get_num_active_sensors(), 2);
    assert!(controller.state(SensorType::Accelerometer).is_enabled);
    assert!(!controller.state(SensorType::Gyroscope).is_enabled);
    assert_eq!(accel.borrow().inits, 1);
    assert_eq!(accel.borrow().wakes, 1);
}

#[test]
fn test_init_failure_is_isolated() {
    let mut controller = controller([4; 6]);
    let accel = install_fake(&mut controller, SensorType::Accelerometer);
    let gyro = install_fake(&mut controller, SensorType::Gyroscope);
    accel.borrow_mut().fail_init = true;

    work(&mut controller, None);

    assert!(!controller.state(SensorType::Accelerometer).is_enabled);
    assert!(controller.last_error(SensorType::Accelerometer).is_some());
    assert!(controller.state(SensorType::Gyroscope).is_enabled);
    assert_eq!(gyro.borrow().wakes, 1);
    assert_eq!(accel.borrow().wakes, 0);
}

#[test]
fn test_bus_released_when_nothing_enables() {
    let mut controller = controller([4; 6]);
    let accel = install_fake(&mut controller, SensorType::Accelerometer);
    accel.borrow_mut().fail_init = true;

    work(&mut controller, None);

    assert_eq!(controller.get_num_active_sensors(), 0);
    assert!(!controller.bus().powered);
    assert_eq!(controller.bus().power_ups, 1);
    assert_eq!(controller.bus().power_downs, 1);
}

#[test]
fn test_stopped_sensors_are_not_woken() {
    let mut controller = controller([4; 6]);
    let accel = install_fake(&mut controller, SensorType::Accelerometer);
    controller
        .set_setting(
            SensorType::Accelerometer,
            &blob(SensorStatus::Stopping, 100, 0),
        )
        .unwrap();

    work(&mut controller, Some(1));
    for _ in 0..5 {
        controller.tick(100);
    }

    assert_eq!(accel.borrow().inits, 0);
    assert!(accel.borrow().elapsed.is_empty());
    assert_eq!(
        controller
            .storage()
            .region(SensorType::Accelerometer)
            .write_cursor,
        0
    );
}

#[test]
fn test_tick_leaves_disabled_sensors_alone() {
    let mut controller = controller([4; 6]);
    let accel = install_fake(&mut controller, SensorType::Accelerometer);

    // Never woken.
    for _ in 0..3 {
        controller.tick(1_000);
    }
    assert!(accel.borrow().elapsed.is_empty());

    work(&mut controller, Some(1));
    controller.observe_control_command(ControlCommand::ShouldSleep, false, 0);
    let flash_writes = controller.storage().flash().write_count();
    for _ in 0..3 {
        controller.tick(1_000);
    }

    assert!(accel.borrow().elapsed.is_empty());
    assert_eq!(controller.storage().flash().write_count(), flash_writes);
}

#[test]
fn test_sleep_is_idempotent() {
    let mut controller = controller([4; 6]);
    let accel = install_fake(&mut controller, SensorType::Accelerometer);
    work(&mut controller, Some(2));
    controller.tick(0);

    controller.observe_control_command(ControlCommand::ShouldSleep, false, 0);
    let once = (
        controller.is_working(),
        controller.is_logging(),
        controller.get_num_active_sensors(),
        controller.bus().power_downs,
        accel.borrow().sleeps,
    );

    controller.observe_control_command(ControlCommand::ShouldSleep, false, 0);
    let twice = (
        controller.is_working(),
        controller.is_logging(),
        controller.get_num_active_sensors(),
        controller.bus().power_downs,
        accel.borrow().sleeps,
    );

    assert_eq!(once, (false, false, 0, 1, 1));
    assert_eq!(once, twice);
    assert!(controller.state(SensorType::Accelerometer).latest.is_none());
}

#[test]
fn test_period_gates_new_cycles() {
    let mut controller = controller([8; 6]);
    let accel = install_fake(&mut controller, SensorType::Accelerometer);
    work(&mut controller, None);

    controller.tick(0);
    controller.tick(40);
    controller.tick(40);
    assert_eq!(accel.borrow().samples, 1);

    controller.tick(40);
    assert_eq!(accel.borrow().samples, 2);
    // Time skipped while gated is still handed to the driver.
    assert_eq!(accel.borrow().elapsed, Vec::from([0, 120]));
}

#[test]
fn test_conversions_are_polled_every_tick() {
    let mut controller = controller([8; 6]);
    let brightness = install_fake(&mut controller, SensorType::Brightness);
    brightness.borrow_mut().conversion_calls = 2;
    work(&mut controller, None);

    controller.tick(0);
    controller.tick(10);
    controller.tick(10);
    assert_eq!(brightness.borrow().samples, 1);
    assert_eq!(brightness.borrow().elapsed, Vec::from([0, 10, 10]));
    assert!(controller.state(SensorType::Brightness).latest.is_some());
}

#[test]
fn test_sampling_failure_disables_sensor() {
    let mut controller = controller([8; 6]);
    let accel = install_fake(&mut controller, SensorType::Accelerometer);
    let gyro = install_fake(&mut controller, SensorType::Gyroscope);
    work(&mut controller, Some(1));

    accel.borrow_mut().fail_sample = true;
    controller.tick(0);

    let state = controller.state(SensorType::Accelerometer);
    assert!(!state.is_enabled);
    assert!(!state.is_sampling);
    assert!(matches!(
        controller.last_error(SensorType::Accelerometer),
        Some(SensorError::Bus { .. })
    ));
    assert!(controller.state(SensorType::Gyroscope).is_enabled);
    assert_eq!(gyro.borrow().samples, 1);
    assert!(controller.bus().powered);

    // No retry until the next wake.
    controller.tick(1_000);
    assert_eq!(accel.borrow().elapsed.len(), 1);

    gyro.borrow_mut().fail_sample = true;
    controller.tick(1_000);
    assert!(!controller.bus().powered);
}

#[test]
fn test_pressure_end_to_end() {
    let mut bus = FakeBus::new();
    bus.load(LPS25HB_ADDRESS, 0x0f, &[0xbd]);
    bus.load(LPS25HB_ADDRESS, 0xa8, &[0x00, 0x80, 0x3f]);
    let mut controller = controller_with(bus, [1, 1, 1, 1, 4, 1])
        .with_driver(Box::new(crate::sensors::LPS25HBSensor::new()));

    work(&mut controller, Some(1));
    assert!(controller.state(SensorType::Pressure).is_sampling);

    controller.tick(0);
    assert!(controller.state(SensorType::Pressure).latest.is_none());
    assert_eq!(
        controller.storage().region(SensorType::Pressure).write_cursor,
        0
    );

    controller.tick(200);
    let latest = controller.state(SensorType::Pressure).latest.clone().unwrap();
    assert_eq!(latest.len(), 4);

    let mut wire = [0u8; 8];
    assert_eq!(controller.read_latest(SensorType::Pressure, &mut wire), 4);
    assert_eq!(&wire[..4], &0x003f_8000u32.to_le_bytes());
    assert_eq!(&wire[..4], latest.as_slice());
    assert_eq!(
        controller.storage().region(SensorType::Pressure).write_cursor,
        4
    );
}

#[test]
fn test_session_full_on_first_exhausted_region() {
    let mut controller = controller([10, 20, 1, 1, 1, 1]);
    install_fake(&mut controller, SensorType::Accelerometer);
    install_fake(&mut controller, SensorType::Gyroscope);
    work(&mut controller, Some(3));
    assert_eq!(controller.get_num_logging_ready_sensors(), 2);

    for _ in 0..9 {
        controller.tick(100);
    }
    assert!(!controller.is_data_full(3));

    controller.tick(100);
    assert!(controller.storage().is_full(SensorType::Accelerometer));
    assert!(!controller.storage().is_full(SensorType::Gyroscope));
    assert_eq!(controller.storage().sample_count(SensorType::Gyroscope), 10);
    assert!(controller.is_data_full(3));
    assert!(!controller.is_data_full(4));
}

#[test]
fn test_cursor_never_moves_back_within_session() {
    let mut controller = controller([5, 1, 1, 1, 1, 1]);
    install_fake(&mut controller, SensorType::Accelerometer);
    work(&mut controller, Some(1));

    let mut previous = 0;
    for _ in 0..8 {
        controller.tick(100);
        let cursor = controller
            .storage()
            .region(SensorType::Accelerometer)
            .write_cursor;
        assert!(cursor >= previous);
        previous = cursor;
    }
    assert_eq!(previous, 30);
    assert!(matches!(
        controller
            .state(SensorType::Accelerometer)
            .last_storage_error,
        Some(StorageError::RegionFull { .. })
    ));
}

#[test]
fn test_same_log_id_does_not_restart_session() {
    let mut controller = controller([8; 6]);
    install_fake(&mut controller, SensorType::Accelerometer);
    work(&mut controller, Some(5));
    controller.tick(100);
    controller.tick(100);

    work(&mut controller, Some(5));
    assert_eq!(
        controller.storage().sample_count(SensorType::Accelerometer),
        2
    );

    work(&mut controller, Some(6));
    assert_eq!(
        controller.storage().sample_count(SensorType::Accelerometer),
        0
    );
    assert_eq!(controller.current_log_id(), Some(6));
}

#[test]
fn test_stop_logging_keeps_data() {
    let mut controller = controller([8; 6]);
    install_fake(&mut controller, SensorType::Accelerometer);
    work(&mut controller, Some(1));
    controller.tick(100);

    work(&mut controller, None);
    controller.tick(100);

    assert!(!controller.is_logging());
    assert!(!controller.state(SensorType::Accelerometer).is_sampling);
    assert!(controller.state(SensorType::Accelerometer).is_enabled);
    assert_eq!(
        controller.storage().sample_count(SensorType::Accelerometer),
        1
    );
}

#[test]
fn test_sensing_only_sensor_is_not_logged() {
    let mut controller = controller([8; 6]);
    install_fake(&mut controller, SensorType::Accelerometer);
    install_fake(&mut controller, SensorType::Gyroscope);
    controller
        .set_setting(SensorType::Gyroscope, &blob(SensorStatus::Sensing, 100, 0))
        .unwrap();

    work(&mut controller, Some(1));
    controller.tick(100);

    assert_eq!(controller.get_num_active_sensors(), 2);
    assert_eq!(controller.get_num_logging_ready_sensors(), 1);
    assert!(controller.state(SensorType::Gyroscope).latest.is_some());
    assert_eq!(controller.storage().sample_count(SensorType::Gyroscope), 0);
}

#[test]
fn test_invalid_setting_leaves_state_unchanged() {
    let mut controller = controller([4; 6]);
    let before = controller.state(SensorType::Brightness).setting;

    assert!(matches!(
        controller.set_setting(
            SensorType::Brightness,
            &blob(SensorStatus::Sensing, 50, 0)
        ),
        Err(SettingError::PeriodOutOfRange { .. })
    ));
    assert!(matches!(
        controller.set_setting(SensorType::Brightness, &[1, 0]),
        Err(SettingError::InvalidLength { .. })
    ));
    assert_eq!(controller.state(SensorType::Brightness).setting, before);
}

#[test]
fn test_settings_locked_during_session() {
    let mut controller = controller([4; 6]);
    install_fake(&mut controller, SensorType::Accelerometer);
    work(&mut controller, Some(1));

    assert_eq!(
        controller.set_sampling_period(SensorType::Accelerometer, 500),
        Err(SettingError::SessionActive {
            sensor: SensorType::Accelerometer
        })
    );

    work(&mut controller, None);
    controller
        .set_sampling_period(SensorType::Accelerometer, 500)
        .unwrap();
    assert_eq!(
        controller
            .state(SensorType::Accelerometer)
            .setting
            .sampling_period_ms,
        500
    );
}

#[test]
fn test_setting_applied_immediately_while_working() {
    let mut controller = controller([4; 6]);
    let accel = install_fake(&mut controller, SensorType::Accelerometer);
    work(&mut controller, None);

    controller
        .set_setting(
            SensorType::Accelerometer,
            &blob(SensorStatus::Sensing, 100, 2),
        )
        .unwrap();
    assert_eq!(accel.borrow().wakes, 2);

    controller
        .set_setting(
            SensorType::Accelerometer,
            &blob(SensorStatus::Stopping, 100, 2),
        )
        .unwrap();
    assert!(!controller.state(SensorType::Accelerometer).is_enabled);
    assert_eq!(accel.borrow().sleeps, 1);
    assert!(!controller.bus().powered);

    controller
        .set_setting(
            SensorType::Accelerometer,
            &blob(SensorStatus::Sensing, 100, 2),
        )
        .unwrap();
    assert!(controller.state(SensorType::Accelerometer).is_enabled);
    assert!(controller.bus().powered);

    let mut out = [0u8; 4];
    assert_eq!(
        controller.read_setting(SensorType::Accelerometer, &mut out),
        4
    );
    assert_eq!(out, blob(SensorStatus::Sensing, 100, 2));
}

#[test]
fn test_metadata_reports_session() {
    let mut controller = controller([8; 6]);
    install_fake(&mut controller, SensorType::Pressure);
    let mut out = [0u8; METADATA_BLOB_SIZE];

    assert_eq!(controller.read_metadata(SensorType::Pressure, &mut out), 9);
    assert_eq!(out, [NO_LOG_ID, 0xe8, 0x03, 0, 0, 0, 0, 0, 0]);

    work(&mut controller, Some(3));
    controller.tick(0);
    controller.tick(1_000);

    controller.read_metadata(SensorType::Pressure, &mut out);
    assert_eq!(out, [3, 0xe8, 0x03, 0, 2, 0, 0, 0, 0]);
    assert_eq!(controller.read_metadata(SensorType::Pressure, &mut [0u8; 4]), 0);
}

#[test]
fn test_log_read_out_with_skip() {
    let mut controller = controller([8; 6]);
    install_fake(&mut controller, SensorType::Brightness);
    work(&mut controller, Some(2));
    for _ in 0..5 {
        controller.tick(1_000);
    }

    // Wrong session id reads nothing.
    controller
        .write_log_id(SensorType::Brightness, &[1, 0, 0, 0, 0, 0, 0])
        .unwrap();
    let mut out = [0u8; 16];
    assert_eq!(controller.read_log_data(SensorType::Brightness, &mut out), 0);

    controller
        .write_log_id(SensorType::Brightness, &[2, 0, 0, 0, 0, 0, 0])
        .unwrap();
    let mut out = [0u8; 6];
    assert_eq!(controller.read_log_data(SensorType::Brightness, &mut out), 6);
    assert_eq!(out, [1, 1, 2, 2, 3, 3]);
    assert_eq!(controller.read_log_data(SensorType::Brightness, &mut out), 4);
    assert_eq!(&out[..4], &[4, 4, 5, 5]);
    assert_eq!(controller.read_log_data(SensorType::Brightness, &mut out), 0);

    controller
        .write_log_id(SensorType::Brightness, &[2, 1, 0, 1, 0, 0, 0])
        .unwrap();
    let mut out = [0u8; 16];
    assert_eq!(controller.read_log_data(SensorType::Brightness, &mut out), 4);
    assert_eq!(&out[..4], &[2, 2, 4, 4]);
}

#[test]
fn test_notifications_are_taken_once() {
    let mut controller = controller([8; 6]);
    install_fake(&mut controller, SensorType::Humidity);
    work(&mut controller, None);
    let mut out = [0u8; 4];

    controller.tick(0);
    assert_eq!(controller.take_notification(SensorType::Humidity, &mut out), 0);

    controller.set_notifying(SensorType::Humidity, true);
    controller.tick(1_000);
    assert_eq!(controller.take_notification(SensorType::Humidity, &mut out), 4);
    assert_eq!(out, [2; 4]);
    assert_eq!(controller.take_notification(SensorType::Humidity, &mut out), 0);

    controller.tick(1_000);
    controller.set_notifying(SensorType::Humidity, false);
    assert_eq!(controller.take_notification(SensorType::Humidity, &mut out), 0);
}

#[test]
fn test_session_extrema_track_committed_samples() {
    let mut controller = controller([8; 6]);
    install_fake(&mut controller, SensorType::Gyroscope);
    let mut out = [0u8; 6];

    work(&mut controller, None);
    controller.tick(100);
    assert_eq!(
        controller.read_session_extremum(SensorType::Gyroscope, true, &mut out),
        0
    );

    work(&mut controller, Some(1));
    for _ in 0..3 {
        controller.tick(100);
    }

    controller.read_session_extremum(SensorType::Gyroscope, false, &mut out);
    assert_eq!(out, [2; 6]);
    controller.read_session_extremum(SensorType::Gyroscope, true, &mut out);
    assert_eq!(out, [4; 6]);
}

#[test]
fn test_config_export_and_apply() {
    let mut controller = controller([4; 6]);
    let mut config = controller.export_config();
    config.settings[SensorType::Pressure.index()].sampling_period_ms = 5_000;
    config.settings[SensorType::Gyroscope.index()].status = SensorStatus::Stopping;

    let bytes = config.to_bytes().unwrap();
    controller
        .apply_config(&ControllerConfig::from_bytes(&bytes).unwrap())
        .unwrap();
    assert_eq!(controller.export_config(), config);

    let mut invalid = config.clone();
    invalid.settings[SensorType::Humidity.index()].range = 3;
    invalid.settings[SensorType::Pressure.index()].sampling_period_ms = 2_000;
    assert!(matches!(
        controller.apply_config(&invalid),
        Err(ConfigError::Invalid {
            sensor: SensorType::Humidity,
            ..
        })
    ));
    // Nothing from the rejected config was applied.
    assert_eq!(
        controller
            .state(SensorType::Pressure)
            .setting
            .sampling_period_ms,
        5_000
    );
}

#[test]
fn test_format_storage_resets_every_region() {
    let mut controller = controller([4; 6]);
    install_fake(&mut controller, SensorType::Accelerometer);
    install_fake(&mut controller, SensorType::Brightness);
    work(&mut controller, Some(1));
    controller.tick(1_000);

    controller.format_storage().unwrap();

    for sensor in SensorType::ALL {
        assert_eq!(controller.storage().region(sensor).write_cursor, 0);
    }
    let logs_start = TEST_METADATA.config.end_address() as usize;
    assert!(
        controller.storage().flash().as_bytes()[logs_start..]
            .iter()
            .all(|b| *b == 0xff)
    );
}

#[test]
fn test_session_read_out_after_reboot() {
    let mut controller = controller([4; 6]);
    install_fake(&mut controller, SensorType::Brightness);
    work(&mut controller, Some(3));
    controller.tick(1_000);
    controller.tick(1_000);

    let mut controller = reboot(controller);
    install_fake(&mut controller, SensorType::Brightness);
    assert!(!controller.is_logging());
    assert_eq!(controller.storage().sample_count(SensorType::Brightness), 2);

    let mut metadata = [0u8; METADATA_BLOB_SIZE];
    controller.read_metadata(SensorType::Brightness, &mut metadata);
    assert_eq!(metadata[0], 3);
    assert_eq!(&metadata[4..8], &2u32.to_le_bytes());

    controller
        .write_log_id(SensorType::Brightness, &[3, 0, 0, 0, 0, 0, 0])
        .unwrap();
    let mut out = [0u8; 8];
    assert_eq!(controller.read_log_data(SensorType::Brightness, &mut out), 4);
    assert_eq!(&out[..4], &[1, 1, 2, 2]);
}

#[test]
fn test_data_full_answered_after_reboot() {
    let mut controller = controller([2, 1, 1, 1, 1, 1]);
    install_fake(&mut controller, SensorType::Accelerometer);
    work(&mut controller, Some(3));
    for _ in 0..3 {
        controller.tick(100);
    }
    assert!(controller.is_data_full(3));

    let controller = reboot(controller);
    assert!(controller.is_data_full(3));
    assert!(!controller.is_data_full(4));
    assert_eq!(
        controller.storage().sample_count(SensorType::Accelerometer),
        2
    );
}

#[test]
fn test_sensor_lost_mid_session_is_still_recovered() {
    let mut controller = controller([8; 6]);
    let accel = install_fake(&mut controller, SensorType::Accelerometer);
    work(&mut controller, Some(5));
    controller.tick(100);
    controller.tick(100);

    accel.borrow_mut().fail_sample = true;
    controller.tick(100);
    assert!(!controller.state(SensorType::Accelerometer).is_enabled);
    controller.observe_control_command(ControlCommand::ShouldSleep, false, 0);

    let controller = reboot(controller);
    let region = controller.storage().region(SensorType::Accelerometer);
    assert_eq!(region.current_log_id, Some(5));
    assert_eq!(region.write_cursor, 12);
}

#[test]
fn test_config_restored_after_reboot() {
    let mut controller = controller([4; 6]);
    assert_eq!(controller.restore_config(), Ok(false));

    controller
        .set_setting(SensorType::Humidity, &blob(SensorStatus::Sensing, 2_000, 1))
        .unwrap();
    controller.save_config().unwrap();
    let saved = controller.export_config();

    let mut controller = reboot(controller);
    assert_ne!(controller.export_config(), saved);
    assert_eq!(controller.restore_config(), Ok(true));
    assert_eq!(controller.export_config(), saved);
}

#[test]
fn test_corrupt_config_leaves_defaults() {
    let mut controller = controller([4; 6]);
    let defaults = controller.export_config();
    controller
        .storage
        .store_config_blob(&[0xff, 0xff, 0xff])
        .unwrap();

    assert!(matches!(
        controller.restore_config(),
        Err(ConfigError::Decode(_))
    ));
    assert_eq!(controller.export_config(), defaults);
}
