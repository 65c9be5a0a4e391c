//! End-to-end session scenarios against the scripted desktop.
//!
//! Each test plays a whole conversion the way a batch job would: connect,
//! a sequence of operations, and shutdown, checking the state machine and the
//! exact UI traffic along the way.

use std::path::Path;

use driver::core::params::Parameter;
use driver::core::state::SessionState;
use driver::io::config::{DriverConfig, Target, load_config, write_config};
use driver::test_support::{FakeClock, FakeDesktop, FakeHost};
use driver::{DriverError, Session, UiError};

const REALBAND_EXE: &str = r"C:\RealBand\RealBand.exe";

/// Render flow:
/// 1. attach to a running RealBand
/// 2. load song, load style, generate
/// 3. save as MIDI through the format combo
/// 4. shutdown sweeps the helper process too
#[test]
fn realband_render_flow_attaches_and_cleans_up() {
    let config = DriverConfig::default();
    let desktop = FakeDesktop::with_app(&config.profile(Target::RealBand));
    let host = FakeHost::new();
    let pid = host.add_process(REALBAND_EXE, "RealBand.exe");
    let helper = host.add_process(r"C:\RealBand\bbw2.exe", "bbw2.exe");
    host.set_version("2018.0.0.5");
    let clock = FakeClock::new();

    let mut session =
        Session::connect(&config, Target::RealBand, &desktop, &host, &clock, true).expect("connect");
    assert_eq!(session.process().pid, pid);
    assert!(!session.process().launched);
    assert_eq!(session.version(), Some("2018.0.0.5"));

    let temp = tempfile::tempdir().expect("tempdir");
    let song = temp.path().join("Misty.SGU");
    let style = temp.path().join("JAZZSWNG.STY");
    let output = temp.path().join("Misty.JAZZSWNG.mid");

    session.load(&song).expect("load");
    session.load_style(&style).expect("load style");
    session.generate().expect("generate");
    session
        .save(&output, Some("MIDI File (.MID) (*.MID)"))
        .expect("save");
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.current_file(), Some(song.as_path()));

    let calls = desktop.calls();
    let menus: Vec<&str> = calls
        .iter()
        .filter_map(|call| call.strip_prefix("select_menu "))
        .collect();
    assert_eq!(
        menus,
        vec!["File->Open", "Generate->Generate All BB Tracks", "File->Save As"]
    );
    assert!(calls.contains(&"select_popup_item File Open Style".to_string()));
    assert!(calls.contains(&"select_item #32770/ComboBox2 MIDI File (.MID) (*.MID)".to_string()));

    session.shutdown().expect("shutdown");
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!host.is_running(pid));
    assert!(!host.is_running(helper));
    assert!(host.spawned().is_empty());
}

#[test]
fn dead_session_is_replaced_by_a_fresh_launch() {
    let config = DriverConfig::default();
    let desktop = FakeDesktop::with_app(&config.profile(Target::RealBand));
    let host = FakeHost::new();
    let clock = FakeClock::new();

    let mut first =
        Session::connect(&config, Target::RealBand, &desktop, &host, &clock, true).expect("connect");
    desktop
        .screen()
        .fail("menu_item_text", vec![UiError::Backend("target crashed".to_string())]);
    let err = first.get_parameter(Parameter::Key).unwrap_err();
    assert!(matches!(err, DriverError::Ui(UiError::Backend(_))));
    assert_eq!(first.state(), SessionState::Dead);
    first.shutdown().expect("shutdown");

    let mut second =
        Session::connect(&config, Target::RealBand, &desktop, &host, &clock, true).expect("reconnect");
    assert_ne!(second.process().pid, first.process().pid);
    assert_eq!(host.spawned().len(), 2);
    assert_eq!(
        second
            .get_parameter(Parameter::Key)
            .expect("key")
            .as_text(),
        Some("C")
    );
}

#[test]
fn configured_exe_path_is_launched() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config_path = temp.path().join("driver.toml");
    let mut config = DriverConfig::default();
    config.band_in_a_box.exe_path = Some(r"D:\bb\bbw.exe".into());
    write_config(&config_path, &config).expect("write config");
    let config = load_config(&config_path).expect("load config");

    let desktop = FakeDesktop::with_app(&config.profile(Target::BandInABox));
    let host = FakeHost::new();
    let clock = FakeClock::new();
    let session =
        Session::connect(&config, Target::BandInABox, &desktop, &host, &clock, true).expect("connect");

    assert_eq!(host.spawned(), vec![Path::new(r"D:\bb\bbw.exe").to_path_buf()]);
    assert_eq!(session.process().exe_path, Path::new(r"D:\bb\bbw.exe"));
}

#[test]
fn launch_that_never_settles_is_killed_before_reporting() {
    let config = DriverConfig::default();
    let desktop = FakeDesktop::with_app(&config.profile(Target::RealBand));
    let host = FakeHost::new();
    host.push_cpu_samples(&[90.0; 500]);
    let clock = FakeClock::new();

    let err = match Session::connect(&config, Target::RealBand, &desktop, &host, &clock, false) {
        Ok(_) => panic!("busy launch must not connect"),
        Err(err) => err,
    };
    assert!(matches!(err, DriverError::Timeout { .. }));
    assert_eq!(host.spawned().len(), 1);
    let killed = host.killed();
    assert_eq!(killed.len(), 1);
    assert!(!host.is_running(killed[0]));
}
