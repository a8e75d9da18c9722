//! Reader session state machine tests, driven through the mock service

use std::thread;
use std::time::{Duration, Instant};

use cardmux_core::mock::{MockService, MockTerminal};
use cardmux_core::{Disposition, ServiceError};
use cardmux_pcsc::{
    ActivityLog, DETECTION_START, DisconnectionMode, Error, PcscPlugin, PcscPluginBuilder,
    PcscReader, Platform, SESSION_END, SharingMode,
};

const READER_NAME: &str = "Test Reader 0";

fn plugin_for(terminal: &MockTerminal) -> PcscPlugin<MockService> {
    plugin_with_builder(terminal, PcscPluginBuilder::new())
}

fn plugin_with_builder(
    terminal: &MockTerminal,
    builder: PcscPluginBuilder,
) -> PcscPlugin<MockService> {
    let service = MockService::with_terminal(terminal.clone());
    builder
        .with_monitoring_cycle(Duration::from_millis(20))
        .unwrap()
        .build_with_service(service)
        .unwrap()
}

fn reader_for(plugin: &PcscPlugin<MockService>) -> PcscReader<MockTerminal> {
    plugin.find_reader(READER_NAME).unwrap().unwrap()
}

#[test]
fn open_physical_channel_is_idempotent() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    reader.open_physical_channel().unwrap();
    reader.open_physical_channel().unwrap();

    assert!(reader.is_physical_channel_open());
    assert_eq!(terminal.connect_count(), 1);
}

#[test]
fn open_without_card_is_a_card_failure() {
    let terminal = MockTerminal::new(READER_NAME);
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    assert!(matches!(
        reader.open_physical_channel(),
        Err(Error::CardIo { .. })
    ));
    assert!(!reader.is_physical_channel_open());
}

#[test]
fn open_failure_on_the_reader_side_is_a_reader_failure() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    terminal.fail_next_connect(ServiceError::SharingViolation);
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    assert!(matches!(
        reader.open_physical_channel(),
        Err(Error::ReaderIo { .. })
    ));
}

#[test]
fn close_clears_the_connection_even_when_disconnect_fails() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    reader.open_physical_channel().unwrap();
    terminal.fail_next_disconnect(ServiceError::CommError);

    assert!(matches!(
        reader.close_physical_channel(),
        Err(Error::ReaderIo { .. })
    ));
    assert!(!reader.is_physical_channel_open());
    // further closes are no-ops
    reader.close_physical_channel().unwrap();
}

#[test]
fn close_applies_the_configured_disposition() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);
    reader.set_disconnection_mode(DisconnectionMode::Leave);

    reader.open_physical_channel().unwrap();
    reader.close_physical_channel().unwrap();

    assert_eq!(terminal.dispositions(), [Disposition::Leave]);
}

#[test]
fn unpower_disposition_requires_provider_support() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let service = MockService::with_terminal(terminal.clone());
    service.set_extended_dispositions(false);
    let plugin = PcscPluginBuilder::new().build_with_service(service).unwrap();
    let reader = reader_for(&plugin);
    reader.set_disconnection_mode(DisconnectionMode::Unpower);

    reader.open_physical_channel().unwrap();
    assert!(matches!(
        reader.close_physical_channel(),
        Err(Error::ReaderIo { .. })
    ));
    // the connection is cleared regardless
    assert!(!reader.is_physical_channel_open());
}

#[test]
fn unpower_close_repairs_the_reader_state() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);
    reader.set_disconnection_mode(DisconnectionMode::Unpower);

    reader.open_physical_channel().unwrap();
    reader.close_physical_channel().unwrap();

    // a reconnect/release pair follows the unpowering disconnect
    assert_eq!(
        terminal.dispositions(),
        [Disposition::Unpower, Disposition::Leave]
    );
    assert_eq!(terminal.connect_count(), 2);
}

#[test]
fn transmit_without_a_channel_is_a_null_channel_card_failure() {
    let terminal = MockTerminal::new(READER_NAME);
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    match reader.transmit_apdu(&[0x00, 0xA4, 0x04, 0x00]) {
        Err(Error::CardIo { message, .. }) => assert!(message.contains("null channel")),
        other => panic!("expected a card I/O failure, got {other:?}"),
    }
}

#[test]
fn transmit_classifies_card_and_reader_faults() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);
    reader.open_physical_channel().unwrap();

    terminal.set_transmit_error(Some(ServiceError::RemovedCard));
    assert!(matches!(
        reader.transmit_apdu(&[0x00, 0xA4, 0x04, 0x00]),
        Err(Error::CardIo { .. })
    ));

    terminal.set_transmit_error(Some(ServiceError::CommError));
    assert!(matches!(
        reader.transmit_apdu(&[0x00, 0xA4, 0x04, 0x00]),
        Err(Error::ReaderIo { .. })
    ));

    // a handle invalidated mid-transmission means the card went away
    terminal.set_transmit_error(Some(ServiceError::InvalidState));
    assert!(matches!(
        reader.transmit_apdu(&[0x00, 0xA4, 0x04, 0x00]),
        Err(Error::CardIo { .. })
    ));
}

#[test]
fn transmit_forwards_bytes_unmodified_and_logs_timestamps() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    terminal.set_transmit_response(vec![0x6A, 0x82]);
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    reader.open_physical_channel().unwrap();
    let response = reader.transmit_apdu(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
    reader.close_physical_channel().unwrap();

    assert_eq!(response, [0x6A, 0x82]);
    let tags: Vec<u8> = plugin
        .activity_log()
        .entries()
        .into_iter()
        .map(ActivityLog::tag)
        .collect();
    // channel open, the instruction byte before and after transmission,
    // channel close
    assert_eq!(tags, [DETECTION_START, 0xA4, 0xA4, SESSION_END]);
}

#[test]
fn short_apdu_is_an_invalid_argument() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);
    reader.open_physical_channel().unwrap();

    assert!(matches!(
        reader.transmit_apdu(&[0x00]),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn power_on_data_is_the_uppercase_hex_atr() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    assert!(matches!(
        reader.power_on_data(),
        Err(Error::IllegalState(_))
    ));

    reader.open_physical_channel().unwrap();
    assert_eq!(
        reader.power_on_data().unwrap(),
        "3B8F8001804F0CA0000003060300030000000068"
    );
}

#[test]
fn several_protocol_rules_may_match_the_same_card() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);
    reader.open_physical_channel().unwrap();

    // the MIFARE Ultralight ATR satisfies both the generic contact rule
    // ("3.*") and the specific technology rule; precedence stays with the
    // caller
    assert!(reader.is_current_protocol("ISO_7816_3").unwrap());
    assert!(reader.is_current_protocol("MIFARE_ULTRALIGHT").unwrap());
    assert!(!reader.is_current_protocol("MIFARE_DESFIRE").unwrap());
    assert!(!reader.is_current_protocol("UNKNOWN_PROTOCOL").unwrap());
}

#[test]
fn current_protocol_with_no_card_is_an_illegal_state() {
    let terminal = MockTerminal::new(READER_NAME);
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    // no rule at all short-circuits to false without touching the card
    assert!(!reader.is_current_protocol("UNKNOWN_PROTOCOL").unwrap());
    assert!(matches!(
        reader.is_current_protocol("ISO_7816_3"),
        Err(Error::IllegalState(_))
    ));
}

#[test]
fn disabling_a_protocol_overrides_its_built_in_rule() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let builder = PcscPluginBuilder::new()
        .update_protocol_rule("MIFARE_ULTRALIGHT", None)
        .unwrap();
    let plugin = plugin_with_builder(&terminal, builder);
    let reader = reader_for(&plugin);
    reader.open_physical_channel().unwrap();

    assert!(!reader.is_protocol_supported("MIFARE_ULTRALIGHT"));
    assert!(!reader.is_current_protocol("MIFARE_ULTRALIGHT").unwrap());
    // the other defaults are untouched
    assert!(reader.is_protocol_supported("ISO_7816_3"));
}

#[test]
fn presence_check_closes_a_stale_channel() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    reader.open_physical_channel().unwrap();
    assert!(reader.check_card_presence().unwrap());
    assert!(!reader.is_physical_channel_open());

    // the next open re-establishes a clean channel
    reader.open_physical_channel().unwrap();
    assert_eq!(terminal.connect_count(), 2);
}

#[test]
fn sharing_mode_switch_releases_exclusive_access_immediately() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    // exclusive by default
    reader.open_physical_channel().unwrap();
    assert!(terminal.is_exclusive());

    reader.set_sharing_mode(SharingMode::Shared).unwrap();
    assert!(!terminal.is_exclusive());
}

#[test]
fn sharing_mode_switch_failure_is_a_reader_failure() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    reader.open_physical_channel().unwrap();
    terminal.fail_next_exclusive(ServiceError::SharingViolation);
    assert!(matches!(
        reader.set_sharing_mode(SharingMode::Shared),
        Err(Error::ReaderIo { .. })
    ));
}

#[test]
fn shared_mode_skips_the_exclusive_request() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    reader.set_sharing_mode(SharingMode::Shared).unwrap();
    reader.open_physical_channel().unwrap();
    assert!(!terminal.is_exclusive());
}

#[test]
fn contactless_class_resolves_from_the_name_filter() {
    let contactless = MockTerminal::new("ACS ACR122U PICC Interface");
    let service = MockService::with_terminal(contactless);
    service.add_terminal(MockTerminal::new("Cherry TC 1100"));
    let plugin = PcscPluginBuilder::new().build_with_service(service).unwrap();

    let reader = plugin
        .find_reader("ACS ACR122U PICC Interface")
        .unwrap()
        .unwrap();
    assert!(reader.is_contactless());

    let reader = plugin.find_reader("Cherry TC 1100").unwrap().unwrap();
    assert!(!reader.is_contactless());

    // the explicit override wins over the name-based determination
    reader.set_contactless(true);
    assert!(reader.is_contactless());
}

#[test]
fn control_command_without_a_card_uses_a_transient_direct_connection() {
    let terminal = MockTerminal::new(READER_NAME);
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    let command_id = reader.ioctl_ccid_escape_command_id();
    let response = reader
        .transmit_control_command(command_id, &[0x01, 0x02])
        .unwrap();

    assert_eq!(response, [0x01, 0x02]);
    assert_eq!(terminal.direct_connect_count(), 1);
    assert_eq!(
        terminal.control_codes(),
        [Platform::probe().control_code(command_id)]
    );
    assert_eq!(terminal.dispositions(), [Disposition::Leave]);
}

#[test]
fn control_command_reuses_a_live_card_connection() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);
    reader.open_physical_channel().unwrap();

    reader.transmit_control_command(1, &[0xAA]).unwrap();
    assert_eq!(terminal.direct_connect_count(), 0);
}

#[test]
fn insertion_wait_returns_when_a_card_appears() {
    let terminal = MockTerminal::new(READER_NAME);
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            terminal.insert_card();
        });
        reader.wait_for_card_insertion().unwrap();
    });
}

#[test]
fn insertion_wait_cancellation_is_observed_within_one_cycle() {
    let terminal = MockTerminal::new(READER_NAME);
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    let started = Instant::now();
    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(60));
            reader.stop_wait_for_card_insertion();
        });
        assert!(matches!(
            reader.wait_for_card_insertion(),
            Err(Error::Cancelled { .. })
        ));
    });
    // 60 ms until the stop plus at most one 20 ms cycle, with margin
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn insertion_wait_surfaces_native_faults_as_reader_failures() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.fail_next_presence(ServiceError::CommError);
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);

    assert!(matches!(
        reader.wait_for_card_insertion(),
        Err(Error::ReaderIo { .. })
    ));
}

#[test]
fn removal_wait_returns_when_the_card_disappears() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);
    reader.open_physical_channel().unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            terminal.remove_card();
        });
        reader.wait_for_card_removal().unwrap();
    });
    // the channel is cleaned up on exit
    assert!(!reader.is_physical_channel_open());
}

#[test]
fn removal_wait_cancellation_cleans_up_and_reports() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);
    reader.open_physical_channel().unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(60));
            reader.stop_wait_for_card_removal();
        });
        assert!(matches!(
            reader.wait_for_card_removal(),
            Err(Error::Cancelled { .. })
        ));
    });
    assert!(!reader.is_physical_channel_open());
}

#[test]
fn unpower_removal_wait_polls_by_transmission() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);
    reader.set_disconnection_mode(DisconnectionMode::Unpower);
    reader.open_physical_channel().unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(60));
            terminal.set_transmit_error(Some(ServiceError::RemovedCard));
        });
        // the first failing status probe is proof of removal
        reader.wait_for_card_removal().unwrap();
    });
    assert!(terminal.transmit_count() >= 1);
    assert!(!reader.is_physical_channel_open());
}

#[test]
fn processing_time_monitoring_aliases_the_removal_wait() {
    let terminal = MockTerminal::new(READER_NAME);
    terminal.insert_card();
    let plugin = plugin_for(&terminal);
    let reader = reader_for(&plugin);
    reader.open_physical_channel().unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            reader.stop_card_presence_monitoring_during_processing();
        });
        assert!(matches!(
            reader.monitor_card_presence_during_processing(),
            Err(Error::Cancelled { .. })
        ));
    });
}
