use rust_ivi::{
    capabilities::{Instrument, MemorySlots, RangedMeasurement},
    error::DriverError,
    instruments::{Hmc8012, MeasurementFunction},
    session::{MockSession, SessionCall},
};

fn dc_volts_session() -> MockSession {
    MockSession::new()
        .with_reply("SENSe:FUNCtion?", "VOLT:DC")
        .with_reply("SENSe:VOLTage:DC:RANGe?", "4.000000E+00")
        .with_reply("SENSe:ADCRate?", "\"MED\"")
}

#[tokio::test]
async fn test_repeated_reads_hit_cache() {
    let session = dc_volts_session();
    let mut dmm = Hmc8012::new(session.clone()).unwrap();

    assert_eq!(dmm.adc_rate().await.unwrap(), "MED");
    let after_first = session.round_trips();
    assert_eq!(dmm.adc_rate().await.unwrap(), "MED");

    assert_eq!(after_first, 1);
    assert_eq!(session.round_trips(), 1);
}

#[tokio::test]
async fn test_written_value_is_read_back_without_io() {
    let session = dc_volts_session();
    let mut dmm = Hmc8012::new(session.clone()).unwrap();

    dmm.set_adc_rate("fast").await.unwrap();
    session.clear_log();

    assert_eq!(dmm.adc_rate().await.unwrap(), "FAST");
    assert_eq!(session.round_trips(), 0);
}

#[tokio::test]
async fn test_range_snaps_to_next_rung() {
    let session = dc_volts_session();
    let mut dmm = Hmc8012::new(session.clone()).unwrap();

    assert_eq!(dmm.set_range(7.0).await.unwrap(), 40.0);
    assert_eq!(dmm.range().await.unwrap(), 40.0);
    assert_eq!(session.writes(), vec!["SENSe:VOLTage:DC:RANGe 40"]);
}

#[tokio::test]
async fn test_range_clamps_to_top_rung() {
    let session = dc_volts_session();
    let mut dmm = Hmc8012::new(session.clone()).unwrap();

    assert_eq!(dmm.set_range(5000.0).await.unwrap(), 1000.0);
    assert_eq!(session.writes(), vec!["SENSe:VOLTage:DC:RANGe 1000"]);
}

#[tokio::test]
async fn test_unknown_adc_rate_is_rejected_before_io() {
    let session = dc_volts_session();
    let mut dmm = Hmc8012::new(session.clone()).unwrap();
    assert_eq!(dmm.adc_rate().await.unwrap(), "MED");
    session.clear_log();

    let err = dmm.set_adc_rate("ULTRA").await.unwrap_err();

    assert!(matches!(
        err,
        DriverError::UnsupportedValue { ref attribute, ref value } if attribute == "ADC_rate" && value == "ULTRA"
    ));
    assert!(session.call_log().is_empty());
    assert_eq!(dmm.adc_rate().await.unwrap(), "MED");
    assert_eq!(session.round_trips(), 0);
}

#[tokio::test]
async fn test_range_validation_precedes_function_query() {
    let session = dc_volts_session();
    let mut dmm = Hmc8012::new(session.clone()).unwrap();

    let err = dmm.set_range(f64::NAN).await.unwrap_err();

    assert!(matches!(err, DriverError::UnsupportedValue { .. }));
    assert!(session.call_log().is_empty());
}

#[tokio::test]
async fn test_recall_invalidates_cached_settings() {
    let session = dc_volts_session();
    let mut dmm = Hmc8012::new(session.clone()).unwrap();
    dmm.range().await.unwrap();
    let before = session.round_trips();

    dmm.recall(2).await.unwrap();
    dmm.range().await.unwrap();

    // measurement function and range are both re-read
    assert_eq!(session.round_trips(), before + 2);
    assert!(session
        .call_log()
        .contains(&SessionCall::Write("*RCL 2".to_string())));
}

#[tokio::test]
async fn test_memory_slot_out_of_range() {
    let session = MockSession::new();
    let mut dmm = Hmc8012::new(session.clone()).unwrap();

    assert_eq!(dmm.memory_size(), 5);
    assert!(matches!(
        dmm.recall(6).await,
        Err(DriverError::OutOfRange { index: 6, min: 1, max: 5, .. })
    ));
    assert!(matches!(
        dmm.set_memory_name(0, "x").await,
        Err(DriverError::OutOfRange { .. })
    ));
    assert!(session.call_log().is_empty());
}

#[tokio::test]
async fn test_simulated_driver_never_touches_session() {
    let session = MockSession::simulated();
    let mut dmm = Hmc8012::new(session.clone()).unwrap();

    dmm.initialize(Default::default()).await.unwrap();
    dmm.set_measurement_function(MeasurementFunction::FourWireResistance)
        .await
        .unwrap();
    assert_eq!(dmm.set_range(300.0).await.unwrap(), 400.0);
    dmm.set_auto_range(false).await.unwrap();
    dmm.save(1).await.unwrap();

    assert_eq!(
        dmm.measurement_function().await.unwrap(),
        MeasurementFunction::FourWireResistance
    );
    assert_eq!(dmm.range().await.unwrap(), 400.0);
    assert!(!dmm.auto_range().await.unwrap());
    assert_eq!(dmm.identity().await.unwrap().model, "HMC8012");
    assert!(session.call_log().is_empty());
}
