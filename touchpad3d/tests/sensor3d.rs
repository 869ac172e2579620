mod common;

use std::sync::{Arc, Mutex};

use common::{fast_config, open};
use proptest::prelude::*;
use touchpad3d::{
    HmiError, Session,
    channel::ChannelError,
    config::{Capabilities, Capability},
    error::{SystemError, codes},
    message::{
        Frequencies, Gesture3d, GestureMask, OutputMask, Parameter2d, Parameter3d, SystemInfo,
        TouchFlags, Trigger,
    },
    sensor3d::data::{Accumulator3d, SensorData},
    test_utils::{self, MockTransport, Outgoing, Reply, SensorFrame, acknowledge},
};

const SET_PARAM: u8 = 0xA2;
const REQUEST: u8 = 0x06;

/// Answers parameter requests from `params`, everything else with success.
fn parameter_device(params: &'static [(u16, u32, u32)]) -> impl Fn(&Outgoing) -> Vec<Reply> {
    move |out| {
        let mut replies = Vec::new();
        if let Outgoing::Sensor3d(msg) = out
            && msg[3] == REQUEST
            && msg[4] == SET_PARAM
        {
            let id = u16::from_le_bytes([msg[8], msg[9]]);
            if let Some(&(param, a0, a1)) = params.iter().find(|(p, ..)| *p == id) {
                replies.push(Reply::Sensor3d(test_utils::runtime_param(param, a0, a1)));
            }
        }
        replies.extend(acknowledge(out));
        replies
    }
}

#[test]
fn unanswered_instruction_is_sent_three_times() {
    let mock = MockTransport::stream();
    let session = open(&mock, fast_config());

    let err = session
        .set_param_3d(Parameter3d::DSP_GESTURE_MASK, 0x7F, 0x7F)
        .unwrap_err();
    assert!(matches!(err, HmiError::NoResponse));
    assert_eq!(err.code(), codes::NO_RESPONSE);
    assert_eq!(mock.writes_3d(SET_PARAM).len(), 3);
}

#[test]
fn device_error_is_retried_and_reported() {
    let mock = MockTransport::stream();
    mock.respond(|out| match out {
        Outgoing::Sensor3d(msg) => vec![Reply::Sensor3d(test_utils::status(
            msg[3],
            SystemError::WrongParameterValue,
        ))],
        _ => Vec::new(),
    });
    let session = open(&mock, fast_config());

    let err = session.set_air_wheel(true).unwrap_err();
    assert!(matches!(err, HmiError::System(SystemError::WrongParameterValue)));
    assert_eq!(err.code(), codes::SYSTEM_3D);
    assert_eq!(mock.writes_3d(SET_PARAM).len(), 3);
    assert_eq!(
        session.last_system_error(),
        Some(SystemError::WrongParameterValue)
    );
}

#[test]
fn acknowledged_instruction_is_sent_once() {
    let mock = MockTransport::stream();
    mock.respond(acknowledge);
    let session = open(&mock, fast_config());

    session.set_enabled_gestures(GestureMask::FLICK_WEST_EAST).unwrap();
    session.trigger_action(Trigger::Calibration).unwrap();

    let writes = mock.writes_3d(SET_PARAM);
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0][4..6], [0x85, 0x00]);
    assert_eq!(writes[0][8..16], [0x02, 0, 0, 0, 0x7F, 0, 0, 0]);
    assert_eq!(writes[1][4..6], [0x00, 0x10]);
}

#[test]
fn status_for_another_instruction_does_not_complete_the_wait() {
    let mock = MockTransport::stream();
    mock.respond(|_| vec![Reply::Sensor3d(test_utils::status(0x83, SystemError::NoError))]);
    let session = open(&mock, fast_config());

    assert!(matches!(
        session.make_persistent(touchpad3d::message::ParamCategory::Dsp),
        Err(HmiError::NoResponse)
    ));
}

#[test]
fn wakeup_ends_the_wait_and_is_recorded() {
    let mock = MockTransport::stream();
    mock.respond(|_| {
        vec![Reply::Sensor3d(test_utils::status(
            0,
            SystemError::WakeupHappened,
        ))]
    });
    let session = open(&mock, fast_config());

    let err = session.force_calibration().unwrap_err();
    assert!(matches!(err, HmiError::System(SystemError::WakeupHappened)));
    assert_eq!(session.last_system_error(), Some(SystemError::WakeupHappened));
}

#[test]
fn parameters_are_read_back() {
    let mock = MockTransport::stream();
    mock.respond(parameter_device(&[
        (0x85, 0x22, 0x7F),
        (0x97, 0x80, 0),
        (0x80, 0x00, 0x3F),
        (0xA0, 0xFFFF_0013, 0),
        (0xA1, 0x0010, 0),
    ]));
    let session = open(&mock, fast_config());

    assert_eq!(
        session.get_param_3d(Parameter3d::DSP_GESTURE_MASK).unwrap(),
        (0x22, 0x7F)
    );
    assert_eq!(
        session.enabled_gestures().unwrap(),
        GestureMask::FLICK_WEST_EAST | GestureMask::CIRCLE_CLOCKWISE
    );
    // The touch state reads back from bit 7.
    assert!(session.touch_detection().unwrap());
    assert!(!session.auto_calibration().unwrap());

    let (enabled, locked) = session.output_enable_mask().unwrap();
    assert_eq!(
        enabled,
        OutputMask::DSP_STATUS | OutputMask::GESTURE_INFO | OutputMask::POSITION
    );
    assert_eq!(locked, OutputMask::POSITION);
}

#[test]
fn auto_calibration_reads_back_the_mode_bits() {
    let mock = MockTransport::stream();
    mock.respond(parameter_device(&[(0x80, 0x3F, 0x3F)]));
    let session = open(&mock, fast_config());

    // Set mode bits read as enabled, even though enabling writes zeros.
    assert!(session.auto_calibration().unwrap());

    session.set_auto_calibration(true).unwrap();
    let writes = mock.writes_3d(SET_PARAM);
    assert_eq!(writes[0][8..16], [0, 0, 0, 0, 0x3F, 0, 0, 0]);
}

#[test]
fn acknowledged_request_without_data_is_missing() {
    let mock = MockTransport::stream();
    mock.respond(acknowledge);
    let session = open(&mock, fast_config());

    let err = session.air_wheel_enabled().unwrap_err();
    assert!(matches!(err, HmiError::MessageMissing));
    assert_eq!(err.code(), codes::MESSAGE_MISSING);
}

#[test]
fn output_mask_writes_lock_before_enable() {
    let mock = MockTransport::stream();
    mock.respond(acknowledge);
    let session = open(&mock, fast_config());

    session
        .set_output_enable_mask(OutputMask::POSITION, OutputMask::POSITION, OutputMask::OUTPUT_ALL)
        .unwrap();

    let ids: Vec<u8> = mock.writes_3d(SET_PARAM).iter().map(|msg| msg[4]).collect();
    assert_eq!(ids, [0xA1, 0xA0]);
}

#[test]
fn empty_frequency_selection_is_rejected() {
    let mock = MockTransport::stream();
    let session = open(&mock, fast_config());

    let err = session.select_frequencies(Frequencies::empty()).unwrap_err();
    assert!(matches!(err, HmiError::BadParameter(_)));
    assert_eq!(err.code(), codes::BAD_PARAMETER);
    assert!(mock.writes().is_empty());
}

#[test]
fn firmware_version_is_queried() {
    let mock = MockTransport::stream();
    mock.respond(|out| {
        let mut replies = Vec::new();
        if let Outgoing::Sensor3d(msg) = out
            && msg[3] == REQUEST
            && msg[4] == 0x83
        {
            replies.push(Reply::Sensor3d(test_utils::version_info(
                0xAA,
                "1.0.7;p:HillstarV01",
            )));
        }
        replies.extend(acknowledge(out));
        replies
    });
    let session = open(&mock, fast_config());

    let info = session.fw_version_3d().unwrap();
    assert_eq!(info.fw_valid, 0xAA);
    assert_eq!(info.version_str(), "1.0.7;p:HillstarV01");

    let mut buf = [0u8; 5];
    assert_eq!(session.query_fw_version_3d(&mut buf).unwrap(), 5);
    assert_eq!(&buf, b"1.0.7");
}

#[test]
fn reset_uses_the_stream_sequence() {
    let mock = MockTransport::stream();
    let session = open(&mock, fast_config());

    session.reset_3d().unwrap();
    assert_eq!(mock.writes(), [Outgoing::Reset]);
}

#[test]
fn disabled_capability_is_not_implemented() {
    let mock = MockTransport::stream();
    let config = touchpad3d::config::SessionConfig {
        capabilities: Capabilities {
            rtc_3d: false,
            ..Default::default()
        },
        ..fast_config()
    };
    let session = Session::new(mock.clone(), config);

    // The capability is checked before the connection.
    let err = session.set_air_wheel(true).unwrap_err();
    assert!(matches!(err, HmiError::NotImplemented(Capability::Rtc3d)));
    assert_eq!(err.code(), codes::NOT_IMPLEMENTED);
}

#[test]
fn closed_session_is_not_connected() {
    let mock = MockTransport::stream();
    let mut session = open(&mock, fast_config());
    session.close();
    assert!(!mock.is_open());

    let err = session.set_param_3d(Parameter3d::TRIGGER, 0, 0).unwrap_err();
    assert!(matches!(err, HmiError::NotConnected));
    assert!(mock.writes().is_empty());
}

#[test]
fn refused_open_is_reported() {
    let mock = MockTransport::stream();
    mock.refuse_open(true);
    let mut session = Session::new(mock.clone(), fast_config());

    let err = session.open().unwrap_err();
    assert_eq!(err.code(), codes::IO_OPEN);
    assert!(!session.is_open());
}

#[test]
fn stream_transport_carries_no_2d_messages() {
    let mock = MockTransport::stream();
    let session = open(&mock, fast_config());

    let err = session
        .set_param_2d(Parameter2d::ACTIVE_MASK, 0, 0)
        .unwrap_err();
    assert!(matches!(err, HmiError::Channel(ChannelError::Unsupported2d)));
}

#[test]
fn gesture_is_published_once() {
    let mock = MockTransport::stream();
    let mut session = open(&mock, fast_config());

    mock.push_3d(SensorFrame::new(1).gesture(0x0000_0002).build());
    let refresh = session.retrieve_3d().unwrap().unwrap();
    assert_eq!(refresh.skipped, 0);
    assert_eq!(session.gesture().gesture, Gesture3d::FlickWestToEast);
    assert_eq!(session.gesture().last_event, 0);

    // Nothing new: the published snapshot stays as it is.
    assert!(session.retrieve_3d().unwrap().is_none());
    assert_eq!(session.gesture().gesture, Gesture3d::FlickWestToEast);

    mock.push_3d(SensorFrame::new(2).build());
    session.retrieve_3d().unwrap().unwrap();
    assert_eq!(session.gesture().gesture, Gesture3d::NoGesture);
    assert_eq!(session.gesture().last_event, 1);
}

#[test]
fn skipped_frames_are_counted() {
    let mock = MockTransport::stream();
    let mut session = open(&mock, fast_config());

    mock.push_3d(SensorFrame::new(1).build());
    session.retrieve_3d().unwrap().unwrap();

    // The device timestamp jumped by four samples.
    mock.push_3d(
        SensorFrame::new(5)
            .info(SystemInfo::POSITION_VALID)
            .position(10, 20, 30)
            .touch(TouchFlags::CENTER.bits())
            .build(),
    );
    let refresh = session.retrieve_3d().unwrap().unwrap();
    assert_eq!(refresh.skipped, 3);
    assert_eq!(session.sensor_data().frame_counter, 5);
    assert_eq!(session.position().z, 30);
    assert_eq!(session.touch().touch_flags, TouchFlags::CENTER);
}

#[test]
fn four_electrode_signals_end_in_the_sentinel() {
    let mock = MockTransport::stream();
    let config = touchpad3d::config::SessionConfig {
        undefined_signal: f32::NAN,
        ..fast_config()
    };
    let mut session = open(&mock, config);

    mock.push_3d(
        SensorFrame::new(1)
            .info(SystemInfo::RAW_DATA_VALID)
            .electrodes(4)
            .cic([1.0, 2.0, 3.0, 4.0, 99.0])
            .build(),
    );
    session.retrieve_3d().unwrap().unwrap();

    assert_eq!(session.cic().channel[..4], [1.0, 2.0, 3.0, 4.0]);
    assert!(session.cic().channel[4].is_nan());
}

#[test]
fn short_sensor_data_is_dropped_and_logged() {
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let mock = MockTransport::stream();
    let mut session = open(&mock, fast_config());
    session.set_logger({
        let lines = Arc::clone(&lines);
        move |line| lines.lock().unwrap().push(line.to_owned())
    });

    let mut msg = SensorFrame::new(1).position(1, 2, 3).build();
    msg.truncate(msg.len() - 2);
    msg[0] = msg.len() as u8;
    mock.push_3d(msg);

    assert!(session.retrieve_3d().unwrap().is_none());
    assert_eq!(session.malformed_count(), 1);
    assert!(lines.lock().unwrap()[0].starts_with("handle_sensor_data"));
    assert!(session.log(format_args!("hello")));
}

#[test]
fn frames_are_announced_to_listeners() {
    let mock = MockTransport::stream();
    let mut session = open(&mock, fast_config());
    let events = session.listen();

    mock.push_3d(SensorFrame::new(9).build());
    session.retrieve_3d().unwrap().unwrap();
    assert_eq!(
        events.try_recv(),
        Ok(touchpad3d::event::DataEvent::Frame3d { frame_counter: 9 })
    );
}

#[test]
fn cleanup_forgets_published_data() {
    let mock = MockTransport::stream();
    let mut session = open(&mock, fast_config());

    mock.push_3d(
        SensorFrame::new(1)
            .info(SystemInfo::POSITION_VALID)
            .position(1, 1, 1)
            .build(),
    );
    session.retrieve_3d().unwrap().unwrap();
    session.cleanup();

    assert!(!session.is_open());
    assert_eq!(*session.sensor_data(), SensorData::default());
}

fn output_mask_strategy() -> impl Strategy<Value = OutputMask> {
    (0u16..=0x3F, any::<bool>(), any::<bool>()).prop_map(|(low, cic, sd)| {
        let mut mask = OutputMask::from_bits_retain(low);
        mask.set(OutputMask::CIC_DATA, cic);
        mask.set(OutputMask::SD_DATA, sd);
        mask
    })
}

proptest! {
    #[test]
    fn only_selected_fields_change(mask in output_mask_strategy(), seed in 2u16..1000) {
        let all = SystemInfo::POSITION_VALID
            | SystemInfo::AIR_WHEEL_VALID
            | SystemInfo::RAW_DATA_VALID
            | SystemInfo::NOISE_POWER_VALID;

        let mut acc = Accumulator3d::new();
        acc.apply(
            &SensorFrame::new(1)
                .info(all)
                .dsp_status(0x02, 1)
                .gesture(0x3)
                .touch(0x01)
                .air_wheel(1)
                .position(1, 1, 1)
                .noise_power(1.0)
                .cic([1.0; 5])
                .sd([1.0; 5])
                .build(),
            0.0,
        );
        let before = acc.data;

        let v = seed as f32;
        let msg = SensorFrame::new(2)
            .info(all)
            .dsp_status(0x04, 2)
            .gesture(0x4)
            .touch(0x02)
            .air_wheel(2)
            .position(seed, seed, seed)
            .noise_power(v)
            .cic([v; 5])
            .sd([v; 5])
            .only(mask)
            .build();
        acc.apply(&msg, 0.0);
        let after = acc.data;

        let dsp = mask.contains(OutputMask::DSP_STATUS);
        let gesture = mask.contains(OutputMask::GESTURE_INFO);
        let touch = mask.contains(OutputMask::TOUCH_INFO);
        let air_wheel = mask.contains(OutputMask::AIR_WHEEL_INFO);
        let noise = mask.contains(OutputMask::NOISE_POWER);
        prop_assert_eq!(after.calibration.reason != before.calibration.reason, dsp);
        prop_assert_eq!(after.frequency.frequency != before.frequency.frequency, dsp);
        prop_assert_eq!(after.gesture.gesture != before.gesture.gesture, gesture);
        prop_assert_eq!(after.touch.touch_flags != before.touch.touch_flags, touch);
        prop_assert_eq!(after.air_wheel.counter != before.air_wheel.counter, air_wheel);
        prop_assert_eq!(after.position != before.position, mask.contains(OutputMask::POSITION));
        prop_assert_eq!(after.noise_power.value != before.noise_power.value, noise);
        prop_assert_eq!(after.noise_power.valid, noise);
        prop_assert_eq!(after.cic != before.cic, mask.contains(OutputMask::CIC_DATA));
        prop_assert_eq!(after.sd != before.sd, mask.contains(OutputMask::SD_DATA));
        prop_assert_eq!(after.frame_counter, 2);
    }
}
