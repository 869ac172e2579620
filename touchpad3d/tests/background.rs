mod common;

use std::{
    thread,
    time::{Duration, Instant},
};

use common::{fast_config, open};
use touchpad3d::{
    config::{ReceiveMode, SessionConfig},
    message::{Parameter3d, SystemInfo},
    test_utils::{self, MockTransport, Outgoing, Reply, SensorFrame, acknowledge},
};

fn background() -> SessionConfig {
    SessionConfig {
        receive_mode: ReceiveMode::Background,
        ..fast_config()
    }
}

#[test]
fn published_snapshots_are_never_torn() {
    const FRAMES: u32 = 200;

    let mock = MockTransport::stream();
    let mut session = open(&mock, background());

    let producer = thread::spawn({
        let mock = mock.clone();
        move || {
            for i in 1..=FRAMES {
                let v = i as u16;
                mock.push_3d(
                    SensorFrame::new(i as u8)
                        .info(SystemInfo::POSITION_VALID)
                        .position(v, v, v)
                        .build(),
                );
                if i % 16 == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    });

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut last = 0;
    while last != FRAMES && Instant::now() < deadline {
        if session.retrieve_3d().unwrap().is_some() {
            let data = session.sensor_data();
            assert_eq!(data.position.x as u32, data.frame_counter);
            assert_eq!(data.position.z as u32, data.frame_counter);
            assert!(data.frame_counter > last);
            last = data.frame_counter;
        }
    }

    producer.join().unwrap();
    assert_eq!(last, FRAMES);
}

#[test]
fn instructions_complete_through_the_reader() {
    let mock = MockTransport::stream();
    mock.respond(|out| {
        let mut replies = Vec::new();
        if let Outgoing::Sensor3d(msg) = out
            && msg[3] == 0x06
        {
            replies.push(Reply::Sensor3d(test_utils::runtime_param(0x90, 0x20, 0)));
        }
        replies.extend(acknowledge(out));
        replies
    });
    let session = open(&mock, background());

    session.set_param_3d(Parameter3d::DSP_AIR_WHEEL_CONFIG, 0x20, 0x20).unwrap();
    assert!(session.air_wheel_enabled().unwrap());
}

#[test]
fn close_stops_the_reader() {
    let mock = MockTransport::stream();
    let mut session = open(&mock, background());
    assert!(session.is_open());

    session.close();
    assert!(!mock.is_open());

    // Reopening starts a new reader.
    session.open().unwrap();
    assert_eq!(mock.open_count(), 2);
    mock.push_3d(SensorFrame::new(1).build());

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.retrieve_3d().unwrap().is_none() {
        assert!(Instant::now() < deadline, "no frame arrived");
    }
}

#[test]
fn slow_retrievals_do_not_queue_wakeups() {
    let mock = MockTransport::stream();
    let mut session = open(
        &mock,
        SessionConfig {
            reader_poll: Duration::from_millis(1),
            ..background()
        },
    );

    let mut timestamp = 0u8;
    for _ in 0..20 {
        for _ in 0..20 {
            timestamp = timestamp.wrapping_add(1);
            mock.push_3d(SensorFrame::new(timestamp).build());
        }
        thread::sleep(Duration::from_millis(20));

        assert!(session.retrieve_3d().unwrap().is_some());
        assert!(session.queued_wakeups() <= 1);
    }
}
