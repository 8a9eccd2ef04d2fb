// SPDX-License-Identifier: Apache-2.0

use super::{context, echo_handler, run_test, TestCommand, TEST_APP};

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use serial_test::serial;
use wicket::host::State;
use wicket::{Error, Memref, Origin, Param, Params, ResultCode, ReverseCall, Timeout, Value};

fn sleep(millis: u32) -> Params {
    Params::new([
        Param::ValueInput(Value::new(millis, 0)),
        Param::None,
        Param::None,
        Param::None,
    ])
}

#[test]
fn close_is_idempotent() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();
    assert_eq!(session.state(), State::Open);

    session.close().unwrap();
    assert_eq!(session.state(), State::Closed);
    session.close().unwrap();

    assert_eq!(
        session.invoke(TestCommand::Sleep as u32, &mut sleep(0)),
        Err(Error::new(ResultCode::Communication, Origin::Comms))
    );
}

#[test]
fn drop_closes() {
    let ctx = context();
    for _ in 0..16 {
        let session = ctx.session(TEST_APP).open().unwrap();
        session
            .invoke(TestCommand::Sleep as u32, &mut sleep(0))
            .unwrap();
    }
}

#[test]
#[serial]
fn close_waits_for_calls_in_flight() {
    for _ in 0..10 {
        let ctx = context();
        let session = ctx.session(TEST_APP).open().unwrap();
        let started = Arc::new(Barrier::new(2));

        let caller = {
            let session = session.clone();
            let started = started.clone();
            thread::spawn(move || {
                started.wait();
                session.invoke(TestCommand::Sleep as u32, &mut sleep(50))
            })
        };

        started.wait();
        thread::sleep(Duration::from_millis(10));
        session.close().unwrap();
        assert_eq!(session.state(), State::Closed);

        // The call issued before close ran to completion.
        assert_eq!(caller.join().unwrap(), Ok(()));
        assert_eq!(
            session.invoke(TestCommand::Sleep as u32, &mut sleep(0)),
            Err(Error::new(ResultCode::Communication, Origin::Comms))
        );
    }
}

#[test]
#[serial]
fn concurrent_calls_and_close() {
    let ctx = context();
    let session = ctx.session(TEST_APP).handler(echo_handler).open().unwrap();

    run_test(8, move |i| {
        for j in 0..16u32 {
            let mut params = Params::new([
                Param::ValueInout(Value::new(i as u32 * 100 + j, 0)),
                Param::None,
                Param::None,
                Param::None,
            ]);
            match session.invoke(TestCommand::Callback as u32, &mut params) {
                Ok(()) => {
                    let a = i as u32 * 100 + j;
                    assert_eq!(params.value(0), Ok(&Value::new(a, a + 1)));
                }
                Err(error) => {
                    assert_eq!(error, Error::new(ResultCode::Communication, Origin::Comms));
                    return;
                }
            }

            if i == 0 && j == 8 {
                session.close().unwrap();
            }
        }
    });
}

#[test]
#[serial]
fn timeout_abandons_the_call() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();

    let start = Instant::now();
    assert_eq!(
        session.invoke_with_timeout(
            TestCommand::Sleep as u32,
            &mut sleep(300),
            Timeout::Millis(20)
        ),
        Err(Error::new(ResultCode::Timeout, Origin::Comms))
    );
    assert!(start.elapsed() < Duration::from_millis(300));

    // The late reply of the abandoned call is not mistaken for this one.
    let mut params = Params::new([
        Param::MemrefInput(Memref::new(vec![0; 3])),
        Param::ValueOutput(Value::default()),
        Param::None,
        Param::None,
    ]);
    session
        .invoke(TestCommand::Inspect as u32, &mut params)
        .unwrap();
    assert_eq!(params.value(1), Ok(&Value::new(3, 0)));

    session.close().unwrap();
}

#[test]
#[serial]
fn sessions_run_in_parallel() {
    let ctx = context();
    let start = Instant::now();

    run_test(4, move |_| {
        let session = ctx.session(TEST_APP).open().unwrap();
        session
            .invoke(TestCommand::Sleep as u32, &mut sleep(100))
            .unwrap();
    });

    assert!(start.elapsed() < Duration::from_millis(400));
}

#[test]
#[serial]
fn timeout_covers_waiting_for_calls_ahead() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();
    let started = Arc::new(Barrier::new(2));

    let ahead = {
        let session = session.clone();
        let started = started.clone();
        thread::spawn(move || {
            started.wait();
            session.invoke(TestCommand::Sleep as u32, &mut sleep(300))
        })
    };

    started.wait();
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    assert_eq!(
        session.invoke_with_timeout(TestCommand::Sleep as u32, &mut sleep(0), Timeout::Millis(20)),
        Err(Error::new(ResultCode::Timeout, Origin::Comms))
    );
    assert!(start.elapsed() < Duration::from_millis(200));

    assert_eq!(ahead.join().unwrap(), Ok(()));
    session
        .invoke(TestCommand::Sleep as u32, &mut sleep(0))
        .unwrap();
}

#[test]
fn close_after_handler_panic() {
    let ctx = context();
    let session = ctx
        .session(TEST_APP)
        .handler(|_: ReverseCall<'_>| -> Result<(), ResultCode> {
            panic!("handler crashed")
        })
        .open()
        .unwrap();

    let caller = {
        let session = session.clone();
        thread::spawn(move || {
            let mut params = Params::new([
                Param::ValueInout(Value::new(1, 0)),
                Param::None,
                Param::None,
                Param::None,
            ]);
            session.invoke(TestCommand::Callback as u32, &mut params)
        })
    };
    assert!(caller.join().is_err());

    session.close().unwrap();
    assert_eq!(session.state(), State::Closed);
}
