// SPDX-License-Identifier: Apache-2.0

use super::{context, echo_handler, peer, run_test, TestCommand, HOST_ECHO, OTHER_APP, TEST_APP};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serial_test::serial;
use wicket::{
    Context, Error, Origin, Param, Params, ResultCode, ReverseCall, Session, Settings, Timeout,
    UserData, Uuid, Value,
};

fn callback(value: Value) -> Params {
    Params::new([
        Param::ValueInout(value),
        Param::None,
        Param::None,
        Param::None,
    ])
}

#[test]
fn reverse_call_round_trip() {
    let ctx = context();
    let session = ctx.session(TEST_APP).handler(echo_handler).open().unwrap();

    let mut params = callback(Value::new(41, 0));
    session
        .invoke(TestCommand::Callback as u32, &mut params)
        .unwrap();
    assert_eq!(params.value(0), Ok(&Value::new(41, 42)));
}

#[test]
fn without_handler() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();

    // The application sees the refusal and decides what to make of it.
    let mut params = callback(Value::new(1, 0));
    session
        .invoke(TestCommand::Callback as u32, &mut params)
        .unwrap();
    assert_eq!(
        params.value(0),
        Ok(&Value::new(
            ResultCode::NotSupported as u32,
            Origin::Api as u32
        ))
    );

    let mut params = callback(Value::new(1, 0));
    assert_eq!(
        session.invoke(TestCommand::CallbackStrict as u32, &mut params),
        Err(Error::new(ResultCode::NotSupported, Origin::TrustedApp))
    );
}

#[test]
fn handler_failure() {
    let ctx = context();
    let session = ctx
        .session(TEST_APP)
        .handler(|_: ReverseCall<'_>| -> Result<(), ResultCode> { Err(ResultCode::Cancel) })
        .open()
        .unwrap();

    let mut params = callback(Value::new(1, 0));
    session
        .invoke(TestCommand::Callback as u32, &mut params)
        .unwrap();
    assert_eq!(
        params.value(0),
        Ok(&Value::new(
            ResultCode::Cancel as u32,
            Origin::ClientApp as u32
        ))
    );
}

#[test]
fn caller_and_user_data() {
    let seen: Arc<Mutex<Vec<(Uuid, u32, u32)>>> = Arc::default();
    let data: UserData = Arc::new(7u32);

    let ctx = context();
    let recorder = seen.clone();
    let session = ctx
        .session(TEST_APP)
        .handler(move |call: ReverseCall<'_>| -> Result<(), ResultCode> {
            let tag = call
                .user_data
                .and_then(|data| data.downcast_ref::<u32>())
                .copied()
                .unwrap_or_default();
            recorder.lock().unwrap().push((
                call.caller,
                call.command_id,
                call.param_types.raw(),
            ));
            echo_handler(call)?;
            assert_eq!(tag, 7);
            Ok(())
        })
        .user_data(data)
        .open()
        .unwrap();

    let mut params = callback(Value::new(1, 0));
    session
        .invoke(TestCommand::Callback as u32, &mut params)
        .unwrap();

    let expected_types = Params::new([
        Param::ValueInout(Value::default()),
        Param::MemrefInput(Default::default()),
        Param::MemrefOutput(Default::default()),
        Param::None,
    ])
    .types()
    .raw();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(TEST_APP, HOST_ECHO, expected_types)]
    );
}

#[test]
fn context_handler() {
    let ctx = context();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    ctx.set_reverse_handler(
        move |call: ReverseCall<'_>| -> Result<(), ResultCode> {
            counter.fetch_add(1, Ordering::SeqCst);
            echo_handler(call)
        },
        None,
    );

    let fallback = ctx.session(TEST_APP).open().unwrap();
    let own = ctx
        .session(OTHER_APP)
        .handler(|_: ReverseCall<'_>| -> Result<(), ResultCode> { Err(ResultCode::Busy) })
        .open()
        .unwrap();

    let mut params = callback(Value::new(5, 0));
    fallback
        .invoke(TestCommand::Callback as u32, &mut params)
        .unwrap();
    assert_eq!(params.value(0), Ok(&Value::new(5, 6)));

    let mut params = callback(Value::new(5, 0));
    own.invoke(TestCommand::Callback as u32, &mut params)
        .unwrap();
    assert_eq!(
        params.value(0),
        Ok(&Value::new(ResultCode::Busy as u32, Origin::ClientApp as u32))
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    ctx.clear_reverse_handler();
    let mut params = callback(Value::new(5, 0));
    fallback
        .invoke(TestCommand::Callback as u32, &mut params)
        .unwrap();
    assert_eq!(
        params.value(0),
        Ok(&Value::new(
            ResultCode::NotSupported as u32,
            Origin::Api as u32
        ))
    );
}

#[test]
fn repeated_reverse_calls() {
    let ctx = context();
    let session = ctx.session(TEST_APP).handler(echo_handler).open().unwrap();

    let mut params = callback(Value::new(10, 0));
    session
        .invoke(TestCommand::Repeat as u32, &mut params)
        .unwrap();
    assert_eq!(params.value(0), Ok(&Value::new(10, 55)));

    // A second forward call goes through the same proxy channel.
    let mut params = callback(Value::new(3, 0));
    session
        .invoke(TestCommand::Repeat as u32, &mut params)
        .unwrap();
    assert_eq!(params.value(0), Ok(&Value::new(3, 6)));
}

#[test]
fn reverse_call_while_opening() {
    let ctx = context();
    let mut params = callback(Value::new(20, 0));
    let session = ctx
        .session(TEST_APP)
        .handler(echo_handler)
        .params(&mut params)
        .open()
        .unwrap();

    assert_eq!(params.value(0), Ok(&Value::new(20, 21)));
    session.close().unwrap();
}

#[test]
fn reentrant_invoke_is_busy() {
    let ctx = context();
    let slot: Arc<Mutex<Option<Session>>> = Arc::default();
    let inner = slot.clone();

    let session = ctx
        .session(TEST_APP)
        .handler(move |call: ReverseCall<'_>| -> Result<(), ResultCode> {
            let session = inner.lock().unwrap().clone();
            if let Some(session) = session {
                let reentered = session.invoke(TestCommand::Sleep as u32, &mut callback(Value::default()));
                assert_eq!(
                    reentered,
                    Err(Error::new(ResultCode::Busy, Origin::Api))
                );
                assert_eq!(
                    session.close(),
                    Err(Error::new(ResultCode::BadState, Origin::Api))
                );
            }
            echo_handler(call)
        })
        .open()
        .unwrap();
    *slot.lock().unwrap() = Some(session.clone());

    let mut params = callback(Value::new(1, 0));
    session
        .invoke(TestCommand::Callback as u32, &mut params)
        .unwrap();
    assert_eq!(params.value(0), Ok(&Value::new(1, 2)));

    slot.lock().unwrap().take();
    session.close().unwrap();
}

#[test]
fn nested_forward_call_from_handler() {
    let ctx = context();
    let other = ctx.session(OTHER_APP).handler(echo_handler).open().unwrap();

    let session = ctx
        .session(TEST_APP)
        .handler(move |call: ReverseCall<'_>| -> Result<(), ResultCode> {
            let mut params = callback(Value::new(100, 0));
            other
                .invoke(TestCommand::Callback as u32, &mut params)
                .map_err(|e| e.code)?;
            assert_eq!(params.value(0), Ok(&Value::new(100, 101)));
            echo_handler(call)
        })
        .open()
        .unwrap();

    let mut params = callback(Value::new(1, 0));
    session
        .invoke(TestCommand::Callback as u32, &mut params)
        .unwrap();
    assert_eq!(params.value(0), Ok(&Value::new(1, 2)));
}

#[test]
fn nested_forward_call_into_same_application() {
    let ctx = context();
    let other = ctx.session(TEST_APP).handler(echo_handler).open().unwrap();

    let session = ctx
        .session(TEST_APP)
        .handler(move |call: ReverseCall<'_>| -> Result<(), ResultCode> {
            let mut params = callback(Value::new(100, 0));
            other
                .invoke(TestCommand::Callback as u32, &mut params)
                .map_err(|e| e.code)?;
            assert_eq!(params.value(0), Ok(&Value::new(100, 101)));
            echo_handler(call)
        })
        .open()
        .unwrap();

    let mut params = callback(Value::new(1, 0));
    session
        .invoke_with_timeout(
            TestCommand::Callback as u32,
            &mut params,
            Timeout::Millis(5000),
        )
        .unwrap();
    assert_eq!(params.value(0), Ok(&Value::new(1, 2)));
}

#[test]
fn proxy_channel_opens_on_first_reverse_call() {
    let peer = peer();
    let ctx = Context::with_settings(&peer, Settings::default());
    let session = ctx.session(TEST_APP).handler(echo_handler).open().unwrap();

    let mut params = Params::new([
        Param::ValueInput(Value::default()),
        Param::None,
        Param::None,
        Param::None,
    ]);
    session
        .invoke(TestCommand::Sleep as u32, &mut params)
        .unwrap();
    assert!(!peer.proxy_channel_open(TEST_APP));

    for i in 0..2 {
        let mut params = callback(Value::new(i, 0));
        session
            .invoke(TestCommand::Callback as u32, &mut params)
            .unwrap();
        assert_eq!(params.value(0), Ok(&Value::new(i, i + 1)));
        assert!(peer.proxy_channel_open(TEST_APP));
    }
    assert!(!peer.proxy_channel_open(OTHER_APP));
}

#[test]
#[serial]
fn slow_handler_times_out_the_reverse_call() {
    let ctx = context();
    let session = ctx
        .session(TEST_APP)
        .handler(|call: ReverseCall<'_>| -> Result<(), ResultCode> {
            thread::sleep(Duration::from_millis(250));
            echo_handler(call)
        })
        .open()
        .unwrap();

    // The application gives up waiting on the host, the forward call still completes.
    let mut params = callback(Value::new(1, 0));
    session
        .invoke_with_timeout(
            TestCommand::Callback as u32,
            &mut params,
            Timeout::Millis(100),
        )
        .unwrap();
    assert_eq!(
        params.value(0),
        Ok(&Value::new(ResultCode::Timeout as u32, Origin::Comms as u32))
    );
}

#[test]
#[serial]
fn late_reply_is_not_taken_for_the_next_reverse_call() {
    let ctx = context();
    let session = ctx
        .session(TEST_APP)
        .handler(|call: ReverseCall<'_>| -> Result<(), ResultCode> {
            let value = *call.params.value(0)?;
            if value.a == 0 {
                thread::sleep(Duration::from_millis(250));
            }
            *call.params.value_mut(0)? = Value::new(value.a, value.a + 100);
            Ok(())
        })
        .open()
        .unwrap();

    let mut params = Params::new([
        Param::ValueOutput(Value::default()),
        Param::ValueOutput(Value::default()),
        Param::None,
        Param::None,
    ]);
    session
        .invoke_with_timeout(TestCommand::Twice as u32, &mut params, Timeout::Millis(150))
        .unwrap();
    assert_eq!(
        params.value(0),
        Ok(&Value::new(ResultCode::Timeout as u32, Origin::Comms as u32))
    );
    assert_eq!(params.value(1), Ok(&Value::new(1, 101)));
}

#[test]
#[serial]
fn reverse_calls_of_one_application_run_in_parallel() {
    let ctx = context();
    let start = Instant::now();

    run_test(2, move |i| {
        let session = ctx
            .session(TEST_APP)
            .handler(|call: ReverseCall<'_>| -> Result<(), ResultCode> {
                thread::sleep(Duration::from_millis(300));
                echo_handler(call)
            })
            .open()
            .unwrap();

        let mut params = callback(Value::new(i as u32, 0));
        session
            .invoke(TestCommand::Callback as u32, &mut params)
            .unwrap();
        assert_eq!(params.value(0), Ok(&Value::new(i as u32, i as u32 + 1)));
    });

    assert!(start.elapsed() < Duration::from_millis(550));
}
