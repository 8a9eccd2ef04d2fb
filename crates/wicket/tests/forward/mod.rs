// SPDX-License-Identifier: Apache-2.0

use super::{context, peer, TestCommand, GREETING, OTHER_APP, TEST_APP};

use wicket::peer::ROUTING_SERVICE_UUID;
use wicket::{Context, Error, Login, Memref, Origin, Param, Params, ResultCode, Uuid, Value};

fn err(code: ResultCode, origin: Origin) -> Result<(), Error> {
    Err(Error::new(code, origin))
}

#[test]
fn echo() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();

    let mut params = Params::new([
        Param::ValueInput(Value::new(3, 4)),
        Param::ValueInout(Value::new(5, 6)),
        Param::MemrefInput(Memref::new(GREETING.to_vec())),
        Param::MemrefInout(Memref::new(vec![0; 64])),
    ]);
    session.invoke(TestCommand::Echo as u32, &mut params).unwrap();

    assert_eq!(params.value(0), Ok(&Value::new(3, 4)));
    assert_eq!(params.value(1), Ok(&Value::new(0xE, 0xF)));
    let inout = params.memref(3).unwrap();
    assert_eq!(inout.size(), GREETING.len());
    assert_eq!(inout.data(), Some(GREETING));
    assert_eq!(params.memref(2).unwrap().data(), Some(GREETING));

    session.close().unwrap();
}

#[test]
fn unknown_command() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();

    assert_eq!(
        session.invoke(0xdead, &mut Params::default()),
        err(ResultCode::BadParameters, Origin::Tee)
    );
    // The session survives a refused call.
    let mut params = Params::new([
        Param::ValueInput(Value::new(0, 0)),
        Param::None,
        Param::None,
        Param::None,
    ]);
    assert_eq!(session.invoke(TestCommand::Sleep as u32, &mut params), Ok(()));
}

#[test]
fn mismatched_types() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();

    for params in [
        [
            Param::ValueInput(Value::new(3, 4)),
            Param::ValueInout(Value::new(5, 6)),
            Param::MemrefInput(Memref::new(GREETING.to_vec())),
            Param::MemrefOutput(Memref::new(vec![0; 64])),
        ],
        [Param::None, Param::None, Param::None, Param::None],
        [
            Param::ValueInout(Value::new(3, 4)),
            Param::ValueInout(Value::new(5, 6)),
            Param::MemrefInput(Memref::new(GREETING.to_vec())),
            Param::MemrefInout(Memref::new(vec![0; 64])),
        ],
    ] {
        let mut params = Params::new(params);
        assert_eq!(
            session.invoke(TestCommand::Echo as u32, &mut params),
            err(ResultCode::BadParameters, Origin::Tee)
        );
    }
}

#[test]
fn short_output_buffer() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();

    let mut params = Params::new([
        Param::ValueInput(Value::new(3, 4)),
        Param::ValueInout(Value::new(5, 6)),
        Param::MemrefInput(Memref::new(GREETING.to_vec())),
        Param::MemrefInout(Memref::new(vec![7; 8])),
    ]);
    assert_eq!(
        session.invoke(TestCommand::Echo as u32, &mut params),
        err(ResultCode::ShortBuffer, Origin::TrustedApp)
    );
    // Nothing is collected from a failed call but sizes.
    assert_eq!(params.value(1), Ok(&Value::new(5, 6)));
    assert_eq!(params.memref(3).unwrap().data(), Some(&[7; 8][..]));
}

#[test]
fn null_output_memref() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();

    let mut params = Params::new([
        Param::MemrefOutput(Memref::null(32)),
        Param::None,
        Param::None,
        Param::None,
    ]);
    assert_eq!(
        session.invoke(TestCommand::FillOutput as u32, &mut params),
        err(ResultCode::BadParameters, Origin::TrustedApp)
    );

    let mut params = Params::new([
        Param::MemrefOutput(Memref::new(vec![0; 32])),
        Param::None,
        Param::None,
        Param::None,
    ]);
    session
        .invoke(TestCommand::FillOutput as u32, &mut params)
        .unwrap();
    assert_eq!(params.memref(0).unwrap().data(), Some(&b"filled"[..]));
}

#[test]
fn zero_sized_and_null_inputs() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();

    for (memref, expected) in [
        (Memref::new(Vec::new()), Value::new(0, 0)),
        (Memref::null(0), Value::new(0, 1)),
        (Memref::null(12), Value::new(12, 1)),
        (Memref::with_size(vec![1; 8], 5), Value::new(5, 0)),
    ] {
        let mut params = Params::new([
            Param::MemrefInput(memref),
            Param::ValueOutput(Value::default()),
            Param::None,
            Param::None,
        ]);
        session
            .invoke(TestCommand::Inspect as u32, &mut params)
            .unwrap();
        assert_eq!(params.value(1), Ok(&expected));
    }
}

#[test]
fn callee_cannot_overstate_sizes() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();

    let mut params = Params::new([
        Param::MemrefOutput(Memref::new(vec![0; 4])),
        Param::None,
        Param::None,
        Param::None,
    ]);
    assert_eq!(
        session.invoke(TestCommand::Grow as u32, &mut params),
        err(ResultCode::BadParameters, Origin::Tee)
    );
    assert_eq!(params.memref(0).unwrap().size(), 4);
}

#[test]
fn caller_checks() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();

    let mut params = Params::new([
        Param::MemrefInput(Memref::with_size(vec![0; 4], 5)),
        Param::ValueOutput(Value::default()),
        Param::None,
        Param::None,
    ]);
    assert_eq!(
        session.invoke(TestCommand::Inspect as u32, &mut params),
        err(ResultCode::BadParameters, Origin::Api)
    );

    let small = Context::with_settings(
        &peer(),
        wicket::Settings {
            max_block_size: 256,
            ..Default::default()
        },
    );
    let session = small.session(TEST_APP).open().unwrap();
    let mut params = Params::new([
        Param::MemrefInput(Memref::new(vec![0; 512])),
        Param::ValueOutput(Value::default()),
        Param::None,
        Param::None,
    ]);
    assert_eq!(
        session.invoke(TestCommand::Inspect as u32, &mut params),
        err(ResultCode::OutOfMemory, Origin::Api)
    );
}

#[test]
fn open_failures() {
    let ctx = context();

    for (uuid, login, expected) in [
        (
            Uuid::NIL,
            Login::Public,
            Error::new(ResultCode::ItemNotFound, Origin::Tee),
        ),
        (
            TEST_APP,
            Login::User,
            Error::new(ResultCode::AccessDenied, Origin::TrustedApp),
        ),
        (
            TEST_APP,
            Login::TrustedApp,
            Error::new(ResultCode::BadParameters, Origin::Api),
        ),
        (
            ROUTING_SERVICE_UUID,
            Login::Public,
            Error::new(ResultCode::AccessDenied, Origin::TrustedApp),
        ),
    ] {
        let opened = ctx.session(uuid).login(login).open();
        assert_eq!(opened.err(), Some(expected), "{uuid} {login:?}");
    }

    assert!(ctx.session(OTHER_APP).login(Login::Group).open().is_ok());
}

#[test]
fn install_checks() {
    let peer = peer();
    assert_eq!(
        peer.install(TEST_APP, super::TestApp),
        Err(ResultCode::BadState)
    );
    assert_eq!(
        peer.install(ROUTING_SERVICE_UUID, super::TestApp),
        Err(ResultCode::AccessDenied)
    );

    let mut expected = vec![TEST_APP, OTHER_APP, ROUTING_SERVICE_UUID];
    expected.sort();
    assert_eq!(peer.services(), expected);
}

#[test]
fn crashed_application() {
    let ctx = context();
    let session = ctx.session(TEST_APP).open().unwrap();

    assert_eq!(
        session.invoke(TestCommand::Panic as u32, &mut Params::default()),
        err(ResultCode::Communication, Origin::Comms)
    );
    assert_eq!(
        session.invoke(TestCommand::Panic as u32, &mut Params::default()),
        err(ResultCode::Communication, Origin::Comms)
    );
    session.close().unwrap();
}
