// SPDX-License-Identifier: Apache-2.0

use super::{Header, Kind, Payload, Slot, HEADER_SIZE, PAYLOAD_SIZE, SLOT_WORDS, WORD};
use crate::param::{Buffer, Memref, Param, ParamType, ParamTypes, Params, Value, PARAM_COUNT};
use crate::shm::{lock, Registry, Region, ShmFlags};
use crate::status::{self, Error, Origin, ResultCode};
use crate::NULL;

use tracing::debug;

const NUM_AT: usize = HEADER_SIZE;
const TYPES_AT: usize = NUM_AT + WORD;
const ARGV_AT: usize = TYPES_AT + WORD;
const RET_AT: usize = ARGV_AT + PARAM_COUNT * SLOT_WORDS * WORD;
const DATA_AT: usize = HEADER_SIZE + PAYLOAD_SIZE;

#[inline]
fn read(bytes: &[u8], at: usize) -> Option<u64> {
    let word = bytes.get(at..at + WORD)?;
    word.try_into().ok().map(u64::from_le_bytes)
}

#[inline]
fn write(bytes: &mut [u8], at: usize, value: u64) {
    if let Some(word) = bytes.get_mut(at..at + WORD) {
        word.copy_from_slice(&value.to_le_bytes());
    }
}

#[inline]
const fn align_up(size: usize) -> usize {
    (size + WORD - 1) & !(WORD - 1)
}

#[inline]
fn narrow<T: TryFrom<u64>>(word: u64) -> Result<T, ResultCode> {
    T::try_from(word).map_err(|_| ResultCode::BadParameters)
}

/// Untrusted `wicket` block: one marshaled call and, once answered, its results.
#[derive(Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Block(Vec<u8>);

impl From<Vec<u8>> for Block {
    #[inline]
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<Block> for Vec<u8> {
    #[inline]
    fn from(block: Block) -> Self {
        block.0
    }
}

impl AsRef<[u8]> for Block {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// What the requesting side sent, kept to check and collect the reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Staged {
    types: ParamTypes,
    argv: [Slot; PARAM_COUNT],
}

impl Staged {
    #[inline]
    pub fn types(&self) -> ParamTypes {
        self.types
    }
}

/// A call decoded by the serving side.
#[derive(Debug)]
pub(crate) struct Request {
    pub(crate) command_id: u32,
    pub(crate) types: ParamTypes,
    pub(crate) params: Params,
    argv: [Slot; PARAM_COUNT],
    regions: [Option<Region>; PARAM_COUNT],
}

/// The side serving a call, which decides the origins written into the reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Responder {
    Peer,
    Host,
}

impl Responder {
    fn app(self) -> Origin {
        match self {
            Responder::Peer => Origin::TrustedApp,
            Responder::Host => Origin::ClientApp,
        }
    }

    fn framework(self) -> Origin {
        match self {
            Responder::Peer => Origin::Tee,
            Responder::Host => Origin::Api,
        }
    }
}

impl Block {
    /// Stages a call: lays out `params` and commits the input data of temporary memory
    /// references into the data section.
    ///
    /// The result words start out as a communication failure, so a block nobody answered reads
    /// as one.
    pub fn stage(
        command_id: u32,
        params: &Params,
        limit: usize,
    ) -> Result<(Self, Staged), ResultCode> {
        let types = params.types();
        let mut argv = [[0; SLOT_WORDS]; PARAM_COUNT];
        let mut data = Vec::new();

        for (slot, param) in argv.iter_mut().zip(params.iter()) {
            *slot = match param {
                Param::None | Param::ValueOutput(_) => [0; SLOT_WORDS],
                Param::ValueInput(v) | Param::ValueInout(v) => [v.a.into(), v.b.into(), 0],
                Param::MemrefInput(m) | Param::MemrefOutput(m) | Param::MemrefInout(m) => {
                    commit(param.kind(), m, &mut data)?
                }
            };

            if DATA_AT + data.len() + HEADER_SIZE > limit {
                debug!(limit, "call does not fit the block limit");
                return Err(ResultCode::OutOfMemory);
            }
        }

        let len = DATA_AT + data.len() + HEADER_SIZE;
        let mut bytes = vec![0; len];
        write(&mut bytes, 0, (len - 2 * HEADER_SIZE) as u64);
        write(&mut bytes, WORD, Kind::Call as _);
        write(&mut bytes, NUM_AT, command_id.into());
        write(&mut bytes, TYPES_AT, types.raw().into());
        for (i, slot) in argv.iter().enumerate() {
            for (j, word) in slot.iter().enumerate() {
                write(&mut bytes, ARGV_AT + (i * SLOT_WORDS + j) * WORD, *word);
            }
        }
        write(&mut bytes, RET_AT, ResultCode::Communication as _);
        write(&mut bytes, RET_AT + WORD, Origin::Comms as _);
        bytes[DATA_AT..DATA_AT + data.len()].copy_from_slice(&data);
        // The trailing `END` header is all zeros.

        Ok((Self(bytes), Staged { types, argv }))
    }

    /// Reads the item header at the start of the block.
    pub fn header(&self) -> Result<Header, ResultCode> {
        let size = read(&self.0, 0).ok_or(ResultCode::BadParameters)?;
        let kind = read(&self.0, WORD).ok_or(ResultCode::BadParameters)?;
        Ok(Header {
            size,
            kind: kind.try_into()?,
        })
    }

    /// Validates the framing of the block and reads its call payload.
    pub fn payload(&self) -> Result<Payload, ResultCode> {
        let bytes = &self.0;
        let len = bytes.len();
        if len < DATA_AT + HEADER_SIZE || len % WORD != 0 {
            return Err(ResultCode::BadParameters);
        }

        let header = self.header()?;
        if header.kind != Kind::Call || header.size != (len - 2 * HEADER_SIZE) as u64 {
            return Err(ResultCode::BadParameters);
        }

        let end = len - HEADER_SIZE;
        if read(bytes, end) != Some(0) || read(bytes, end + WORD) != Some(Kind::End as _) {
            return Err(ResultCode::BadParameters);
        }

        let word = |at: usize| read(bytes, at).ok_or(ResultCode::BadParameters);
        let mut payload = Payload {
            num: word(NUM_AT)?,
            types: word(TYPES_AT)?,
            ret: [word(RET_AT)?, word(RET_AT + WORD)?],
            ..Default::default()
        };
        for (i, slot) in payload.argv.iter_mut().enumerate() {
            for (j, w) in slot.iter_mut().enumerate() {
                *w = word(ARGV_AT + (i * SLOT_WORDS + j) * WORD)?;
            }
        }
        Ok(payload)
    }

    fn data(&self) -> &[u8] {
        let end = self.0.len().saturating_sub(HEADER_SIZE);
        self.0.get(DATA_AT..end).unwrap_or_default()
    }

    fn data_mut(&mut self) -> &mut [u8] {
        let end = self.0.len().saturating_sub(HEADER_SIZE);
        self.0.get_mut(DATA_AT..end).unwrap_or_default()
    }

    /// Collects the reply to a staged call into `params` and returns the status it carries.
    ///
    /// Sizes of output memory references are always collected; values and data only when the
    /// call succeeded. A reply that does not match what was staged, or that reports more data
    /// than the caller declared room for, is a communication failure.
    pub fn collect(&self, staged: &Staged, params: &mut Params) -> Result<(), Error> {
        let payload = self.payload().map_err(|_| Error::comms())?;
        if payload.types != u64::from(staged.types.raw()) {
            return Err(Error::comms());
        }

        let raw_status: u32 = narrow(payload.ret[0]).map_err(|_| Error::comms())?;
        let raw_origin: u32 = narrow(payload.ret[1]).map_err(|_| Error::comms())?;
        let origin = Origin::try_from(raw_origin).map_err(|_| Error::comms())?;
        let status = status::decode(raw_status);

        let data = self.data();
        for (i, param) in params.iter_mut().enumerate() {
            let kind = staged.types.get(i);
            if !kind.is_output() {
                continue;
            }
            if param.kind() != kind {
                return Err(Error::comms());
            }

            let sent = staged.argv[i];
            let got = payload.argv[i];
            match param {
                Param::ValueOutput(v) | Param::ValueInout(v) => {
                    if status.is_ok() {
                        let a = narrow(got[0]).map_err(|_| Error::comms())?;
                        let b = narrow(got[1]).map_err(|_| Error::comms())?;
                        *v = Value::new(a, b);
                    }
                }
                Param::MemrefOutput(m) | Param::MemrefInout(m) => {
                    let [offset, declared, shm] = sent;
                    if got[1] > declared {
                        debug!(slot = i, declared, reported = got[1], "reply overstates a size");
                        return Err(Error::comms());
                    }
                    let size = got[1] as usize;

                    if status.is_ok() && offset != NULL && shm == NULL {
                        let offset = offset as usize;
                        let src = data
                            .get(offset..offset + size)
                            .ok_or_else(Error::comms)?;
                        let dst = m
                            .buffer_mut()
                            .ok()
                            .and_then(|buffer| buffer.get_mut(..size))
                            .ok_or_else(Error::comms)?;
                        dst.copy_from_slice(src);
                    }
                    m.force_size(size);
                }
                _ => {}
            }
        }

        status.map_err(|code| Error::new(code, origin))
    }

    /// Decodes the call in the block, copying every input into owned parameters.
    ///
    /// Registered memory is resolved through `registry`; without one it is refused.
    pub(crate) fn decode(&self, registry: Option<&Registry>) -> Result<Request, ResultCode> {
        let payload = self.payload()?;
        let command_id: u32 = narrow(payload.num)?;
        let types = ParamTypes::from_raw(narrow(payload.types)?)?;

        let mut params = Params::default();
        let mut regions: [Option<Region>; PARAM_COUNT] = Default::default();
        for (i, region) in regions.iter_mut().enumerate() {
            let [a, b, _] = payload.argv[i];
            let slot = &payload.argv[i];
            params[i] = match types.get(i) {
                ParamType::None => Param::None,
                ParamType::ValueInput => Param::ValueInput(Value::new(narrow(a)?, narrow(b)?)),
                ParamType::ValueInout => Param::ValueInout(Value::new(narrow(a)?, narrow(b)?)),
                ParamType::ValueOutput => Param::ValueOutput(Value::default()),
                ParamType::MemrefInput => {
                    Param::MemrefInput(self.memref(slot, registry, region)?)
                }
                ParamType::MemrefOutput => {
                    Param::MemrefOutput(self.memref(slot, registry, region)?)
                }
                ParamType::MemrefInout => {
                    Param::MemrefInout(self.memref(slot, registry, region)?)
                }
            };
        }

        Ok(Request {
            command_id,
            types,
            params,
            argv: payload.argv,
            regions,
        })
    }

    fn memref(
        &self,
        slot: &Slot,
        registry: Option<&Registry>,
        region: &mut Option<Region>,
    ) -> Result<Memref, ResultCode> {
        let [offset, size, shm] = *slot;
        let size: usize = narrow(size)?;

        if shm != NULL {
            let resolved = registry
                .and_then(|registry| registry.resolve(shm))
                .ok_or(ResultCode::BadParameters)?;
            let offset: usize = narrow(offset)?;
            let end = offset.checked_add(size).ok_or(ResultCode::BadParameters)?;
            let bytes = lock(&resolved)
                .get(offset..end)
                .ok_or(ResultCode::BadParameters)?
                .to_vec();
            *region = Some(resolved);
            return Ok(Memref::new(bytes));
        }

        if offset == NULL {
            return Ok(Memref::null(size));
        }

        let offset: usize = narrow(offset)?;
        let end = offset.checked_add(size).ok_or(ResultCode::BadParameters)?;
        let bytes = self.data().get(offset..end).ok_or(ResultCode::BadParameters)?;
        Ok(Memref::new(bytes.to_vec()))
    }

    /// Writes the outcome of a decoded call back into the block.
    ///
    /// The callee may change the contents and sizes of its outputs, but not the kind of a slot,
    /// and never beyond the size the caller declared. Doing so fails the call with
    /// [`ResultCode::BadParameters`] from the framework of `responder`. Returns the outcome
    /// actually written.
    pub(crate) fn respond(
        &mut self,
        request: Request,
        result: Result<(), Error>,
        responder: Responder,
    ) -> Result<(), Error> {
        let Request {
            types,
            params,
            argv,
            regions,
            ..
        } = request;

        let result = match self.commit_outputs(types, &params, &argv, &regions, result.is_ok()) {
            Ok(argv) => {
                for (i, slot) in argv.iter().enumerate() {
                    for (j, word) in slot.iter().enumerate() {
                        write(&mut self.0, ARGV_AT + (i * SLOT_WORDS + j) * WORD, *word);
                    }
                }
                result
            }
            Err(code) => {
                debug!("callee broke the shape of its parameters");
                Err(Error::new(code, responder.framework()))
            }
        };

        match result {
            Ok(()) => self.set_ret(status::SUCCESS, responder.app()),
            Err(error) => self.fail(error),
        }
        result
    }

    fn commit_outputs(
        &mut self,
        types: ParamTypes,
        params: &Params,
        declared: &[Slot; PARAM_COUNT],
        regions: &[Option<Region>; PARAM_COUNT],
        with_data: bool,
    ) -> Result<[Slot; PARAM_COUNT], ResultCode> {
        let mut argv = *declared;

        for (i, param) in params.iter().enumerate() {
            if param.kind() != types.get(i) {
                return Err(ResultCode::BadParameters);
            }

            match param {
                Param::ValueOutput(v) | Param::ValueInout(v) => {
                    argv[i] = [v.a.into(), v.b.into(), 0];
                }
                Param::MemrefOutput(m) | Param::MemrefInout(m) => {
                    let [offset, capacity, _] = declared[i];
                    let size = m.size();
                    if size as u64 > capacity {
                        return Err(ResultCode::BadParameters);
                    }

                    if with_data && size > 0 && offset != NULL {
                        let bytes = m
                            .data()
                            .filter(|bytes| bytes.len() == size)
                            .ok_or(ResultCode::BadParameters)?;
                        let start: usize = narrow(offset)?;
                        let range = start..start + size;
                        match &regions[i] {
                            Some(region) => lock(region)
                                .get_mut(range)
                                .ok_or(ResultCode::BadParameters)?
                                .copy_from_slice(bytes),
                            None => self
                                .data_mut()
                                .get_mut(range)
                                .ok_or(ResultCode::BadParameters)?
                                .copy_from_slice(bytes),
                        }
                    }
                    argv[i][1] = size as u64;
                }
                _ => {}
            }
        }

        Ok(argv)
    }

    /// Fails the call in the block without touching its parameters.
    pub(crate) fn fail(&mut self, error: Error) {
        self.set_ret(status::encode(Err(error.code)), error.origin);
    }

    fn set_ret(&mut self, status: u32, origin: Origin) {
        write(&mut self.0, RET_AT, status.into());
        write(&mut self.0, RET_AT + WORD, origin as _);
    }
}

/// Lays out one memory reference, copying input data of temporary buffers.
fn commit(kind: ParamType, memref: &Memref, data: &mut Vec<u8>) -> Result<Slot, ResultCode> {
    let size = memref.size();
    match memref.buffer() {
        Buffer::Null => Ok([NULL, size as u64, NULL]),

        Buffer::Temp(buffer) => {
            let bytes = buffer.get(..size).ok_or(ResultCode::BadParameters)?;
            let offset = data.len();
            if kind.is_input() {
                data.extend_from_slice(bytes);
            } else {
                data.resize(offset + size, 0);
            }
            data.resize(align_up(data.len()), 0);
            Ok([offset as u64, size as u64, NULL])
        }

        Buffer::Registered { shm, offset } => {
            let mut needed = ShmFlags::empty();
            if kind.is_input() {
                needed |= ShmFlags::INPUT;
            }
            if kind.is_output() {
                needed |= ShmFlags::OUTPUT;
            }
            if !shm.flags().contains(needed) {
                debug!(id = shm.id(), "shared memory flags do not allow this direction");
                return Err(ResultCode::BadParameters);
            }

            let end = offset.checked_add(size).ok_or(ResultCode::BadParameters)?;
            if end > shm.len() {
                return Err(ResultCode::BadParameters);
            }
            Ok([*offset as u64, size as u64, shm.id()])
        }
    }
}
