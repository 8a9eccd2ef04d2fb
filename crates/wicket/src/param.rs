// SPDX-License-Identifier: Apache-2.0

//! Parameter descriptor: four positional, typed parameter slots.
//!
//! The same descriptor is used in both directions. On a forward call the host is the caller and
//! the trusted application the callee, on a reverse call the roles swap.

use crate::shm::SharedMemory;
use crate::status::ResultCode;

use core::fmt;
use core::ops::{Index, IndexMut};

/// Number of parameter slots of every call.
pub const PARAM_COUNT: usize = 4;

/// Type of a single parameter slot.
///
/// *Input* data flows from the caller to the callee, *output* data flows back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParamType {
    #[default]
    None = 0x0,
    ValueInput = 0x1,
    ValueOutput = 0x2,
    ValueInout = 0x3,
    MemrefInput = 0x5,
    MemrefOutput = 0x6,
    MemrefInout = 0x7,
}

impl ParamType {
    #[inline]
    pub const fn is_value(self) -> bool {
        matches!(
            self,
            ParamType::ValueInput | ParamType::ValueOutput | ParamType::ValueInout
        )
    }

    #[inline]
    pub const fn is_memref(self) -> bool {
        matches!(
            self,
            ParamType::MemrefInput | ParamType::MemrefOutput | ParamType::MemrefInout
        )
    }

    /// Whether the slot carries data to the callee.
    #[inline]
    pub const fn is_input(self) -> bool {
        matches!(
            self,
            ParamType::ValueInput
                | ParamType::ValueInout
                | ParamType::MemrefInput
                | ParamType::MemrefInout
        )
    }

    /// Whether the slot carries data back to the caller.
    #[inline]
    pub const fn is_output(self) -> bool {
        matches!(
            self,
            ParamType::ValueOutput
                | ParamType::ValueInout
                | ParamType::MemrefOutput
                | ParamType::MemrefInout
        )
    }
}

impl TryFrom<u8> for ParamType {
    type Error = ResultCode;

    #[inline]
    fn try_from(ty: u8) -> Result<Self, Self::Error> {
        match ty {
            ty if ty == ParamType::None as _ => Ok(ParamType::None),
            ty if ty == ParamType::ValueInput as _ => Ok(ParamType::ValueInput),
            ty if ty == ParamType::ValueOutput as _ => Ok(ParamType::ValueOutput),
            ty if ty == ParamType::ValueInout as _ => Ok(ParamType::ValueInout),
            ty if ty == ParamType::MemrefInput as _ => Ok(ParamType::MemrefInput),
            ty if ty == ParamType::MemrefOutput as _ => Ok(ParamType::MemrefOutput),
            ty if ty == ParamType::MemrefInout as _ => Ok(ParamType::MemrefInout),
            _ => Err(ResultCode::BadParameters),
        }
    }
}

/// Packs four slot types into a 32-bit value, slot `i` occupying bits `8i..8i+8`.
#[inline]
pub const fn encode_types(types: [ParamType; PARAM_COUNT]) -> u32 {
    (types[0] as u32)
        | (types[1] as u32) << 8
        | (types[2] as u32) << 16
        | (types[3] as u32) << 24
}

/// Unpacks a 32-bit value into four slot types.
pub fn decode_types(raw: u32) -> Result<[ParamType; PARAM_COUNT], ResultCode> {
    let mut types = [ParamType::None; PARAM_COUNT];
    for (i, ty) in types.iter_mut().enumerate() {
        *ty = ParamType::try_from((raw >> (8 * i)) as u8)?;
    }
    Ok(types)
}

/// Checks the types a call was made with against the types a command expects.
#[inline]
pub const fn validate(actual: u32, expected: u32) -> bool {
    actual == expected
}

/// Packed, known-valid slot types of a call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ParamTypes(u32);

impl ParamTypes {
    pub const NONE: ParamTypes = ParamTypes(0);

    #[inline]
    pub const fn new(t0: ParamType, t1: ParamType, t2: ParamType, t3: ParamType) -> Self {
        Self(encode_types([t0, t1, t2, t3]))
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Result<Self, ResultCode> {
        decode_types(raw).map(|_| Self(raw))
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Type of slot `index`; slots past the last one are [`ParamType::None`].
    #[inline]
    pub fn get(self, index: usize) -> ParamType {
        if index >= PARAM_COUNT {
            return ParamType::None;
        }
        ParamType::try_from((self.0 >> (8 * index)) as u8).unwrap_or_default()
    }
}

impl From<[ParamType; PARAM_COUNT]> for ParamTypes {
    #[inline]
    fn from(types: [ParamType; PARAM_COUNT]) -> Self {
        Self(encode_types(types))
    }
}

impl fmt::LowerHex for ParamTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A pair of 32-bit integers passed by value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Value {
    pub a: u32,
    pub b: u32,
}

impl Value {
    #[inline]
    pub const fn new(a: u32, b: u32) -> Self {
        Self { a, b }
    }
}

/// Storage behind a [`Memref`].
#[derive(Clone, Debug, Default)]
pub enum Buffer {
    /// No buffer at all. Only the size travels, which lets a callee report the size it needs.
    #[default]
    Null,
    /// Temporary memory, copied into and out of the marshaled block.
    Temp(Vec<u8>),
    /// A window into registered shared memory.
    Registered { shm: SharedMemory, offset: usize },
}

/// Memory reference: a buffer and the number of bytes of it in use.
///
/// A zero-sized reference with a buffer is distinct from a null reference.
#[derive(Clone, Debug, Default)]
pub struct Memref {
    buffer: Buffer,
    size: usize,
}

impl Memref {
    /// References all of `buffer`.
    #[inline]
    pub fn new(buffer: Vec<u8>) -> Self {
        let size = buffer.len();
        Self::with_size(buffer, size)
    }

    /// References `buffer` with a declared size that may differ from its length.
    #[inline]
    pub fn with_size(buffer: Vec<u8>, size: usize) -> Self {
        Self {
            buffer: Buffer::Temp(buffer),
            size,
        }
    }

    #[inline]
    pub fn null(size: usize) -> Self {
        Self {
            buffer: Buffer::Null,
            size,
        }
    }

    /// References `size` bytes of `shm`, starting at `offset`.
    #[inline]
    pub fn registered(shm: &SharedMemory, offset: usize, size: usize) -> Self {
        Self {
            buffer: Buffer::Registered {
                shm: shm.clone(),
                offset,
            },
            size,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self.buffer, Buffer::Null)
    }

    #[inline]
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Largest size the reference can report.
    pub fn capacity(&self) -> usize {
        match &self.buffer {
            Buffer::Null => 0,
            Buffer::Temp(buffer) => buffer.len(),
            Buffer::Registered { shm, offset } => shm.len().saturating_sub(*offset),
        }
    }

    /// Sets the number of bytes in use.
    pub fn set_size(&mut self, size: usize) -> Result<(), ResultCode> {
        if size > self.capacity() {
            return Err(ResultCode::BadParameters);
        }
        self.size = size;
        Ok(())
    }

    /// The bytes in use of a temporary buffer.
    ///
    /// `None` for null references and for registered memory, which is accessed through its
    /// [`SharedMemory`] handle.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.buffer {
            Buffer::Temp(buffer) => Some(&buffer[..self.size.min(buffer.len())]),
            _ => None,
        }
    }

    /// The whole temporary buffer, regardless of the size in use.
    pub fn buffer_mut(&mut self) -> Result<&mut [u8], ResultCode> {
        match &mut self.buffer {
            Buffer::Temp(buffer) => Ok(buffer),
            _ => Err(ResultCode::BadParameters),
        }
    }

    /// Copies `bytes` to the start of the buffer and sets the size to their length.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), ResultCode> {
        let buffer = self.buffer_mut()?;
        let target = buffer
            .get_mut(..bytes.len())
            .ok_or(ResultCode::ShortBuffer)?;
        target.copy_from_slice(bytes);
        self.size = bytes.len();
        Ok(())
    }

    /// Takes the temporary buffer, truncated to the size in use.
    pub fn into_vec(self) -> Option<Vec<u8>> {
        match self.buffer {
            Buffer::Temp(mut buffer) => {
                buffer.truncate(self.size);
                Some(buffer)
            }
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn force_size(&mut self, size: usize) {
        self.size = size;
    }
}

/// A single typed parameter slot.
#[derive(Clone, Debug, Default)]
pub enum Param {
    #[default]
    None,
    ValueInput(Value),
    ValueOutput(Value),
    ValueInout(Value),
    MemrefInput(Memref),
    MemrefOutput(Memref),
    MemrefInout(Memref),
}

impl Param {
    /// Builds an empty slot of type `ty`, as the callee sees it before the inputs are filled in.
    pub(crate) fn empty(ty: ParamType) -> Self {
        match ty {
            ParamType::None => Param::None,
            ParamType::ValueInput => Param::ValueInput(Value::default()),
            ParamType::ValueOutput => Param::ValueOutput(Value::default()),
            ParamType::ValueInout => Param::ValueInout(Value::default()),
            ParamType::MemrefInput => Param::MemrefInput(Memref::default()),
            ParamType::MemrefOutput => Param::MemrefOutput(Memref::default()),
            ParamType::MemrefInout => Param::MemrefInout(Memref::default()),
        }
    }

    pub fn kind(&self) -> ParamType {
        match self {
            Param::None => ParamType::None,
            Param::ValueInput(_) => ParamType::ValueInput,
            Param::ValueOutput(_) => ParamType::ValueOutput,
            Param::ValueInout(_) => ParamType::ValueInout,
            Param::MemrefInput(_) => ParamType::MemrefInput,
            Param::MemrefOutput(_) => ParamType::MemrefOutput,
            Param::MemrefInout(_) => ParamType::MemrefInout,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Param::ValueInput(v) | Param::ValueOutput(v) | Param::ValueInout(v) => Some(v),
            _ => None,
        }
    }

    pub fn value_mut(&mut self) -> Option<&mut Value> {
        match self {
            Param::ValueInput(v) | Param::ValueOutput(v) | Param::ValueInout(v) => Some(v),
            _ => None,
        }
    }

    pub fn memref(&self) -> Option<&Memref> {
        match self {
            Param::MemrefInput(m) | Param::MemrefOutput(m) | Param::MemrefInout(m) => Some(m),
            _ => None,
        }
    }

    pub fn memref_mut(&mut self) -> Option<&mut Memref> {
        match self {
            Param::MemrefInput(m) | Param::MemrefOutput(m) | Param::MemrefInout(m) => Some(m),
            _ => None,
        }
    }
}

/// The four parameter slots of a call.
#[derive(Clone, Debug, Default)]
pub struct Params([Param; PARAM_COUNT]);

impl Params {
    #[inline]
    pub fn new(params: [Param; PARAM_COUNT]) -> Self {
        Self(params)
    }

    /// Types of the slots, as they would be sent.
    pub fn types(&self) -> ParamTypes {
        ParamTypes::from([
            self.0[0].kind(),
            self.0[1].kind(),
            self.0[2].kind(),
            self.0[3].kind(),
        ])
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Param> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, Param> {
        self.0.iter_mut()
    }

    /// The value in slot `index`, [`ResultCode::BadParameters`] if the slot holds no value.
    pub fn value(&self, index: usize) -> Result<&Value, ResultCode> {
        self.0
            .get(index)
            .and_then(Param::value)
            .ok_or(ResultCode::BadParameters)
    }

    pub fn value_mut(&mut self, index: usize) -> Result<&mut Value, ResultCode> {
        self.0
            .get_mut(index)
            .and_then(Param::value_mut)
            .ok_or(ResultCode::BadParameters)
    }

    /// The memory reference in slot `index`, [`ResultCode::BadParameters`] if the slot holds none.
    pub fn memref(&self, index: usize) -> Result<&Memref, ResultCode> {
        self.0
            .get(index)
            .and_then(Param::memref)
            .ok_or(ResultCode::BadParameters)
    }

    pub fn memref_mut(&mut self, index: usize) -> Result<&mut Memref, ResultCode> {
        self.0
            .get_mut(index)
            .and_then(Param::memref_mut)
            .ok_or(ResultCode::BadParameters)
    }
}

impl From<[Param; PARAM_COUNT]> for Params {
    #[inline]
    fn from(params: [Param; PARAM_COUNT]) -> Self {
        Self(params)
    }
}

impl Index<usize> for Params {
    type Output = Param;

    #[inline]
    fn index(&self, index: usize) -> &Param {
        &self.0[index]
    }
}

impl IndexMut<usize> for Params {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Param {
        &mut self.0[index]
    }
}
