//! Binary wire codec, byte-compatible with the packers of the generated
//! program.
//!
//! Layout (little endian): `int`/`float` 4 bytes, `double` 8, `bool` 1,
//! sizes and lengths 8. A string is its length followed by its bytes, a
//! tuple its fields in order, an array its element count followed by the
//! elements. Direct-transport extern values are copied raw; custom ones go
//! through a registered [`ExternCodec`].

use std::collections::BTreeMap;
use std::sync::Arc;

use petra_types::{Project, TransportMode, Type};

use crate::error::{EvalError, EvalResult};
use crate::value::Value;

const SIZE_WIDTH: usize = 8;

// ══════════════════════════════════════════════════════════════════════════════
// Packer / Unpacker
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct Packer {
    buf: Vec<u8>,
}

impl Packer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(size),
        }
    }

    pub fn pack_int(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn pack_float(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn pack_double(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn pack_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn pack_size(&mut self, v: usize) {
        self.buf.extend_from_slice(&(v as u64).to_le_bytes());
    }

    pub fn pack_string(&mut self, v: &str) {
        self.pack_size(v.len());
        self.buf.extend_from_slice(v.as_bytes());
    }

    pub fn pack_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug)]
pub struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Take the next `n` bytes.
    pub fn unpack_raw(&mut self, n: usize) -> EvalResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                EvalError::Decode(format!(
                    "need {n} bytes at offset {}, {} left",
                    self.pos,
                    self.remaining()
                ))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> EvalResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.unpack_raw(N)?);
        Ok(out)
    }

    pub fn unpack_int(&mut self) -> EvalResult<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn unpack_float(&mut self) -> EvalResult<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub fn unpack_double(&mut self) -> EvalResult<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    pub fn unpack_bool(&mut self) -> EvalResult<bool> {
        Ok(self.array::<1>()?[0] != 0)
    }

    pub fn unpack_size(&mut self) -> EvalResult<usize> {
        let size = u64::from_le_bytes(self.array()?);
        usize::try_from(size).map_err(|_| EvalError::Decode(format!("size {size} out of range")))
    }

    pub fn unpack_string(&mut self) -> EvalResult<String> {
        let len = self.unpack_size()?;
        let bytes = self.unpack_raw(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| EvalError::Decode(format!("string is not UTF-8: {e}")))
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Extern codecs
// ══════════════════════════════════════════════════════════════════════════════

/// Wire form of a custom-transport extern type, the counterpart of its
/// `getsize`/`pack`/`unpack` bodies.
pub trait ExternCodec: Send + Sync {
    fn size(&self, data: &[u8]) -> usize;
    fn pack(&self, data: &[u8], packer: &mut Packer);
    fn unpack(&self, unpacker: &mut Unpacker<'_>) -> EvalResult<Vec<u8>>;
}

/// Custom codecs by extern type name.
pub type ExternCodecs = BTreeMap<String, Arc<dyn ExternCodec>>;

// ══════════════════════════════════════════════════════════════════════════════
// Typed codec
// ══════════════════════════════════════════════════════════════════════════════

/// Sizes, packs and unpacks values by their model type.
pub struct WireCodec<'a> {
    project: &'a Project,
    custom: &'a ExternCodecs,
}

impl<'a> WireCodec<'a> {
    pub fn new(project: &'a Project, custom: &'a ExternCodecs) -> Self {
        Self { project, custom }
    }

    fn extern_mode(&self, name: &str) -> EvalResult<(TransportMode, Option<u32>)> {
        let ext = self.project.extern_type(name)?;
        Ok((ext.transport, ext.raw_size))
    }

    fn custom(&self, name: &str) -> EvalResult<&'a Arc<dyn ExternCodec>> {
        self.custom
            .get(name)
            .ok_or_else(|| EvalError::UnknownFunction(format!("codec of extern type '{name}'")))
    }

    /// Number of bytes `pack` appends for `value`.
    pub fn size_of(&self, value: &Value, ty: &Type) -> EvalResult<usize> {
        Ok(match (value, ty) {
            (Value::Int(_), Type::Int) | (Value::Float(_), Type::Float) => 4,
            (Value::Double(_), Type::Double) => 8,
            (Value::Bool(_), Type::Bool) => 1,
            (Value::Str(s), Type::String) => SIZE_WIDTH + s.len(),
            (Value::Tuple(items), Type::Product(fields)) if items.len() == fields.len() => {
                let mut size = 0;
                for (item, field) in items.iter().zip(fields) {
                    size += self.size_of(item, &field.ty)?;
                }
                size
            }
            (Value::Array(items), Type::Sequence(inner)) => {
                let mut size = SIZE_WIDTH;
                for item in items {
                    size += self.size_of(item, inner)?;
                }
                size
            }
            (Value::Extern { data, .. }, Type::Extern(name)) => match self.extern_mode(name)? {
                (TransportMode::Disabled, _) => {
                    return Err(EvalError::TransportDisabled(name.clone()))
                }
                (TransportMode::Direct, raw_size) => direct_width(name, raw_size)?,
                (TransportMode::Custom, _) => self.custom(name)?.size(data),
            },
            _ => return Err(mismatch(value, ty)),
        })
    }

    pub fn pack(&self, value: &Value, ty: &Type, packer: &mut Packer) -> EvalResult<()> {
        match (value, ty) {
            (Value::Int(v), Type::Int) => packer.pack_int(*v),
            (Value::Float(v), Type::Float) => packer.pack_float(*v),
            (Value::Double(v), Type::Double) => packer.pack_double(*v),
            (Value::Bool(v), Type::Bool) => packer.pack_bool(*v),
            (Value::Str(v), Type::String) => packer.pack_string(v),
            (Value::Tuple(items), Type::Product(fields)) if items.len() == fields.len() => {
                for (item, field) in items.iter().zip(fields) {
                    self.pack(item, &field.ty, packer)?;
                }
            }
            (Value::Array(items), Type::Sequence(inner)) => {
                packer.pack_size(items.len());
                for item in items {
                    self.pack(item, inner, packer)?;
                }
            }
            (Value::Extern { data, .. }, Type::Extern(name)) => match self.extern_mode(name)? {
                (TransportMode::Disabled, _) => {
                    return Err(EvalError::TransportDisabled(name.clone()))
                }
                (TransportMode::Direct, raw_size) => {
                    let width = direct_width(name, raw_size)?;
                    if data.len() != width {
                        return Err(EvalError::TypeMismatch(format!(
                            "'{name}' value has {} bytes, expected {width}",
                            data.len()
                        )));
                    }
                    packer.pack_raw(data);
                }
                (TransportMode::Custom, _) => self.custom(name)?.pack(data, packer),
            },
            _ => return Err(mismatch(value, ty)),
        }
        Ok(())
    }

    pub fn unpack(&self, ty: &Type, unpacker: &mut Unpacker<'_>) -> EvalResult<Value> {
        Ok(match ty {
            Type::Int => Value::Int(unpacker.unpack_int()?),
            Type::Float => Value::Float(unpacker.unpack_float()?),
            Type::Double => Value::Double(unpacker.unpack_double()?),
            Type::Bool => Value::Bool(unpacker.unpack_bool()?),
            Type::String => Value::Str(unpacker.unpack_string()?),
            Type::Product(fields) => {
                let mut items = Vec::with_capacity(fields.len());
                for field in fields {
                    items.push(self.unpack(&field.ty, unpacker)?);
                }
                Value::Tuple(items)
            }
            Type::Sequence(inner) => {
                let count = unpacker.unpack_size()?;
                let width = self.min_width(inner);
                if width > 0 && count.saturating_mul(width) > unpacker.remaining() {
                    return Err(EvalError::Decode(format!(
                        "array of {count} elements in {} bytes",
                        unpacker.remaining()
                    )));
                }
                let mut items = Vec::with_capacity(count.min(unpacker.remaining()));
                for _ in 0..count {
                    items.push(self.unpack(inner, unpacker)?);
                }
                Value::Array(items)
            }
            Type::Extern(name) => {
                let data = match self.extern_mode(name)? {
                    (TransportMode::Disabled, _) => {
                        return Err(EvalError::TransportDisabled(name.clone()))
                    }
                    (TransportMode::Direct, raw_size) => {
                        unpacker.unpack_raw(direct_width(name, raw_size)?)?.to_vec()
                    }
                    (TransportMode::Custom, _) => self.custom(name)?.unpack(unpacker)?,
                };
                Value::Extern {
                    type_name: name.clone(),
                    data,
                }
            }
        })
    }

    /// Fewest bytes any value of `ty` takes on the wire. Zero for empty
    /// products and for types whose width cannot be known up front.
    fn min_width(&self, ty: &Type) -> usize {
        match ty {
            Type::Int | Type::Float => 4,
            Type::Double => 8,
            Type::Bool => 1,
            Type::String | Type::Sequence(_) => SIZE_WIDTH,
            Type::Product(fields) => fields.iter().map(|f| self.min_width(&f.ty)).sum(),
            Type::Extern(name) => match self.extern_mode(name) {
                Ok((TransportMode::Direct, Some(size))) => size as usize,
                _ => 0,
            },
        }
    }

    /// `value` in wire form, sized exactly.
    pub fn encode(&self, value: &Value, ty: &Type) -> EvalResult<Vec<u8>> {
        let mut packer = Packer::with_capacity(self.size_of(value, ty)?);
        self.pack(value, ty, &mut packer)?;
        Ok(packer.into_bytes())
    }
}

fn direct_width(name: &str, raw_size: Option<u32>) -> EvalResult<usize> {
    raw_size
        .map(|size| size as usize)
        .ok_or_else(|| EvalError::TypeMismatch(format!("direct transport of '{name}' needs a raw size")))
}

fn mismatch(value: &Value, ty: &Type) -> EvalError {
    EvalError::TypeMismatch(format!("{} value where {ty} was expected", value.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use petra_types::{ExternCode, ExternType};

    fn project(extern_types: Vec<ExternType>) -> Project {
        Project {
            name: "p".into(),
            description: String::new(),
            nets: Vec::new(),
            parameters: Vec::new(),
            extern_types,
            functions: Vec::new(),
        }
    }

    fn ext(name: &str, transport: TransportMode, raw_size: Option<u32>) -> ExternType {
        ExternType {
            id: 1,
            name: name.into(),
            raw_type: name.to_lowercase(),
            transport,
            raw_size,
            code: ExternCode::default(),
        }
    }

    /// Length-prefixed bytes.
    struct Blob;

    impl ExternCodec for Blob {
        fn size(&self, data: &[u8]) -> usize {
            SIZE_WIDTH + data.len()
        }

        fn pack(&self, data: &[u8], packer: &mut Packer) {
            packer.pack_size(data.len());
            packer.pack_raw(data);
        }

        fn unpack(&self, unpacker: &mut Unpacker<'_>) -> EvalResult<Vec<u8>> {
            let len = unpacker.unpack_size()?;
            Ok(unpacker.unpack_raw(len)?.to_vec())
        }
    }

    fn round_trip(codec: &WireCodec<'_>, value: Value, ty: Type) {
        let bytes = codec.encode(&value, &ty).unwrap();
        assert_eq!(bytes.len(), codec.size_of(&value, &ty).unwrap());
        let mut unpacker = Unpacker::new(&bytes);
        assert_eq!(codec.unpack(&ty, &mut unpacker).unwrap(), value);
        assert_eq!(unpacker.remaining(), 0);
    }

    #[test]
    fn test_layout_of_primitives() {
        let project = project(Vec::new());
        let custom = ExternCodecs::new();
        let codec = WireCodec::new(&project, &custom);
        let bytes = codec
            .encode(
                &Value::Tuple(vec![Value::Int(1), Value::Str("ab".into()), Value::Bool(true)]),
                &Type::tuple([Type::Int, Type::String, Type::Bool]),
            )
            .unwrap();
        assert_eq!(
            bytes,
            vec![1, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, b'a', b'b', 1]
        );
    }

    #[test]
    fn test_size_matches_packed_length() {
        let handle = ext("Handle", TransportMode::Direct, Some(4));
        let blob = ext("Blob", TransportMode::Custom, None);
        let project = project(vec![handle, blob]);
        let mut custom = ExternCodecs::new();
        custom.insert("Blob".into(), Arc::new(Blob));
        let codec = WireCodec::new(&project, &custom);

        round_trip(&codec, Value::Double(-2.5), Type::Double);
        round_trip(&codec, Value::Float(0.25), Type::Float);
        round_trip(
            &codec,
            Value::Array(vec![
                Value::Tuple(vec![Value::Int(-7), Value::Str(String::new())]),
                Value::Tuple(vec![Value::Int(i32::MAX), Value::Str("xyz".into())]),
            ]),
            Type::array(Type::tuple([Type::Int, Type::String])),
        );
        round_trip(
            &codec,
            Value::Extern {
                type_name: "Handle".into(),
                data: vec![9, 8, 7, 6],
            },
            Type::Extern("Handle".into()),
        );
        round_trip(
            &codec,
            Value::Array(vec![Value::Extern {
                type_name: "Blob".into(),
                data: b"payload".to_vec(),
            }]),
            Type::array(Type::Extern("Blob".into())),
        );
    }

    #[test]
    fn test_zero_width_elements_round_trip() {
        let empty = ext("Unit", TransportMode::Direct, Some(0));
        let project = project(vec![empty]);
        let custom = ExternCodecs::new();
        let codec = WireCodec::new(&project, &custom);

        round_trip(
            &codec,
            Value::Array(vec![Value::Tuple(Vec::new()); 3]),
            Type::array(Type::tuple([])),
        );
        round_trip(
            &codec,
            Value::Array(vec![
                Value::Extern {
                    type_name: "Unit".into(),
                    data: Vec::new(),
                };
                2
            ]),
            Type::array(Type::Extern("Unit".into())),
        );
    }

    #[test]
    fn test_oversized_array_count_is_a_decode_error() {
        let project = project(Vec::new());
        let custom = ExternCodecs::new();
        let codec = WireCodec::new(&project, &custom);
        let mut unpacker = Unpacker::new(&[3, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0]);
        assert!(matches!(
            codec.unpack(&Type::array(Type::Int), &mut unpacker),
            Err(EvalError::Decode(_))
        ));
    }

    #[test]
    fn test_disabled_extern_is_rejected() {
        let project = project(vec![ext("File", TransportMode::Disabled, None)]);
        let custom = ExternCodecs::new();
        let codec = WireCodec::new(&project, &custom);
        let value = Value::Tuple(vec![Value::Extern {
            type_name: "File".into(),
            data: Vec::new(),
        }]);
        let ty = Type::tuple([Type::Extern("File".into())]);
        assert_eq!(
            codec.encode(&value, &ty),
            Err(EvalError::TransportDisabled("File".into()))
        );
        let mut unpacker = Unpacker::new(&[]);
        assert_eq!(
            codec.unpack(&ty, &mut unpacker),
            Err(EvalError::TransportDisabled("File".into()))
        );
    }

    #[test]
    fn test_truncated_input_is_a_decode_error() {
        let project = project(Vec::new());
        let custom = ExternCodecs::new();
        let codec = WireCodec::new(&project, &custom);
        let mut unpacker = Unpacker::new(&[5, 0, 0, 0, 0, 0, 0, 0, b'a']);
        assert!(matches!(
            codec.unpack(&Type::String, &mut unpacker),
            Err(EvalError::Decode(_))
        ));
    }
}
