//! Encoded operation variables.
//!
//! Variables are encoded once per call from any [`Serialize`] value into a
//! [`VariableValue`] tree. Unlike `serde_json::Value`, the tree has a binary
//! leaf, [`Upload`], so the serializer can tell whether a request must be
//! sent as a multipart upload.

use std::fmt;

use bytes::Bytes;
use serde::ser::{self, Serialize, SerializeStruct, Serializer};
use serde_json::Number;

use crate::error::{ClientError, Result};

/// Struct name that marks an [`Upload`] during serialization.
const UPLOAD_TOKEN: &str = "$gql_client::Upload";

/// Nesting limit for variable trees walked by the serializers.
pub(crate) const MAX_DEPTH: usize = 128;

/// A binary file attached to an operation's variables.
#[derive(Clone, PartialEq, Eq)]
pub struct Upload {
    bytes: Bytes,
    filename: Option<String>,
    content_type: Option<String>,
}

impl Upload {
    /// Wrap raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: None,
            content_type: None,
        }
    }

    /// Set the file name sent with the multipart part.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Set the MIME type sent with the multipart part.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The file contents.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// The file name, if known.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// The MIME type, if known.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("len", &self.bytes.len())
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .finish()
    }
}

struct RawBytes<'a>(&'a [u8]);

impl Serialize for RawBytes<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0)
    }
}

impl Serialize for Upload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct(UPLOAD_TOKEN, 3)?;
        state.serialize_field("bytes", &RawBytes(&self.bytes))?;
        state.serialize_field("filename", &self.filename)?;
        state.serialize_field("content_type", &self.content_type)?;
        state.end()
    }
}

/// An encoded variables tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum VariableValue {
    /// JSON `null`.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(Number),
    /// A string.
    String(String),
    /// A list.
    List(Vec<VariableValue>),
    /// An object. Keys iterate in insertion order.
    Object(VariableMap),
    /// A binary file.
    Upload(Upload),
}

/// The members of a [`VariableValue::Object`], in insertion order.
///
/// Field declaration order is what decides upload discovery order, and so
/// the indices of the multipart `map` part. Equality ignores order.
#[derive(Debug, Clone, Default)]
pub struct VariableMap {
    entries: Vec<(String, VariableValue)>,
}

impl VariableMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a member, replacing an existing one in place.
    pub fn insert(&mut self, key: impl Into<String>, value: VariableValue) -> Option<VariableValue> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Look up a member.
    pub fn get(&self, key: &str) -> Option<&VariableValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Remove a member.
    pub fn remove(&mut self, key: &str) -> Option<VariableValue> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no members.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariableValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &VariableValue> {
        self.entries.iter().map(|(_, v)| v)
    }
}

impl PartialEq for VariableMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Into<String>> FromIterator<(K, VariableValue)> for VariableMap {
    fn from_iter<I: IntoIterator<Item = (K, VariableValue)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl VariableValue {
    /// Whether any leaf of the tree is an [`Upload`].
    pub fn has_upload(&self) -> bool {
        match self {
            Self::Upload(_) => true,
            Self::List(items) => items.iter().any(Self::has_upload),
            Self::Object(map) => map.values().any(Self::has_upload),
            _ => false,
        }
    }

    /// The dotted path of the first upload, in discovery order.
    pub fn first_upload_path(&self) -> Option<String> {
        match self {
            Self::Upload(_) => Some(String::new()),
            Self::List(items) => items.iter().enumerate().find_map(|(index, item)| {
                item.first_upload_path().map(|rest| join_path(&index.to_string(), &rest))
            }),
            Self::Object(map) => map.iter().find_map(|(key, value)| {
                value.first_upload_path().map(|rest| join_path(key, &rest))
            }),
            _ => None,
        }
    }

    /// Look up a direct child of an object.
    pub fn get(&self, key: &str) -> Option<&VariableValue> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }
}

fn join_path(head: &str, rest: &str) -> String {
    if rest.is_empty() {
        head.to_owned()
    } else {
        format!("{head}.{rest}")
    }
}

impl Serialize for VariableValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => serializer.collect_seq(items),
            Self::Object(map) => serializer.collect_map(map.iter()),
            Self::Upload(upload) => upload.serialize(serializer),
        }
    }
}

impl From<serde_json::Value> for VariableValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<Upload> for VariableValue {
    fn from(upload: Upload) -> Self {
        Self::Upload(upload)
    }
}

/// Encode a value into a [`VariableValue`] tree.
///
/// [`Upload`] fields, and any field serialized as raw bytes, become upload
/// leaves. Failures are reported as [`ClientError::Serialization`].
pub fn to_variables<T: Serialize + ?Sized>(value: &T) -> Result<VariableValue> {
    value
        .serialize(VariableSerializer)
        .map_err(|e| ClientError::Serialization(e.0))
}

#[derive(Debug)]
pub(crate) struct EncodeError(String);

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for EncodeError {}

impl ser::Error for EncodeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

type EncodeResult = std::result::Result<VariableValue, EncodeError>;

struct VariableSerializer;

impl Serializer for VariableSerializer {
    type Ok = VariableValue;
    type Error = EncodeError;
    type SerializeSeq = ListEncoder;
    type SerializeTuple = ListEncoder;
    type SerializeTupleStruct = ListEncoder;
    type SerializeTupleVariant = VariantEncoder<ListEncoder>;
    type SerializeMap = MapEncoder;
    type SerializeStruct = StructEncoder;
    type SerializeStructVariant = VariantEncoder<StructEncoder>;

    fn serialize_bool(self, v: bool) -> EncodeResult {
        Ok(VariableValue::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> EncodeResult {
        Ok(VariableValue::Number(v.into()))
    }

    fn serialize_i16(self, v: i16) -> EncodeResult {
        Ok(VariableValue::Number(v.into()))
    }

    fn serialize_i32(self, v: i32) -> EncodeResult {
        Ok(VariableValue::Number(v.into()))
    }

    fn serialize_i64(self, v: i64) -> EncodeResult {
        Ok(VariableValue::Number(v.into()))
    }

    fn serialize_u8(self, v: u8) -> EncodeResult {
        Ok(VariableValue::Number(v.into()))
    }

    fn serialize_u16(self, v: u16) -> EncodeResult {
        Ok(VariableValue::Number(v.into()))
    }

    fn serialize_u32(self, v: u32) -> EncodeResult {
        Ok(VariableValue::Number(v.into()))
    }

    fn serialize_u64(self, v: u64) -> EncodeResult {
        Ok(VariableValue::Number(v.into()))
    }

    fn serialize_f32(self, v: f32) -> EncodeResult {
        self.serialize_f64(f64::from(v))
    }

    // Non-finite floats have no JSON form.
    fn serialize_f64(self, v: f64) -> EncodeResult {
        Ok(Number::from_f64(v).map_or(VariableValue::Null, VariableValue::Number))
    }

    fn serialize_char(self, v: char) -> EncodeResult {
        Ok(VariableValue::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> EncodeResult {
        Ok(VariableValue::String(v.to_owned()))
    }

    fn serialize_bytes(self, v: &[u8]) -> EncodeResult {
        Ok(VariableValue::Upload(Upload::new(Bytes::copy_from_slice(v))))
    }

    fn serialize_none(self) -> EncodeResult {
        Ok(VariableValue::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> EncodeResult {
        value.serialize(self)
    }

    fn serialize_unit(self) -> EncodeResult {
        Ok(VariableValue::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> EncodeResult {
        Ok(VariableValue::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> EncodeResult {
        Ok(VariableValue::String(variant.to_owned()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> EncodeResult {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> EncodeResult {
        let mut map = VariableMap::new();
        map.insert(variant, value.serialize(VariableSerializer)?);
        Ok(VariableValue::Object(map))
    }

    fn serialize_seq(self, len: Option<usize>) -> std::result::Result<ListEncoder, EncodeError> {
        Ok(ListEncoder {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> std::result::Result<ListEncoder, EncodeError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> std::result::Result<ListEncoder, EncodeError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> std::result::Result<VariantEncoder<ListEncoder>, EncodeError> {
        Ok(VariantEncoder {
            variant,
            inner: ListEncoder {
                items: Vec::with_capacity(len),
            },
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> std::result::Result<MapEncoder, EncodeError> {
        Ok(MapEncoder {
            map: VariableMap::new(),
            next_key: None,
        })
    }

    fn serialize_struct(
        self,
        name: &'static str,
        _len: usize,
    ) -> std::result::Result<StructEncoder, EncodeError> {
        Ok(StructEncoder {
            upload: name == UPLOAD_TOKEN,
            map: VariableMap::new(),
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> std::result::Result<VariantEncoder<StructEncoder>, EncodeError> {
        Ok(VariantEncoder {
            variant,
            inner: StructEncoder {
                upload: false,
                map: VariableMap::new(),
            },
        })
    }
}

struct ListEncoder {
    items: Vec<VariableValue>,
}

impl ser::SerializeSeq for ListEncoder {
    type Ok = VariableValue;
    type Error = EncodeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> std::result::Result<(), EncodeError> {
        self.items.push(value.serialize(VariableSerializer)?);
        Ok(())
    }

    fn end(self) -> EncodeResult {
        Ok(VariableValue::List(self.items))
    }
}

impl ser::SerializeTuple for ListEncoder {
    type Ok = VariableValue;
    type Error = EncodeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> std::result::Result<(), EncodeError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> EncodeResult {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for ListEncoder {
    type Ok = VariableValue;
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> std::result::Result<(), EncodeError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> EncodeResult {
        ser::SerializeSeq::end(self)
    }
}

struct MapEncoder {
    map: VariableMap,
    next_key: Option<String>,
}

impl ser::SerializeMap for MapEncoder {
    type Ok = VariableValue;
    type Error = EncodeError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> std::result::Result<(), EncodeError> {
        let key = match key.serialize(VariableSerializer)? {
            VariableValue::String(s) => s,
            VariableValue::Number(n) => n.to_string(),
            VariableValue::Bool(b) => b.to_string(),
            other => {
                return Err(EncodeError(format!(
                    "map keys must be strings or numbers, got {other:?}"
                )));
            }
        };
        self.next_key = Some(key);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> std::result::Result<(), EncodeError> {
        let key = self
            .next_key
            .take()
            .ok_or_else(|| EncodeError("map value serialized before its key".into()))?;
        self.map.insert(key, value.serialize(VariableSerializer)?);
        Ok(())
    }

    fn end(self) -> EncodeResult {
        Ok(VariableValue::Object(self.map))
    }
}

struct StructEncoder {
    upload: bool,
    map: VariableMap,
}

impl StructEncoder {
    fn into_upload(mut self) -> EncodeResult {
        let Some(VariableValue::Upload(mut upload)) = self.map.remove("bytes") else {
            return Err(EncodeError("upload is missing its bytes".into()));
        };
        if let Some(VariableValue::String(filename)) = self.map.remove("filename") {
            upload.filename = Some(filename);
        }
        if let Some(VariableValue::String(content_type)) = self.map.remove("content_type") {
            upload.content_type = Some(content_type);
        }
        Ok(VariableValue::Upload(upload))
    }
}

impl ser::SerializeStruct for StructEncoder {
    type Ok = VariableValue;
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> std::result::Result<(), EncodeError> {
        self.map.insert(key, value.serialize(VariableSerializer)?);
        Ok(())
    }

    fn end(self) -> EncodeResult {
        if self.upload {
            self.into_upload()
        } else {
            Ok(VariableValue::Object(self.map))
        }
    }
}

struct VariantEncoder<E> {
    variant: &'static str,
    inner: E,
}

impl<E> VariantEncoder<E> {
    fn wrap(variant: &'static str, value: VariableValue) -> EncodeResult {
        let mut map = VariableMap::new();
        map.insert(variant, value);
        Ok(VariableValue::Object(map))
    }
}

impl ser::SerializeTupleVariant for VariantEncoder<ListEncoder> {
    type Ok = VariableValue;
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> std::result::Result<(), EncodeError> {
        ser::SerializeSeq::serialize_element(&mut self.inner, value)
    }

    fn end(self) -> EncodeResult {
        Self::wrap(self.variant, ser::SerializeSeq::end(self.inner)?)
    }
}

impl ser::SerializeStructVariant for VariantEncoder<StructEncoder> {
    type Ok = VariableValue;
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> std::result::Result<(), EncodeError> {
        ser::SerializeStruct::serialize_field(&mut self.inner, key, value)
    }

    fn end(self) -> EncodeResult {
        Self::wrap(self.variant, ser::SerializeStruct::end(self.inner)?)
    }
}
