use std::fmt;
use std::str::FromStr;

use serde::{
    de::DeserializeOwned,
    ser::{self, Impossible},
    Serialize, Serializer,
};

use crate::error::{Result, StoreError};

/// Value encodings understood by the store.
///
/// Every stored value starts with a one-byte tag naming the codec that wrote it, so a store can
/// switch codecs for new writes and still read what it wrote before.
///
/// Json is self-describing: asking for a different shape than the one stored fails with
/// `StoreError::Decode`. Bincode is compact but only catches mismatches that change the byte
/// layout, so it is meant for types the caller controls on both ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Codec {
    #[default]
    Json,
    Bincode,
}

impl Codec {
    const JSON_TAG: u8 = 1;
    const BINCODE_TAG: u8 = 2;

    pub fn tag(&self) -> u8 {
        match self {
            Codec::Json => Self::JSON_TAG,
            Codec::Bincode => Self::BINCODE_TAG,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            Self::JSON_TAG => Some(Codec::Json),
            Self::BINCODE_TAG => Some(Codec::Bincode),
            _ => None,
        }
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let mut buf = vec![self.tag()];
        match self {
            Codec::Json => serde_json::to_writer(&mut buf, value)
                .map_err(|e| StoreError::Encode(e.to_string()))?,
            Codec::Bincode => {
                let encoded = bincode::serde::encode_to_vec(value, bincode::config::standard())
                    .map_err(|e| StoreError::Encode(e.to_string()))?;
                buf.extend(encoded);
            }
        }
        Ok(buf)
    }

    /// Decode a tagged value, dispatching on the tag it was written with.
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        let (tag, payload) = bytes
            .split_first()
            .ok_or_else(|| StoreError::Decode("empty value".to_owned()))?;

        match Self::from_tag(*tag) {
            Some(Codec::Json) => {
                serde_json::from_slice(payload).map_err(|e| StoreError::Decode(e.to_string()))
            }
            Some(Codec::Bincode) => {
                let (value, read) =
                    bincode::serde::decode_from_slice(payload, bincode::config::standard())
                        .map_err(|e| StoreError::Decode(e.to_string()))?;
                if read != payload.len() {
                    return Err(StoreError::Decode(format!(
                        "{} trailing bytes after value",
                        payload.len() - read
                    )));
                }
                Ok(value)
            }
            None => Err(StoreError::Decode(format!("unknown codec tag {tag}"))),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Json => write!(f, "json"),
            Codec::Bincode => write!(f, "bincode"),
        }
    }
}

impl FromStr for Codec {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            "bincode" => Ok(Codec::Bincode),
            invalid => Err(StoreError::UnknownCodec(invalid.to_owned())),
        }
    }
}

/// True when `value` has no content of its own: `None`, `()` and unit structs.
///
/// Only the top level is inspected, so `Some(None)` or a NaN float count as present.
pub fn is_absent<T: Serialize + ?Sized>(value: &T) -> bool {
    value.serialize(AbsenceCheck).is_ok()
}

// Succeeds only for absent values and gives up at the first call that carries content.
struct AbsenceCheck;

#[derive(Debug)]
struct Present;

impl fmt::Display for Present {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("value is present")
    }
}

impl std::error::Error for Present {}

impl ser::Error for Present {
    fn custom<T: fmt::Display>(_msg: T) -> Self {
        Present
    }
}

type Check = std::result::Result<(), Present>;

impl Serializer for AbsenceCheck {
    type Ok = ();
    type Error = Present;
    type SerializeSeq = Impossible<(), Present>;
    type SerializeTuple = Impossible<(), Present>;
    type SerializeTupleStruct = Impossible<(), Present>;
    type SerializeTupleVariant = Impossible<(), Present>;
    type SerializeMap = Impossible<(), Present>;
    type SerializeStruct = Impossible<(), Present>;
    type SerializeStructVariant = Impossible<(), Present>;

    fn serialize_none(self) -> Check {
        Ok(())
    }

    fn serialize_unit(self) -> Check {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Check {
        Ok(())
    }

    fn serialize_bool(self, _v: bool) -> Check {
        Err(Present)
    }

    fn serialize_i8(self, _v: i8) -> Check {
        Err(Present)
    }

    fn serialize_i16(self, _v: i16) -> Check {
        Err(Present)
    }

    fn serialize_i32(self, _v: i32) -> Check {
        Err(Present)
    }

    fn serialize_i64(self, _v: i64) -> Check {
        Err(Present)
    }

    fn serialize_i128(self, _v: i128) -> Check {
        Err(Present)
    }

    fn serialize_u8(self, _v: u8) -> Check {
        Err(Present)
    }

    fn serialize_u16(self, _v: u16) -> Check {
        Err(Present)
    }

    fn serialize_u32(self, _v: u32) -> Check {
        Err(Present)
    }

    fn serialize_u64(self, _v: u64) -> Check {
        Err(Present)
    }

    fn serialize_u128(self, _v: u128) -> Check {
        Err(Present)
    }

    fn serialize_f32(self, _v: f32) -> Check {
        Err(Present)
    }

    fn serialize_f64(self, _v: f64) -> Check {
        Err(Present)
    }

    fn serialize_char(self, _v: char) -> Check {
        Err(Present)
    }

    fn serialize_str(self, _v: &str) -> Check {
        Err(Present)
    }

    fn serialize_bytes(self, _v: &[u8]) -> Check {
        Err(Present)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, _value: &T) -> Check {
        Err(Present)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Check {
        Err(Present)
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _value: &T,
    ) -> Check {
        Err(Present)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Check {
        Err(Present)
    }

    fn serialize_seq(self, _len: Option<usize>) -> std::result::Result<Self::SerializeSeq, Present> {
        Err(Present)
    }

    fn serialize_tuple(self, _len: usize) -> std::result::Result<Self::SerializeTuple, Present> {
        Err(Present)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTupleStruct, Present> {
        Err(Present)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeTupleVariant, Present> {
        Err(Present)
    }

    fn serialize_map(self, _len: Option<usize>) -> std::result::Result<Self::SerializeMap, Present> {
        Err(Present)
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeStruct, Present> {
        Err(Present)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> std::result::Result<Self::SerializeStructVariant, Present> {
        Err(Present)
    }
}
