//! Reflective view of command results.
//!
//! Any `Serialize` value is lowered into a [`Node`] tree that keeps field
//! declaration order, which is all the renderers need to lay out tables and
//! templates without per-type code.

use serde::{
    Serialize,
    ser::{self, Impossible},
};

use crate::{cli::error::ExoError, output::units::BYTE_SIZE_MARKER};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    /// A byte count, rendered with binary prefixes in tables.
    Bytes(u64),
    List(Vec<Node>),
    /// Struct fields in declaration order.
    Record(Vec<(String, Node)>),
    /// Map entries in insertion order.
    Map(Vec<(String, Node)>),
}

impl Node {
    pub(crate) fn from_value<T: Serialize + ?Sized>(value: &T) -> Result<Node, ExoError> {
        value.serialize(NodeSerializer)
    }

    /// Field names of a record, or of the first element of a list of records.
    pub(crate) fn field_names(&self) -> Vec<String> {
        match self {
            Node::Record(fields) => fields.iter().map(|(name, _)| name.clone()).collect(),
            Node::List(items) => items.first().map(Node::field_names).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn field(&self, name: &str) -> Option<&Node> {
        match self {
            Node::Record(fields) | Node::Map(fields) => fields
                .iter()
                .find_map(|(key, value)| (key == name).then_some(value)),
            _ => None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Node::Null => true,
            Node::List(items) => items.is_empty(),
            Node::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }

    /// The value as it appears in tab-separated text output.
    pub(crate) fn plain(&self) -> String {
        match self {
            Node::Null => String::new(),
            Node::Bool(b) => b.to_string(),
            Node::Int(i) => i.to_string(),
            Node::UInt(u) | Node::Bytes(u) => u.to_string(),
            Node::Float(f) => f.to_string(),
            Node::Str(s) => s.clone(),
            Node::List(items) => items.iter().map(Node::plain).collect::<Vec<_>>().join(","),
            Node::Record(fields) | Node::Map(fields) => fields
                .iter()
                .map(|(key, value)| format!("{key}:{}", value.plain()))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Int(i) => Value::from(*i),
            Node::UInt(u) | Node::Bytes(u) => Value::from(*u),
            Node::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Node::Str(s) => Value::String(s.clone()),
            Node::List(items) => Value::Array(items.iter().map(Node::to_json).collect()),
            Node::Record(fields) | Node::Map(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Ordered output names of `value`'s fields.
pub(crate) fn field_names<T: Serialize + ?Sized>(value: &T) -> Result<Vec<String>, ExoError> {
    Ok(Node::from_value(value)?.field_names())
}

/// Ordered output names of a record type, sampled from its default value.
pub(crate) fn field_names_of<T: Serialize + Default>() -> Result<Vec<String>, ExoError> {
    field_names(&T::default())
}

struct NodeSerializer;

impl ser::Serializer for NodeSerializer {
    type Ok = Node;
    type Error = ExoError;

    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = VariantBuilder<SeqBuilder>;
    type SerializeMap = MapBuilder;
    type SerializeStruct = RecordBuilder;
    type SerializeStructVariant = VariantBuilder<RecordBuilder>;

    fn serialize_bool(self, v: bool) -> Result<Node, ExoError> {
        Ok(Node::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Node, ExoError> {
        Ok(Node::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<Node, ExoError> {
        Ok(Node::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<Node, ExoError> {
        Ok(Node::Int(v.into()))
    }

    fn serialize_i64(self, v: i64) -> Result<Node, ExoError> {
        Ok(Node::Int(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Node, ExoError> {
        Ok(Node::UInt(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<Node, ExoError> {
        Ok(Node::UInt(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<Node, ExoError> {
        Ok(Node::UInt(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<Node, ExoError> {
        Ok(Node::UInt(v))
    }

    fn serialize_f32(self, v: f32) -> Result<Node, ExoError> {
        Ok(Node::Float(v.into()))
    }

    fn serialize_f64(self, v: f64) -> Result<Node, ExoError> {
        Ok(Node::Float(v))
    }

    fn serialize_char(self, v: char) -> Result<Node, ExoError> {
        Ok(Node::Str(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Node, ExoError> {
        Ok(Node::Str(v.to_owned()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Node, ExoError> {
        Ok(Node::List(v.iter().map(|b| Node::UInt((*b).into())).collect()))
    }

    fn serialize_none(self) -> Result<Node, ExoError> {
        Ok(Node::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Node, ExoError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Node, ExoError> {
        Ok(Node::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Node, ExoError> {
        Ok(Node::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Node, ExoError> {
        Ok(Node::Str(variant.to_owned()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<Node, ExoError> {
        let inner = value.serialize(NodeSerializer)?;
        if name != BYTE_SIZE_MARKER {
            return Ok(inner);
        }

        match inner {
            Node::UInt(n) => Ok(Node::Bytes(n)),
            Node::Int(n) if n >= 0 => Ok(Node::Bytes(n.unsigned_abs())),
            other => Ok(other),
        }
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Node, ExoError> {
        Ok(Node::Record(vec![(
            variant.to_owned(),
            value.serialize(NodeSerializer)?,
        )]))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqBuilder, ExoError> {
        Ok(SeqBuilder(Vec::with_capacity(len.unwrap_or_default())))
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqBuilder, ExoError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqBuilder, ExoError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantBuilder<SeqBuilder>, ExoError> {
        Ok(VariantBuilder {
            variant,
            inner: SeqBuilder(Vec::with_capacity(len)),
        })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapBuilder, ExoError> {
        Ok(MapBuilder {
            entries: Vec::with_capacity(len.unwrap_or_default()),
            pending_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<RecordBuilder, ExoError> {
        Ok(RecordBuilder(Vec::with_capacity(len)))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantBuilder<RecordBuilder>, ExoError> {
        Ok(VariantBuilder {
            variant,
            inner: RecordBuilder(Vec::with_capacity(len)),
        })
    }
}

struct SeqBuilder(Vec<Node>);

impl ser::SerializeSeq for SeqBuilder {
    type Ok = Node;
    type Error = ExoError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ExoError> {
        self.0.push(value.serialize(NodeSerializer)?);
        Ok(())
    }

    fn end(self) -> Result<Node, ExoError> {
        Ok(Node::List(self.0))
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = Node;
    type Error = ExoError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ExoError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Node, ExoError> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = Node;
    type Error = ExoError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ExoError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Node, ExoError> {
        ser::SerializeSeq::end(self)
    }
}

struct RecordBuilder(Vec<(String, Node)>);

impl ser::SerializeStruct for RecordBuilder {
    type Ok = Node;
    type Error = ExoError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), ExoError> {
        self.0.push((key.to_owned(), value.serialize(NodeSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Node, ExoError> {
        Ok(Node::Record(self.0))
    }
}

struct MapBuilder {
    entries: Vec<(String, Node)>,
    pending_key: Option<String>,
}

impl ser::SerializeMap for MapBuilder {
    type Ok = Node;
    type Error = ExoError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), ExoError> {
        self.pending_key = Some(key.serialize(KeySerializer)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ExoError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| ExoError::Introspection("map value without a key".into()))?;
        self.entries.push((key, value.serialize(NodeSerializer)?));
        Ok(())
    }

    fn end(self) -> Result<Node, ExoError> {
        Ok(Node::Map(self.entries))
    }
}

struct VariantBuilder<B> {
    variant: &'static str,
    inner: B,
}

impl ser::SerializeTupleVariant for VariantBuilder<SeqBuilder> {
    type Ok = Node;
    type Error = ExoError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ExoError> {
        ser::SerializeSeq::serialize_element(&mut self.inner, value)
    }

    fn end(self) -> Result<Node, ExoError> {
        let inner = ser::SerializeSeq::end(self.inner)?;
        Ok(Node::Record(vec![(self.variant.to_owned(), inner)]))
    }
}

impl ser::SerializeStructVariant for VariantBuilder<RecordBuilder> {
    type Ok = Node;
    type Error = ExoError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), ExoError> {
        ser::SerializeStruct::serialize_field(&mut self.inner, key, value)
    }

    fn end(self) -> Result<Node, ExoError> {
        let inner = ser::SerializeStruct::end(self.inner)?;
        Ok(Node::Record(vec![(self.variant.to_owned(), inner)]))
    }
}

/// Map keys must flatten to strings.
struct KeySerializer;

impl KeySerializer {
    fn unsupported(kind: &str) -> ExoError {
        ExoError::Introspection(format!("{kind} cannot be used as a map key"))
    }
}

impl ser::Serializer for KeySerializer {
    type Ok = String;
    type Error = ExoError;

    type SerializeSeq = Impossible<String, ExoError>;
    type SerializeTuple = Impossible<String, ExoError>;
    type SerializeTupleStruct = Impossible<String, ExoError>;
    type SerializeTupleVariant = Impossible<String, ExoError>;
    type SerializeMap = Impossible<String, ExoError>;
    type SerializeStruct = Impossible<String, ExoError>;
    type SerializeStructVariant = Impossible<String, ExoError>;

    fn serialize_bool(self, v: bool) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_i8(self, v: i8) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_i16(self, v: i16) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_i32(self, v: i32) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_i64(self, v: i64) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_u8(self, v: u8) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_u16(self, v: u16) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_u32(self, v: u32) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_u64(self, v: u64) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_f32(self, v: f32) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_f64(self, v: f64) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_char(self, v: char) -> Result<String, ExoError> {
        Ok(v.to_string())
    }

    fn serialize_str(self, v: &str) -> Result<String, ExoError> {
        Ok(v.to_owned())
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<String, ExoError> {
        Err(Self::unsupported("bytes"))
    }

    fn serialize_none(self) -> Result<String, ExoError> {
        Err(Self::unsupported("none"))
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<String, ExoError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<String, ExoError> {
        Err(Self::unsupported("unit"))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<String, ExoError> {
        Err(Self::unsupported("unit struct"))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<String, ExoError> {
        Ok(variant.to_owned())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<String, ExoError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<String, ExoError> {
        Err(Self::unsupported("enum variant"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, ExoError> {
        Err(Self::unsupported("sequence"))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, ExoError> {
        Err(Self::unsupported("tuple"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, ExoError> {
        Err(Self::unsupported("tuple struct"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, ExoError> {
        Err(Self::unsupported("enum variant"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, ExoError> {
        Err(Self::unsupported("map"))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, ExoError> {
        Err(Self::unsupported("struct"))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, ExoError> {
        Err(Self::unsupported("enum variant"))
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use serde::Serialize;

    use super::{Node, field_names, field_names_of};
    use crate::output::units::ByteSize;

    #[derive(Default, Serialize)]
    struct Disk {
        name: String,
        size: ByteSize,
        #[serde(skip_serializing_if = "Option::is_none")]
        tier: Option<String>,
        labels: BTreeMap<String, String>,
    }

    #[test]
    fn field_names_follow_declaration_order() {
        assert_eq!(
            field_names_of::<Disk>().unwrap(),
            vec!["name", "size", "labels"]
        );
    }

    #[test]
    fn list_field_names_come_from_the_first_record() {
        let disks = vec![Disk {
            tier: Some("ssd".into()),
            ..Default::default()
        }];
        assert_eq!(
            field_names(&disks).unwrap(),
            vec!["name", "size", "tier", "labels"]
        );
    }

    #[test]
    fn byte_sizes_are_tagged() {
        let disk = Disk {
            size: ByteSize(1024),
            ..Default::default()
        };
        let node = Node::from_value(&disk).unwrap();
        assert_eq!(node.field("size"), Some(&Node::Bytes(1024)));
        assert_eq!(node.to_json()["size"], serde_json::json!(1024));
    }

    #[test]
    fn maps_keep_insertion_order() {
        let mut labels = BTreeMap::new();
        labels.insert("b".to_string(), "2".to_string());
        labels.insert("a".to_string(), "1".to_string());
        let node = Node::from_value(&labels).unwrap();
        assert_eq!(node.plain(), "a:1,b:2");
    }
}
