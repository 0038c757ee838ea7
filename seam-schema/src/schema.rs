use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use seam_wire::{DescriptorType, MAX_FIELD_NUMBER};

use crate::error::SchemaError;

/// Index of a message definition inside its [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MsgId(pub(crate) u32);

impl MsgId {
    /// The arena index of this message.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an enum definition inside its [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnumId(pub(crate) u32);

impl EnumId {
    /// The arena index of this enum.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Field label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Label {
    /// Singular, presence-tracked.
    Optional,
    /// Singular, required by the schema.
    Required,
    /// Zero or more values; may additionally be packed.
    Repeated,
}

/// Reference from a field to the definition of its nested type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SubDef {
    /// Message or group payload.
    Message(MsgId),
    /// Enum payload.
    Enum(EnumId),
}

/// Default value of a singular field.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DefaultValue {
    /// Default for double fields.
    Double(f64),
    /// Default for float fields.
    Float(f32),
    /// Default for int32/sint32/sfixed32 fields.
    Int32(i32),
    /// Default for int64/sint64/sfixed64 fields.
    Int64(i64),
    /// Default for uint32/fixed32 fields.
    Uint32(u32),
    /// Default for uint64/fixed64 fields.
    Uint64(u64),
    /// Default for bool fields.
    Bool(bool),
    /// Default for string fields.
    String(String),
    /// Default for bytes fields.
    Bytes(Vec<u8>),
    /// Default for enum fields, as the numeric value.
    Enum(i32),
}

/// A single field definition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldDef {
    name: String,
    number: u32,
    ty: DescriptorType,
    label: Label,
    packed: bool,
    subdef: Option<SubDef>,
    default: Option<DefaultValue>,
    hasbit: Option<u32>,
    index: usize,
}

impl FieldDef {
    /// Creates a field definition.  Subdef, packing and defaults are added
    /// with the `with_*` builders before the field is attached to a message.
    pub fn new(
        number: u32,
        name: impl Into<String>,
        ty: DescriptorType,
        label: Label,
    ) -> Self {
        Self {
            name: name.into(),
            number,
            ty,
            label,
            packed: false,
            subdef: None,
            default: None,
            hasbit: None,
            index: 0,
        }
    }

    /// Marks a repeated field as packed on the wire.
    pub fn with_packed(mut self, packed: bool) -> Self {
        self.packed = packed;
        self
    }

    /// Attaches the nested type reference.
    pub fn with_subdef(mut self, sub: SubDef) -> Self {
        self.subdef = Some(sub);
        self
    }

    /// Attaches a default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Field number.
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire descriptor type.
    pub const fn descriptor_type(&self) -> DescriptorType {
        self.ty
    }

    /// Field label.
    pub const fn label(&self) -> Label {
        self.label
    }

    /// Whether the field is repeated.
    pub const fn is_repeated(&self) -> bool {
        matches!(self.label, Label::Repeated)
    }

    /// Whether a repeated field is packed on the wire.
    pub const fn is_packed(&self) -> bool {
        self.packed
    }

    /// The nested type reference, if any.
    pub const fn subdef(&self) -> Option<SubDef> {
        self.subdef
    }

    /// The nested message, for message and group fields.
    pub fn message_subdef(&self) -> Option<MsgId> {
        match self.subdef {
            Some(SubDef::Message(m)) => Some(m),
            _ => None,
        }
    }

    /// The nested enum, for enum fields.
    pub fn enum_subdef(&self) -> Option<EnumId> {
        match self.subdef {
            Some(SubDef::Enum(e)) => Some(e),
            _ => None,
        }
    }

    /// The default value, if any.
    pub fn default_value(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    /// Presence bit index assigned at freeze, for singular fields.
    pub const fn hasbit(&self) -> Option<u32> {
        self.hasbit
    }

    /// Declaration index within the parent message.
    pub const fn index(&self) -> usize {
        self.index
    }
}

/// A oneof grouping over sibling fields.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OneofDef {
    name: String,
    fields: Vec<u32>,
}

impl OneofDef {
    /// Oneof name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Numbers of the member fields.
    pub fn field_numbers(&self) -> &[u32] {
        &self.fields
    }
}

/// A frozen message definition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MessageDef {
    full_name: String,
    fields: Vec<FieldDef>,
    by_number: HashMap<u32, usize>,
    oneofs: Vec<OneofDef>,
    cyclic: bool,
    hasbit_count: u32,
}

impl MessageDef {
    /// Fully qualified message name.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Number of fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Field by declaration index.
    pub fn field(&self, index: usize) -> Option<&FieldDef> {
        self.fields.get(index)
    }

    /// Field by wire number.
    pub fn field_by_number(&self, number: u32) -> Option<&FieldDef> {
        self.by_number.get(&number).map(|&i| &self.fields[i])
    }

    /// Iterates fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    /// Declared oneofs.
    pub fn oneofs(&self) -> &[OneofDef] {
        &self.oneofs
    }

    /// Whether this message participates in a reference cycle.
    pub const fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// Number of presence bits assigned to singular fields.
    pub const fn hasbit_count(&self) -> u32 {
        self.hasbit_count
    }
}

/// A frozen enum definition with bidirectional name/value tables.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnumDef {
    full_name: String,
    by_name: BTreeMap<String, i32>,
    by_number: BTreeMap<i32, String>,
    default: i32,
}

impl EnumDef {
    /// Fully qualified enum name.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Numeric value for a name.
    pub fn number(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }

    /// Name for a numeric value.
    pub fn name(&self, number: i32) -> Option<&str> {
        self.by_number.get(&number).map(String::as_str)
    }

    /// The default numeric value.
    pub const fn default_value(&self) -> i32 {
        self.default
    }

    /// Number of declared values.
    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    /// Whether the enum declares no values.
    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

/// A frozen, immutable schema: the arena that owns all message and enum
/// definitions.  Shared between handler caches and compiled method groups
/// via `Arc`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Schema {
    msgs: Vec<MessageDef>,
    enums: Vec<EnumDef>,
}

impl Schema {
    /// Message definition for an id.
    ///
    /// # Panics
    ///
    /// Panics when `id` comes from a different schema and is out of range.
    pub fn msg(&self, id: MsgId) -> &MessageDef {
        &self.msgs[id.index()]
    }

    /// Enum definition for an id.
    ///
    /// # Panics
    ///
    /// Panics when `id` comes from a different schema and is out of range.
    pub fn enum_def(&self, id: EnumId) -> &EnumDef {
        &self.enums[id.index()]
    }

    /// Number of messages in the arena.
    pub fn msg_count(&self) -> usize {
        self.msgs.len()
    }

    /// Iterates message ids in arena order.
    pub fn msg_ids(&self) -> impl Iterator<Item = MsgId> {
        (0..self.msgs.len() as u32).map(MsgId)
    }
}

struct PendingMsg {
    full_name: String,
    fields: Vec<FieldDef>,
    oneofs: Vec<OneofDef>,
}

struct PendingEnum {
    full_name: String,
    by_name: BTreeMap<String, i32>,
    by_number: BTreeMap<i32, String>,
    default: i32,
}

/// Builds a [`Schema`].  Messages and enums are allocated first so that
/// fields can reference them by id, cycles included; `freeze` validates the
/// whole graph and produces the immutable arena.
#[derive(Default)]
pub struct SchemaBuilder {
    msgs: Vec<PendingMsg>,
    enums: Vec<PendingEnum>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            msgs: Vec::new(),
            enums: Vec::new(),
        }
    }

    /// Allocates a message and returns its id.
    pub fn add_message(&mut self, full_name: impl Into<String>) -> MsgId {
        let id = MsgId(self.msgs.len() as u32);
        self.msgs.push(PendingMsg {
            full_name: full_name.into(),
            fields: Vec::new(),
            oneofs: Vec::new(),
        });
        id
    }

    /// Allocates an enum and returns its id.
    pub fn add_enum(&mut self, full_name: impl Into<String>) -> EnumId {
        let id = EnumId(self.enums.len() as u32);
        self.enums.push(PendingEnum {
            full_name: full_name.into(),
            by_name: BTreeMap::new(),
            by_number: BTreeMap::new(),
            default: 0,
        });
        id
    }

    /// Adds a named value to an enum.
    pub fn add_enum_value(
        &mut self,
        id: EnumId,
        name: impl Into<String>,
        number: i32,
    ) -> Result<(), SchemaError> {
        let e = &mut self.enums[id.index()];
        let name = name.into();
        if e.by_name.contains_key(&name) || e.by_number.contains_key(&number) {
            return Err(SchemaError::DuplicateEnumValue {
                name: e.full_name.clone(),
            });
        }
        e.by_name.insert(name.clone(), number);
        e.by_number.insert(number, name);
        Ok(())
    }

    /// Sets the default numeric value of an enum.
    pub fn set_enum_default(&mut self, id: EnumId, number: i32) {
        self.enums[id.index()].default = number;
    }

    /// Attaches a field to a message.
    pub fn add_field(&mut self, msg: MsgId, field: FieldDef) -> Result<(), SchemaError> {
        let m = &mut self.msgs[msg.index()];
        if field.number == 0 {
            return Err(SchemaError::ZeroFieldNumber {
                message: m.full_name.clone(),
            });
        }
        if field.number > MAX_FIELD_NUMBER {
            return Err(SchemaError::FieldNumberOutOfRange {
                message: m.full_name.clone(),
                number: field.number,
            });
        }
        if m.fields.iter().any(|f| f.number == field.number) {
            return Err(SchemaError::DuplicateFieldNumber {
                message: m.full_name.clone(),
                number: field.number,
            });
        }
        m.fields.push(field);
        Ok(())
    }

    /// Declares a oneof over previously added fields of a message.
    pub fn add_oneof(
        &mut self,
        msg: MsgId,
        name: impl Into<String>,
        field_numbers: &[u32],
    ) -> Result<(), SchemaError> {
        let m = &mut self.msgs[msg.index()];
        let name = name.into();
        for &n in field_numbers {
            if !m.fields.iter().any(|f| f.number == n) {
                return Err(SchemaError::UnknownOneofField {
                    message: m.full_name.clone(),
                    oneof: name,
                    number: n,
                });
            }
        }
        m.oneofs.push(OneofDef {
            name,
            fields: field_numbers.to_vec(),
        });
        Ok(())
    }

    /// Validates the graph and produces the frozen schema.
    pub fn freeze(self) -> Result<Arc<Schema>, SchemaError> {
        let mut msgs = Vec::with_capacity(self.msgs.len());
        let msg_count = self.msgs.len() as u32;
        let enum_count = self.enums.len() as u32;

        for pending in &self.msgs {
            let mut fields = pending.fields.clone();
            let mut by_number = HashMap::with_capacity(fields.len());
            let mut hasbit = 0u32;
            for (index, f) in fields.iter_mut().enumerate() {
                f.index = index;
                match (f.ty, f.subdef) {
                    (DescriptorType::Message | DescriptorType::Group, sub) => match sub {
                        Some(SubDef::Message(m)) if m.0 < msg_count => {}
                        Some(_) => {
                            return Err(SchemaError::MismatchedSubDef {
                                message: pending.full_name.clone(),
                                number: f.number,
                            })
                        }
                        None => {
                            return Err(SchemaError::MissingSubDef {
                                message: pending.full_name.clone(),
                                number: f.number,
                            })
                        }
                    },
                    (DescriptorType::Enum, sub) => match sub {
                        Some(SubDef::Enum(e)) if e.0 < enum_count => {}
                        Some(_) => {
                            return Err(SchemaError::MismatchedSubDef {
                                message: pending.full_name.clone(),
                                number: f.number,
                            })
                        }
                        None => {
                            return Err(SchemaError::MissingSubDef {
                                message: pending.full_name.clone(),
                                number: f.number,
                            })
                        }
                    },
                    (_, Some(_)) => {
                        return Err(SchemaError::MismatchedSubDef {
                            message: pending.full_name.clone(),
                            number: f.number,
                        })
                    }
                    (_, None) => {}
                }
                if !f.is_repeated() {
                    f.hasbit = Some(hasbit);
                    hasbit += 1;
                }
                by_number.insert(f.number, index);
            }
            msgs.push(MessageDef {
                full_name: pending.full_name.clone(),
                fields,
                by_number,
                oneofs: pending.oneofs.clone(),
                cyclic: false,
                hasbit_count: hasbit,
            });
        }

        mark_cycles(&mut msgs);

        let enums = self
            .enums
            .into_iter()
            .map(|e| EnumDef {
                full_name: e.full_name,
                by_name: e.by_name,
                by_number: e.by_number,
                default: e.default,
            })
            .collect();

        Ok(Arc::new(Schema { msgs, enums }))
    }
}

/// Flags every message that can reach itself through submessage fields.
fn mark_cycles(msgs: &mut [MessageDef]) {
    let edges: Vec<Vec<usize>> = msgs
        .iter()
        .map(|m| {
            m.fields
                .iter()
                .filter_map(|f| f.message_subdef().map(MsgId::index))
                .collect()
        })
        .collect();

    for start in 0..msgs.len() {
        let mut seen = HashSet::new();
        let mut stack: Vec<usize> = edges[start].clone();
        let mut cyclic = false;
        while let Some(n) = stack.pop() {
            if n == start {
                cyclic = true;
                break;
            }
            if seen.insert(n) {
                stack.extend(edges[n].iter().copied());
            }
        }
        msgs[start].cyclic = cyclic;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32(number: u32, name: &str) -> FieldDef {
        FieldDef::new(number, name, DescriptorType::Int32, Label::Optional)
    }

    #[test]
    fn freeze_assigns_hasbits_and_indices() {
        let mut b = SchemaBuilder::new();
        let m = b.add_message("test.M");
        b.add_field(m, int32(1, "a")).unwrap();
        b.add_field(
            m,
            FieldDef::new(2, "b", DescriptorType::Int32, Label::Repeated),
        )
        .unwrap();
        b.add_field(m, int32(3, "c")).unwrap();
        let s = b.freeze().unwrap();

        let md = s.msg(m);
        assert_eq!(md.field_count(), 3);
        assert_eq!(md.field_by_number(1).unwrap().hasbit(), Some(0));
        assert_eq!(md.field_by_number(2).unwrap().hasbit(), None);
        assert_eq!(md.field_by_number(3).unwrap().hasbit(), Some(1));
        assert_eq!(md.hasbit_count(), 2);
        assert_eq!(md.field(1).unwrap().index(), 1);
        assert!(!md.is_cyclic());
    }

    #[test]
    fn freeze_rejects_bad_numbers() {
        let mut b = SchemaBuilder::new();
        let m = b.add_message("test.M");
        assert!(matches!(
            b.add_field(m, int32(0, "zero")),
            Err(SchemaError::ZeroFieldNumber { .. })
        ));
        assert!(matches!(
            b.add_field(m, int32(MAX_FIELD_NUMBER + 1, "big")),
            Err(SchemaError::FieldNumberOutOfRange { .. })
        ));
        b.add_field(m, int32(1, "a")).unwrap();
        assert!(matches!(
            b.add_field(m, int32(1, "dup")),
            Err(SchemaError::DuplicateFieldNumber { .. })
        ));
    }

    #[test]
    fn freeze_requires_matching_subdefs() {
        let mut b = SchemaBuilder::new();
        let m = b.add_message("test.M");
        b.add_field(
            m,
            FieldDef::new(1, "sub", DescriptorType::Message, Label::Optional),
        )
        .unwrap();
        assert!(matches!(
            b.freeze(),
            Err(SchemaError::MissingSubDef { .. })
        ));

        let mut b = SchemaBuilder::new();
        let m = b.add_message("test.M");
        let e = b.add_enum("test.E");
        b.add_field(
            m,
            FieldDef::new(1, "sub", DescriptorType::Message, Label::Optional)
                .with_subdef(SubDef::Enum(e)),
        )
        .unwrap();
        assert!(matches!(
            b.freeze(),
            Err(SchemaError::MismatchedSubDef { .. })
        ));
    }

    #[test]
    fn cycles_are_flagged() {
        let mut b = SchemaBuilder::new();
        let a = b.add_message("test.A");
        let c = b.add_message("test.B");
        let leaf = b.add_message("test.Leaf");
        b.add_field(
            a,
            FieldDef::new(1, "b", DescriptorType::Message, Label::Optional)
                .with_subdef(SubDef::Message(c)),
        )
        .unwrap();
        b.add_field(
            c,
            FieldDef::new(1, "a", DescriptorType::Message, Label::Optional)
                .with_subdef(SubDef::Message(a)),
        )
        .unwrap();
        b.add_field(
            c,
            FieldDef::new(2, "leaf", DescriptorType::Message, Label::Optional)
                .with_subdef(SubDef::Message(leaf)),
        )
        .unwrap();
        let s = b.freeze().unwrap();
        assert!(s.msg(a).is_cyclic());
        assert!(s.msg(c).is_cyclic());
        assert!(!s.msg(leaf).is_cyclic());
    }

    #[test]
    fn enum_tables_are_bidirectional() {
        let mut b = SchemaBuilder::new();
        let e = b.add_enum("test.E");
        b.add_enum_value(e, "ZERO", 0).unwrap();
        b.add_enum_value(e, "ONE", 1).unwrap();
        b.set_enum_default(e, 1);
        assert!(b.add_enum_value(e, "ZERO", 5).is_err());
        assert!(b.add_enum_value(e, "OTHER", 1).is_err());
        let s = b.freeze().unwrap();
        let ed = s.enum_def(e);
        assert_eq!(ed.number("ONE"), Some(1));
        assert_eq!(ed.name(0), Some("ZERO"));
        assert_eq!(ed.default_value(), 1);
        assert_eq!(ed.len(), 2);
    }
}
