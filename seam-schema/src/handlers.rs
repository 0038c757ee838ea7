use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bitflags::bitflags;
use seam_wire::DescriptorType;

use crate::error::SchemaError;
use crate::schema::{MsgId, Schema};

/// Dense index identifying one (field, role) pair within a message's
/// handler set.  Compiled bytecode carries selectors as instruction
/// arguments.
pub type Selector = u32;

/// Selector of the start-of-message callback; always assigned.
pub const STARTMSG_SELECTOR: Selector = 0;

/// Selector of the end-of-message callback; always assigned.
pub const ENDMSG_SELECTOR: Selector = 1;

/// The role a selector plays for its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Start of the message.
    StartMsg,
    /// End of the message.
    EndMsg,
    /// Scalar value callback.
    Value,
    /// Start of one string value.
    StartStr,
    /// String chunk callback; may repeat within one value.
    Str,
    /// End of one string value.
    EndStr,
    /// Start of a repeated-field sequence.
    StartSeq,
    /// End of a repeated-field sequence.
    EndSeq,
    /// Start of a submessage value.
    StartSubMsg,
    /// End of a submessage value.
    EndSubMsg,
}

bitflags! {
    /// Attributes attached to a field binding.
    pub struct HandlerAttrs: u8 {
        /// The binding's callbacks never reject, so the VM may skip the
        /// suspend check after invoking them.
        const ALWAYS_OK = 0b0001;
        /// Submessage field to be parsed as an opaque string when the code
        /// cache compiles lazily.
        const LAZY = 0b0010;
    }
}

/// Store parameters of a shim binding: the parsed scalar is written
/// little-endian at `offset` into the sink's shim region, and bit `hasbit`
/// of that region is set.  No callback is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShimStore {
    /// Byte offset of the value slot.
    pub offset: u32,
    /// Presence bit index, if presence is tracked.
    pub hasbit: Option<u32>,
}

/// How a bound scalar field delivers its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Deliver through the sink's value callback.
    Callback,
    /// Store directly into the sink's shim region.
    Shim(ShimStore),
}

/// Selectors of a repeated-field sequence wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqSelectors {
    /// Start-of-sequence selector.
    pub start: Selector,
    /// End-of-sequence selector.
    pub end: Selector,
}

/// The selectors assigned to one bound field, shaped by its binding kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingSelectors {
    /// Scalar value binding.
    Value {
        /// Value selector.
        value: Selector,
        /// Sequence wrapper, for repeated fields.
        seq: Option<SeqSelectors>,
    },
    /// String, bytes or lazy-submessage binding.
    Str {
        /// Start-of-string selector.
        start: Selector,
        /// Chunk selector.
        chunk: Selector,
        /// End-of-string selector.
        end: Selector,
        /// Sequence wrapper, for repeated fields.
        seq: Option<SeqSelectors>,
    },
    /// Submessage or group binding.
    SubMsg {
        /// Start-of-submessage selector.
        start: Selector,
        /// End-of-submessage selector.
        end: Selector,
        /// Sequence wrapper, for repeated fields.
        seq: Option<SeqSelectors>,
    },
}

/// One field's frozen binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldBinding {
    number: u32,
    kind: HandlerKind,
    attrs: HandlerAttrs,
    selectors: BindingSelectors,
}

impl FieldBinding {
    /// Field number this binding covers.
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Delivery kind for scalar bindings.
    pub const fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// Binding attributes.
    pub const fn attrs(&self) -> HandlerAttrs {
        self.attrs
    }

    /// The selectors assigned to this binding.
    pub const fn selectors(&self) -> &BindingSelectors {
        &self.selectors
    }

    /// Whether the binding is a lazy submessage parsed as a string.
    pub fn is_lazy(&self) -> bool {
        self.attrs.contains(HandlerAttrs::LAZY)
    }
}

/// VM-facing view of one selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorEntry {
    /// Field number, or 0 for the message-level selectors.
    pub field_number: u32,
    /// Role of this selector.
    pub role: Role,
    /// Attributes inherited from the binding.
    pub attrs: HandlerAttrs,
    /// Shim store parameters for shim-bound value selectors.
    pub shim: Option<ShimStore>,
}

/// The frozen handler set of one message: which fields are bound, with what
/// kind and attributes, and the dense selector assignment.
///
/// Unbound fields are decoded as unknown fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Handlers {
    msg: MsgId,
    bindings: BTreeMap<u32, FieldBinding>,
    entries: Vec<SelectorEntry>,
}

impl Handlers {
    /// The message these handlers bind.
    pub const fn msg(&self) -> MsgId {
        self.msg
    }

    /// Binding for a field number, if the field is bound.
    pub fn binding(&self, number: u32) -> Option<&FieldBinding> {
        self.bindings.get(&number)
    }

    /// Iterates bindings in field-number order.
    pub fn bindings(&self) -> impl Iterator<Item = &FieldBinding> {
        self.bindings.values()
    }

    /// The entry behind a selector.
    pub fn entry(&self, sel: Selector) -> Option<&SelectorEntry> {
        self.entries.get(sel as usize)
    }

    /// Whether the selector's callbacks are declared non-rejecting.
    pub fn always_ok(&self, sel: Selector) -> bool {
        self.entry(sel)
            .map(|e| e.attrs.contains(HandlerAttrs::ALWAYS_OK))
            .unwrap_or(false)
    }

    /// Shim store parameters for a value selector, if shim-bound.
    pub fn shim(&self, sel: Selector) -> Option<ShimStore> {
        self.entry(sel).and_then(|e| e.shim)
    }

    /// Number of assigned selectors.
    pub fn selector_count(&self) -> usize {
        self.entries.len()
    }
}

enum PendingKind {
    Value(HandlerKind),
    Str,
    SubMsg,
}

struct PendingBinding {
    kind: PendingKind,
    attrs: HandlerAttrs,
}

/// Registers handler bindings for one message and freezes them into a
/// [`Handlers`] object with selectors assigned.
pub struct HandlersBuilder<'s> {
    schema: &'s Schema,
    msg: MsgId,
    pending: BTreeMap<u32, PendingBinding>,
}

impl<'s> HandlersBuilder<'s> {
    /// Starts a builder for `msg`.
    pub fn new(schema: &'s Schema, msg: MsgId) -> Self {
        Self {
            schema,
            msg,
            pending: BTreeMap::new(),
        }
    }

    fn field_type(&self, number: u32) -> Result<DescriptorType, SchemaError> {
        self.schema
            .msg(self.msg)
            .field_by_number(number)
            .map(|f| f.descriptor_type())
            .ok_or_else(|| SchemaError::UnknownField {
                message: self.schema.msg(self.msg).full_name().to_string(),
                number,
            })
    }

    fn insert(
        &mut self,
        number: u32,
        kind: PendingKind,
        attrs: HandlerAttrs,
    ) -> Result<&mut Self, SchemaError> {
        if self.pending.contains_key(&number) {
            return Err(SchemaError::DuplicateBinding {
                message: self.schema.msg(self.msg).full_name().to_string(),
                number,
            });
        }
        self.pending.insert(number, PendingBinding { kind, attrs });
        Ok(self)
    }

    fn invalid(&self, number: u32, reason: &'static str) -> SchemaError {
        SchemaError::InvalidBinding {
            message: self.schema.msg(self.msg).full_name().to_string(),
            number,
            reason,
        }
    }

    /// Binds a scalar field to the sink's value callback.
    pub fn bind_value(&mut self, number: u32) -> Result<&mut Self, SchemaError> {
        if !self.field_type(number)?.is_scalar() {
            return Err(self.invalid(number, "value bindings need a scalar field"));
        }
        self.insert(number, PendingKind::Value(HandlerKind::Callback), HandlerAttrs::empty())
    }

    /// Binds a singular scalar field to a direct store into the sink's shim
    /// region.  Shim bindings never invoke a callback and are implicitly
    /// always-ok.
    pub fn bind_shim(
        &mut self,
        number: u32,
        offset: u32,
        hasbit: Option<u32>,
    ) -> Result<&mut Self, SchemaError> {
        let field = self
            .schema
            .msg(self.msg)
            .field_by_number(number)
            .ok_or_else(|| SchemaError::UnknownField {
                message: self.schema.msg(self.msg).full_name().to_string(),
                number,
            })?;
        if !field.descriptor_type().is_scalar() {
            return Err(self.invalid(number, "shim bindings need a scalar field"));
        }
        if field.is_repeated() {
            return Err(self.invalid(number, "shim bindings need a singular field"));
        }
        self.insert(
            number,
            PendingKind::Value(HandlerKind::Shim(ShimStore { offset, hasbit })),
            HandlerAttrs::ALWAYS_OK,
        )
    }

    /// Binds a string or bytes field to the string callbacks.
    pub fn bind_string(&mut self, number: u32) -> Result<&mut Self, SchemaError> {
        if !self.field_type(number)?.is_string() {
            return Err(self.invalid(number, "string bindings need a string or bytes field"));
        }
        self.insert(number, PendingKind::Str, HandlerAttrs::empty())
    }

    /// Binds a message field to the string callbacks, deferring its parse.
    /// Takes effect when the code cache compiles lazily; an eager cache
    /// needs a submessage binding to descend.
    pub fn bind_lazy_submsg(&mut self, number: u32) -> Result<&mut Self, SchemaError> {
        if self.field_type(number)? != DescriptorType::Message {
            return Err(self.invalid(number, "lazy bindings need a message field"));
        }
        self.insert(number, PendingKind::Str, HandlerAttrs::LAZY)
    }

    /// Binds a message or group field to the submessage callbacks.  The
    /// nested message becomes reachable and gets its own decoder method.
    pub fn bind_submsg(&mut self, number: u32) -> Result<&mut Self, SchemaError> {
        if !self.field_type(number)?.is_submessage() {
            return Err(self.invalid(number, "submessage bindings need a message or group field"));
        }
        self.insert(number, PendingKind::SubMsg, HandlerAttrs::empty())
    }

    /// Marks an existing binding's callbacks as non-rejecting.
    pub fn always_ok(&mut self, number: u32) -> Result<&mut Self, SchemaError> {
        match self.pending.get_mut(&number) {
            Some(p) => {
                p.attrs |= HandlerAttrs::ALWAYS_OK;
                Ok(self)
            }
            None => Err(SchemaError::UnknownField {
                message: self.schema.msg(self.msg).full_name().to_string(),
                number,
            }),
        }
    }

    /// Assigns selectors and freezes the handler set.
    pub fn freeze(self) -> Handlers {
        let mut entries = vec![
            SelectorEntry {
                field_number: 0,
                role: Role::StartMsg,
                attrs: HandlerAttrs::empty(),
                shim: None,
            },
            SelectorEntry {
                field_number: 0,
                role: Role::EndMsg,
                attrs: HandlerAttrs::empty(),
                shim: None,
            },
        ];
        let mut bindings = BTreeMap::new();

        // Selector order follows field declaration order, so compiled
        // bytecode is stable across identical registrations.
        for field in self.schema.msg(self.msg).fields() {
            let number = field.number();
            let Some(p) = self.pending.get(&number) else {
                continue;
            };
            let mut push = |role: Role, shim: Option<ShimStore>| -> Selector {
                let sel = entries.len() as Selector;
                entries.push(SelectorEntry {
                    field_number: number,
                    role,
                    attrs: p.attrs,
                    shim,
                });
                sel
            };
            let repeated = field.is_repeated();
            let selectors = match &p.kind {
                PendingKind::Value(kind) => {
                    let shim = match kind {
                        HandlerKind::Shim(s) => Some(*s),
                        HandlerKind::Callback => None,
                    };
                    BindingSelectors::Value {
                        value: push(Role::Value, shim),
                        seq: repeated.then(|| SeqSelectors {
                            start: push(Role::StartSeq, None),
                            end: push(Role::EndSeq, None),
                        }),
                    }
                }
                PendingKind::Str => BindingSelectors::Str {
                    start: push(Role::StartStr, None),
                    chunk: push(Role::Str, None),
                    end: push(Role::EndStr, None),
                    seq: repeated.then(|| SeqSelectors {
                        start: push(Role::StartSeq, None),
                        end: push(Role::EndSeq, None),
                    }),
                },
                PendingKind::SubMsg => BindingSelectors::SubMsg {
                    start: push(Role::StartSubMsg, None),
                    end: push(Role::EndSubMsg, None),
                    seq: repeated.then(|| SeqSelectors {
                        start: push(Role::StartSeq, None),
                        end: push(Role::EndSeq, None),
                    }),
                },
            };
            let kind = match &p.kind {
                PendingKind::Value(k) => *k,
                _ => HandlerKind::Callback,
            };
            bindings.insert(
                number,
                FieldBinding {
                    number,
                    kind,
                    attrs: p.attrs,
                    selectors,
                },
            );
        }

        Handlers {
            msg: self.msg,
            bindings,
            entries,
        }
    }
}

/// One frozen [`Handlers`] per message reachable from a root, built eagerly
/// by a user configuration closure.  Immutable and shareable once built.
pub struct HandlerCache {
    schema: Arc<Schema>,
    root: MsgId,
    map: HashMap<MsgId, Arc<Handlers>>,
}

impl HandlerCache {
    /// Builds the cache by walking submessage bindings from `root`.  The
    /// `configure` closure is invoked once per reachable message to
    /// register that message's bindings.
    pub fn build<F>(
        schema: Arc<Schema>,
        root: MsgId,
        mut configure: F,
    ) -> Result<Self, SchemaError>
    where
        F: FnMut(&Schema, MsgId, &mut HandlersBuilder<'_>) -> Result<(), SchemaError>,
    {
        let mut map = HashMap::new();
        let mut queue = vec![root];
        while let Some(msg) = queue.pop() {
            if map.contains_key(&msg) {
                continue;
            }
            let mut builder = HandlersBuilder::new(&schema, msg);
            configure(&schema, msg, &mut builder)?;
            let handlers = Arc::new(builder.freeze());
            for binding in handlers.bindings() {
                if matches!(binding.selectors(), BindingSelectors::SubMsg { .. }) {
                    if let Some(sub) = schema
                        .msg(msg)
                        .field_by_number(binding.number())
                        .and_then(|f| f.message_subdef())
                    {
                        queue.push(sub);
                    }
                }
            }
            map.insert(msg, handlers);
        }
        Ok(Self { schema, root, map })
    }

    /// The schema this cache binds.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The root message the cache was built from.
    pub const fn root(&self) -> MsgId {
        self.root
    }

    /// Handlers for a message, if it is reachable from the root.
    pub fn get(&self, msg: MsgId) -> Option<&Arc<Handlers>> {
        self.map.get(&msg)
    }
}
