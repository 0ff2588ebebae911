//! Typed node parameters.
//!
//! Every kind (integer, double, boolean, string, choice) shares one contract:
//! `default`, `get`, `get_at_time`, `set`, `set_at_time`, `copy_from`.
//! Setting a value emits a [`ParamChangedEvent`] tagged with the cause;
//! copying does not.
//!
//! Parameters are not animated: `get_at_time` returns the latest value and
//! `set_at_time` overwrites it, whatever the requested time.
//!
//! Changes made between `ParamSet::edit_begin` and `edit_end` are held back
//! and emitted together when the edit closes, one event per param.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attrs::{AttrValue, Attrs};
use super::keys::{P_CHOICE_OPTIONS, P_DEFAULT, P_EVALUATE_ON_CHANGE, P_LABEL};
use crate::core::event_bus::NodeEventEmitter;
use crate::error::{HostError, HostResult};

/// Cause of a parameter change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeReason {
    UserEdited,
    PluginEdited,
    Time,
}

/// Emitted on every `set`/`set_at_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamChangedEvent {
    pub node: Uuid,
    pub param: String,
    pub reason: ChangeReason,
    /// Time passed to `set_at_time`, `None` for plain `set`
    pub time: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    Integer,
    Double,
    Boolean,
    String,
    Choice,
}

impl ParamType {
    pub fn name(&self) -> &'static str {
        match self {
            ParamType::Integer => "integer",
            ParamType::Double => "double",
            ParamType::Boolean => "boolean",
            ParamType::String => "string",
            ParamType::Choice => "choice",
        }
    }
}

/// Static parameter metadata. `props` is the descriptor property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    pub kind: ParamType,
    pub props: Attrs,
}

impl ParamDescriptor {
    pub fn new(name: impl Into<String>, kind: ParamType, props: Attrs) -> Self {
        Self {
            name: name.into(),
            kind,
            props,
        }
    }

    pub fn integer(name: impl Into<String>, default: i32) -> Self {
        Self::new(name, ParamType::Integer, Attrs::new().with(P_DEFAULT, AttrValue::Int(default)))
    }

    pub fn double(name: impl Into<String>, default: f64) -> Self {
        Self::new(name, ParamType::Double, Attrs::new().with(P_DEFAULT, AttrValue::Double(default)))
    }

    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self::new(name, ParamType::Boolean, Attrs::new().with(P_DEFAULT, AttrValue::Bool(default)))
    }

    pub fn string(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::new(
            name,
            ParamType::String,
            Attrs::new().with(P_DEFAULT, AttrValue::Str(default.into())),
        )
    }

    pub fn choice(name: impl Into<String>, options: &[&str], default: i32) -> Self {
        let options = options.iter().map(|s| s.to_string()).collect();
        Self::new(
            name,
            ParamType::Choice,
            Attrs::new()
                .with(P_DEFAULT, AttrValue::Int(default))
                .with(P_CHOICE_OPTIONS, AttrValue::StrList(options)),
        )
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.props.set(P_LABEL, AttrValue::Str(label.into()));
        self
    }

    /// Mark the param as not affecting rendered pixels.
    pub fn no_evaluate(mut self) -> Self {
        self.props.set(P_EVALUATE_ON_CHANGE, AttrValue::Bool(false));
        self
    }
}

/// Value semantics of one parameter kind.
pub trait ParamKind: Send + Sync + 'static {
    type Value: Clone + PartialEq + fmt::Debug + Send + Sync;
    const TYPE: ParamType;

    fn read_default(props: &Attrs) -> Self::Value;
    fn to_attr(v: &Self::Value) -> AttrValue;
    fn from_attr(v: &AttrValue) -> Option<Self::Value>;
}

#[derive(Debug, Clone, Copy)]
pub struct IntKind;
#[derive(Debug, Clone, Copy)]
pub struct DoubleKind;
#[derive(Debug, Clone, Copy)]
pub struct BoolKind;
#[derive(Debug, Clone, Copy)]
pub struct StringKind;
#[derive(Debug, Clone, Copy)]
pub struct ChoiceKind;

impl ParamKind for IntKind {
    type Value = i32;
    const TYPE: ParamType = ParamType::Integer;

    fn read_default(props: &Attrs) -> i32 {
        props.get_i32_or(P_DEFAULT, 0)
    }
    fn to_attr(v: &i32) -> AttrValue {
        AttrValue::Int(*v)
    }
    fn from_attr(v: &AttrValue) -> Option<i32> {
        match v {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl ParamKind for DoubleKind {
    type Value = f64;
    const TYPE: ParamType = ParamType::Double;

    fn read_default(props: &Attrs) -> f64 {
        props.get_double(P_DEFAULT).unwrap_or(0.0)
    }
    fn to_attr(v: &f64) -> AttrValue {
        AttrValue::Double(*v)
    }
    fn from_attr(v: &AttrValue) -> Option<f64> {
        match v {
            AttrValue::Double(d) => Some(*d),
            AttrValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl ParamKind for BoolKind {
    type Value = bool;
    const TYPE: ParamType = ParamType::Boolean;

    fn read_default(props: &Attrs) -> bool {
        props.get_bool_or(P_DEFAULT, false)
    }
    fn to_attr(v: &bool) -> AttrValue {
        AttrValue::Bool(*v)
    }
    fn from_attr(v: &AttrValue) -> Option<bool> {
        match v {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl ParamKind for StringKind {
    type Value = String;
    const TYPE: ParamType = ParamType::String;

    fn read_default(props: &Attrs) -> String {
        props.get_str(P_DEFAULT).unwrap_or_default().to_string()
    }
    fn to_attr(v: &String) -> AttrValue {
        AttrValue::Str(v.clone())
    }
    fn from_attr(v: &AttrValue) -> Option<String> {
        match v {
            AttrValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl ParamKind for ChoiceKind {
    type Value = i32;
    const TYPE: ParamType = ParamType::Choice;

    fn read_default(props: &Attrs) -> i32 {
        props.get_i32_or(P_DEFAULT, 0)
    }
    fn to_attr(v: &i32) -> AttrValue {
        AttrValue::Int(*v)
    }
    fn from_attr(v: &AttrValue) -> Option<i32> {
        match v {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// Edit group opened by `ParamSet::edit_begin`.
#[derive(Debug)]
struct EditGroup {
    label: String,
    pending: Vec<ParamChangedEvent>,
}

/// Notification state shared by the params of one set.
#[derive(Debug, Default)]
struct SetState {
    edit: Option<EditGroup>,
    /// An evaluating param changed since the last `take_dirty`
    dirty: bool,
}

type SharedState = Arc<Mutex<SetState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, SetState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// One parameter instance of kind `K`.
pub struct TypedParam<K: ParamKind> {
    name: String,
    node: Uuid,
    props: Arc<Attrs>,
    value: K::Value,
    emitter: NodeEventEmitter,
    state: SharedState,
    _kind: PhantomData<K>,
}

pub type IntegerParam = TypedParam<IntKind>;
pub type DoubleParam = TypedParam<DoubleKind>;
pub type BooleanParam = TypedParam<BoolKind>;
pub type StringParam = TypedParam<StringKind>;
pub type ChoiceParam = TypedParam<ChoiceKind>;

impl<K: ParamKind> Clone for TypedParam<K> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            node: self.node,
            props: Arc::clone(&self.props),
            value: self.value.clone(),
            emitter: self.emitter.clone(),
            state: Arc::clone(&self.state),
            _kind: PhantomData,
        }
    }
}

impl<K: ParamKind> fmt::Debug for TypedParam<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("kind", &K::TYPE)
            .field("value", &self.value)
            .finish()
    }
}

impl<K: ParamKind> TypedParam<K> {
    /// Instantiate from a descriptor; the value starts at the declared default.
    pub fn new(node: Uuid, desc: &ParamDescriptor) -> HostResult<Self> {
        if desc.kind != K::TYPE {
            return Err(HostError::TypeMismatch {
                expected: K::TYPE.name(),
                found: desc.kind.name(),
            });
        }
        let props = Arc::new(desc.props.clone());
        let value = K::read_default(&props);
        Ok(Self {
            name: desc.name.clone(),
            node,
            props,
            value,
            emitter: NodeEventEmitter::dummy(),
            state: SharedState::default(),
            _kind: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &Attrs {
        &self.props
    }

    /// Display label, the name unless the descriptor sets one.
    pub fn label(&self) -> &str {
        self.props.get_str(P_LABEL).unwrap_or(&self.name)
    }

    /// Does a change invalidate rendered images? Defaults to true.
    pub fn evaluate_on_change(&self) -> bool {
        self.props.get_bool_or(P_EVALUATE_ON_CHANGE, true)
    }

    /// Default declared by the descriptor.
    pub fn default_value(&self) -> K::Value {
        K::read_default(&self.props)
    }

    pub fn get(&self) -> K::Value {
        self.value.clone()
    }

    /// Latest value; `_time` is not used (no animation curves).
    pub fn get_at_time(&self, _time: f64) -> K::Value {
        self.value.clone()
    }

    pub fn set(&mut self, v: K::Value, reason: ChangeReason) {
        self.value = v;
        self.changed(reason, None);
    }

    /// Overwrites the single stored value; `time` only tags the notification.
    pub fn set_at_time(&mut self, time: f64, v: K::Value, reason: ChangeReason) {
        self.value = v;
        self.changed(reason, Some(time));
    }

    /// Take the value of `other` without notifying.
    pub fn copy_from(&mut self, other: &TypedParam<K>) {
        if self.value != other.value && self.evaluate_on_change() {
            lock(&self.state).dirty = true;
        }
        self.value = other.value.clone();
    }

    fn changed(&self, reason: ChangeReason, time: Option<f64>) {
        let event = ParamChangedEvent {
            node: self.node,
            param: self.name.clone(),
            reason,
            time,
        };
        let mut state = lock(&self.state);
        if self.evaluate_on_change() {
            state.dirty = true;
        }
        if let Some(group) = state.edit.as_mut() {
            // Latest change per param wins
            group.pending.retain(|e| e.param != event.param);
            group.pending.push(event);
            return;
        }
        drop(state);
        self.emitter.emit(event);
    }

    fn attach(&mut self, node: Uuid, emitter: NodeEventEmitter, state: SharedState) {
        self.node = node;
        self.emitter = emitter;
        self.state = state;
    }
}

impl TypedParam<ChoiceKind> {
    pub fn options(&self) -> &[String] {
        self.props.get_str_list(P_CHOICE_OPTIONS).unwrap_or(&[])
    }

    /// Label of the selected option, if the index is valid.
    pub fn selected(&self) -> Option<&str> {
        usize::try_from(self.value)
            .ok()
            .and_then(|i| self.options().get(i))
            .map(|s| s.as_str())
    }
}

/// Closed set of parameter kinds.
#[derive(Debug, Clone)]
pub enum Param {
    Integer(IntegerParam),
    Double(DoubleParam),
    Boolean(BooleanParam),
    String(StringParam),
    Choice(ChoiceParam),
}

macro_rules! each_param {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            Param::Integer($p) => $body,
            Param::Double($p) => $body,
            Param::Boolean($p) => $body,
            Param::String($p) => $body,
            Param::Choice($p) => $body,
        }
    };
}

impl Param {
    pub fn from_descriptor(node: Uuid, desc: &ParamDescriptor) -> HostResult<Self> {
        Ok(match desc.kind {
            ParamType::Integer => Param::Integer(TypedParam::new(node, desc)?),
            ParamType::Double => Param::Double(TypedParam::new(node, desc)?),
            ParamType::Boolean => Param::Boolean(TypedParam::new(node, desc)?),
            ParamType::String => Param::String(TypedParam::new(node, desc)?),
            ParamType::Choice => Param::Choice(TypedParam::new(node, desc)?),
        })
    }

    pub fn name(&self) -> &str {
        each_param!(self, p => p.name())
    }

    pub fn label(&self) -> &str {
        each_param!(self, p => p.label())
    }

    pub fn evaluate_on_change(&self) -> bool {
        each_param!(self, p => p.evaluate_on_change())
    }

    pub fn param_type(&self) -> ParamType {
        match self {
            Param::Integer(_) => ParamType::Integer,
            Param::Double(_) => ParamType::Double,
            Param::Boolean(_) => ParamType::Boolean,
            Param::String(_) => ParamType::String,
            Param::Choice(_) => ParamType::Choice,
        }
    }

    /// Current value as a property value.
    pub fn value(&self) -> AttrValue {
        match self {
            Param::Integer(p) => IntKind::to_attr(&p.value),
            Param::Double(p) => DoubleKind::to_attr(&p.value),
            Param::Boolean(p) => BoolKind::to_attr(&p.value),
            Param::String(p) => StringKind::to_attr(&p.value),
            Param::Choice(p) => ChoiceKind::to_attr(&p.value),
        }
    }

    /// Untyped setter; the value must match the param kind.
    pub fn set_value(&mut self, v: &AttrValue, reason: ChangeReason) -> HostResult<()> {
        let found = v.type_name();
        let mismatch = |expected: ParamType| HostError::TypeMismatch {
            expected: expected.name(),
            found,
        };
        match self {
            Param::Integer(p) => p.set(IntKind::from_attr(v).ok_or_else(|| mismatch(ParamType::Integer))?, reason),
            Param::Double(p) => p.set(DoubleKind::from_attr(v).ok_or_else(|| mismatch(ParamType::Double))?, reason),
            Param::Boolean(p) => p.set(BoolKind::from_attr(v).ok_or_else(|| mismatch(ParamType::Boolean))?, reason),
            Param::String(p) => p.set(StringKind::from_attr(v).ok_or_else(|| mismatch(ParamType::String))?, reason),
            Param::Choice(p) => p.set(ChoiceKind::from_attr(v).ok_or_else(|| mismatch(ParamType::Choice))?, reason),
        }
        Ok(())
    }

    /// Copy the value of a param of the same kind, without notification.
    pub fn copy_from(&mut self, other: &Param) -> HostResult<()> {
        match (self, other) {
            (Param::Integer(a), Param::Integer(b)) => a.copy_from(b),
            (Param::Double(a), Param::Double(b)) => a.copy_from(b),
            (Param::Boolean(a), Param::Boolean(b)) => a.copy_from(b),
            (Param::String(a), Param::String(b)) => a.copy_from(b),
            (Param::Choice(a), Param::Choice(b)) => a.copy_from(b),
            (a, b) => {
                return Err(HostError::TypeMismatch {
                    expected: a.param_type().name(),
                    found: b.param_type().name(),
                });
            }
        }
        Ok(())
    }

    pub fn as_integer(&self) -> HostResult<&IntegerParam> {
        match self {
            Param::Integer(p) => Ok(p),
            other => Err(other.mismatch(ParamType::Integer)),
        }
    }

    pub fn as_integer_mut(&mut self) -> HostResult<&mut IntegerParam> {
        match self {
            Param::Integer(p) => Ok(p),
            other => Err(other.mismatch(ParamType::Integer)),
        }
    }

    pub fn as_double(&self) -> HostResult<&DoubleParam> {
        match self {
            Param::Double(p) => Ok(p),
            other => Err(other.mismatch(ParamType::Double)),
        }
    }

    pub fn as_double_mut(&mut self) -> HostResult<&mut DoubleParam> {
        match self {
            Param::Double(p) => Ok(p),
            other => Err(other.mismatch(ParamType::Double)),
        }
    }

    pub fn as_boolean(&self) -> HostResult<&BooleanParam> {
        match self {
            Param::Boolean(p) => Ok(p),
            other => Err(other.mismatch(ParamType::Boolean)),
        }
    }

    pub fn as_boolean_mut(&mut self) -> HostResult<&mut BooleanParam> {
        match self {
            Param::Boolean(p) => Ok(p),
            other => Err(other.mismatch(ParamType::Boolean)),
        }
    }

    pub fn as_string(&self) -> HostResult<&StringParam> {
        match self {
            Param::String(p) => Ok(p),
            other => Err(other.mismatch(ParamType::String)),
        }
    }

    pub fn as_string_mut(&mut self) -> HostResult<&mut StringParam> {
        match self {
            Param::String(p) => Ok(p),
            other => Err(other.mismatch(ParamType::String)),
        }
    }

    pub fn as_choice(&self) -> HostResult<&ChoiceParam> {
        match self {
            Param::Choice(p) => Ok(p),
            other => Err(other.mismatch(ParamType::Choice)),
        }
    }

    pub fn as_choice_mut(&mut self) -> HostResult<&mut ChoiceParam> {
        match self {
            Param::Choice(p) => Ok(p),
            other => Err(other.mismatch(ParamType::Choice)),
        }
    }

    fn mismatch(&self, expected: ParamType) -> HostError {
        HostError::TypeMismatch {
            expected: expected.name(),
            found: self.param_type().name(),
        }
    }

    fn attach(&mut self, node: Uuid, emitter: NodeEventEmitter, state: SharedState) {
        each_param!(self, p => p.attach(node, emitter, state))
    }
}

/// Ordered parameters of one node.
#[derive(Debug, Default)]
pub struct ParamSet {
    node: Uuid,
    params: IndexMap<String, Param>,
    emitter: NodeEventEmitter,
    state: SharedState,
}

/// The copy starts with no open edit and nothing dirty.
impl Clone for ParamSet {
    fn clone(&self) -> Self {
        let mut copy = Self {
            node: self.node,
            params: self.params.clone(),
            emitter: self.emitter.clone(),
            state: SharedState::default(),
        };
        copy.bind();
        copy
    }
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every descriptor. Param names must be unique.
    pub fn from_descriptors(node: Uuid, descriptors: &[ParamDescriptor]) -> HostResult<Self> {
        let mut params = IndexMap::with_capacity(descriptors.len());
        for desc in descriptors {
            if params.contains_key(&desc.name) {
                return Err(HostError::connection(format!("duplicate param `{}`", desc.name)));
            }
            params.insert(desc.name.clone(), Param::from_descriptor(node, desc)?);
        }
        let mut set = Self {
            node,
            params,
            ..Self::default()
        };
        set.bind();
        Ok(set)
    }

    fn bind(&mut self) {
        for p in self.params.values_mut() {
            p.attach(self.node, self.emitter.clone(), Arc::clone(&self.state));
        }
    }

    pub fn get(&self, name: &str) -> HostResult<&Param> {
        self.params
            .get(name)
            .ok_or_else(|| HostError::not_found(format!("param `{}`", name)))
    }

    pub fn get_mut(&mut self, name: &str) -> HostResult<&mut Param> {
        self.params
            .get_mut(name)
            .ok_or_else(|| HostError::not_found(format!("param `{}`", name)))
    }

    pub fn by_index(&self, index: usize) -> HostResult<&Param> {
        self.params
            .get_index(index)
            .map(|(_, p)| p)
            .ok_or_else(|| HostError::not_found(format!("param #{}", index)))
    }

    pub fn by_index_mut(&mut self, index: usize) -> HostResult<&mut Param> {
        self.params
            .get_index_mut(index)
            .map(|(_, p)| p)
            .ok_or_else(|| HostError::not_found(format!("param #{}", index)))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Params in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.values()
    }

    /// Snapshot of (name, value) in declaration order.
    pub fn values(&self) -> Vec<(String, AttrValue)> {
        self.params
            .iter()
            .map(|(k, p)| (k.clone(), p.value()))
            .collect()
    }

    /// Copy every same-named param from `other`. Params missing in `other`
    /// keep their value; a kind mismatch fails before anything is copied.
    pub fn copy_from(&mut self, other: &ParamSet) -> HostResult<()> {
        for (name, p) in &self.params {
            if let Some(o) = other.params.get(name) {
                if p.param_type() != o.param_type() {
                    return Err(HostError::TypeMismatch {
                        expected: p.param_type().name(),
                        found: o.param_type().name(),
                    });
                }
            }
        }
        for (name, p) in self.params.iter_mut() {
            if let Some(o) = other.params.get(name) {
                p.copy_from(o)?;
            }
        }
        Ok(())
    }

    /// Bind every param to its owning node and notification channel.
    pub fn attach(&mut self, node: Uuid, emitter: NodeEventEmitter) {
        self.node = node;
        self.emitter = emitter;
        self.bind();
    }

    /// Open an edit group. Changes are held until `edit_end`; groups do not
    /// nest.
    pub fn edit_begin(&mut self, label: impl Into<String>) -> HostResult<()> {
        let label = label.into();
        let mut state = lock(&self.state);
        if let Some(open) = &state.edit {
            return Err(HostError::Other(anyhow!(
                "param edit `{}` started while `{}` is open",
                label,
                open.label
            )));
        }
        state.edit = Some(EditGroup {
            label,
            pending: Vec::new(),
        });
        Ok(())
    }

    /// Close the edit group and emit its changes, one per param.
    /// Returns how many were emitted.
    pub fn edit_end(&mut self) -> HostResult<usize> {
        let group = lock(&self.state)
            .edit
            .take()
            .ok_or_else(|| HostError::Other(anyhow!("no param edit in progress")))?;
        let count = group.pending.len();
        debug!("Param edit `{}` on {}: {} change(s)", group.label, self.node, count);
        for event in group.pending {
            self.emitter.emit(event);
        }
        Ok(count)
    }

    pub fn is_editing(&self) -> bool {
        lock(&self.state).edit.is_some()
    }

    /// True once after an evaluating param changed value.
    pub fn take_dirty(&self) -> bool {
        std::mem::take(&mut lock(&self.state).dirty)
    }
}
