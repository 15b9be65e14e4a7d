//! Command model and proposal descriptors.
//!
//! A [`Command`] describes one state mutation declaratively. Its arguments
//! are either a static list (which may contain `{symbol: name}` forward
//! references) or a pure function of the [`AddressRegistry`]. Either way they
//! are resolved immediately before the command is dispatched, never earlier
//! and never memoised, so each command sees the bindings produced by the
//! commands before it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use proposal_sandbox_types::value::wide_uint;
use proposal_sandbox_types::{encode_calldata, Address, MethodSignature, TaggedValueSeed, Value};

use crate::errors::SandboxError;
use crate::registry::AddressRegistry;

// ============================================================================
// Arguments
// ============================================================================

/// A single authored argument.
///
/// In files: a tagged literal (`{uint: 1000}`), a registry reference
/// (`{symbol: vault}`) or a list of args (`{list: [...]}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Arg {
    Symbol { symbol: String },
    List { list: Vec<Arg> },
    Literal(Value),
}

impl Arg {
    pub fn symbol(name: impl Into<String>) -> Self {
        Arg::Symbol {
            symbol: name.into(),
        }
    }

    pub fn resolve(&self, registry: &AddressRegistry) -> Result<Value, SandboxError> {
        match self {
            Arg::Symbol { symbol } => registry.resolve(symbol).map(Value::Address),
            Arg::List { list } => list
                .iter()
                .map(|arg| arg.resolve(registry))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Arg::Literal(value) => Ok(value.clone()),
        }
    }

    /// Every registry symbol this argument refers to.
    pub fn referenced_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Arg::Symbol { symbol } => {
                out.insert(symbol.clone());
            }
            Arg::List { list } => list.iter().for_each(|arg| arg.referenced_symbols(out)),
            Arg::Literal(_) => {}
        }
    }
}

// Dispatches on the single map key instead of trying each variant, so a
// literal's body is read straight from the input. Buffered untagged content
// has no slot for 128-bit integers.
impl<'de> Deserialize<'de> for Arg {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ArgVisitor;

        impl<'de> Visitor<'de> for ArgVisitor {
            type Value = Arg;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a single-key map such as {uint: 1000} or {symbol: vault}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Arg, A::Error> {
                let tag: String = map
                    .next_key()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let arg = match tag.as_str() {
                    "symbol" => Arg::Symbol {
                        symbol: map.next_value()?,
                    },
                    "list" => Arg::List {
                        list: map.next_value()?,
                    },
                    other => Arg::Literal(map.next_value_seed(TaggedValueSeed(other))?),
                };
                if let Some(extra) = map.next_key::<String>()? {
                    return Err(de::Error::custom(format!(
                        "argument has more than one key ('{}' and '{}')",
                        tag, extra
                    )));
                }
                Ok(arg)
            }
        }

        deserializer.deserialize_map(ArgVisitor)
    }
}

impl<T: Into<Value>> From<T> for Arg {
    fn from(value: T) -> Self {
        Arg::Literal(value.into())
    }
}

/// Pure function from the registry to an argument list.
pub type ArgumentResolver =
    dyn Fn(&AddressRegistry) -> Result<Vec<Value>, SandboxError> + Send + Sync;

/// Command arguments: static (possibly symbolic) or computed from the registry.
#[derive(Clone)]
pub enum Arguments {
    Static(Vec<Arg>),
    Resolver(Arc<ArgumentResolver>),
}

impl Arguments {
    pub fn resolver<F>(f: F) -> Self
    where
        F: Fn(&AddressRegistry) -> Result<Vec<Value>, SandboxError> + Send + Sync + 'static,
    {
        Arguments::Resolver(Arc::new(f))
    }

    /// Evaluate against the current registry.
    pub fn resolve(&self, registry: &AddressRegistry) -> Result<Vec<Value>, SandboxError> {
        match self {
            Arguments::Static(args) => args.iter().map(|arg| arg.resolve(registry)).collect(),
            Arguments::Resolver(resolver) => resolver(registry),
        }
    }

    /// Statically known symbol references. Resolver closures are opaque.
    pub fn referenced_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Arguments::Static(args) = self {
            args.iter().for_each(|arg| arg.referenced_symbols(&mut out));
        }
        out
    }
}

impl Default for Arguments {
    fn default() -> Self {
        Arguments::Static(Vec::new())
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arguments::Static(args) => f.debug_tuple("Static").field(args).finish(),
            Arguments::Resolver(_) => f.write_str("Resolver(<fn>)"),
        }
    }
}

impl Serialize for Arguments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Arguments::Static(args) => args.serialize(serializer),
            Arguments::Resolver(_) => Err(serde::ser::Error::custom(
                "argument resolvers cannot be serialized; resolve the command first",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for Arguments {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Arg>::deserialize(deserializer).map(Arguments::Static)
    }
}

// ============================================================================
// Registry effects
// ============================================================================

/// Explicit registry mutation applied after a command is included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RegistryEffect {
    /// Point `symbol` at whatever `source` currently resolves to.
    Rebind { symbol: String, source: String },
    /// Remove `symbol` from the registry.
    Unbind { symbol: String },
}

impl RegistryEffect {
    pub fn apply(&self, registry: &mut AddressRegistry) -> Result<(), SandboxError> {
        match self {
            RegistryEffect::Rebind { symbol, source } => {
                let address = registry.resolve(source)?;
                registry.bind(symbol.clone(), address);
            }
            RegistryEffect::Unbind { symbol } => {
                registry.unbind(symbol).ok_or_else(|| SandboxError::UnknownSymbol {
                    symbol: symbol.clone(),
                })?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Commands
// ============================================================================

/// One declarative state mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Registry symbol of the contract to call.
    pub target: String,
    /// Native amount sent with the call.
    #[serde(default, with = "wide_uint")]
    pub value: u128,
    pub method: MethodSignature,
    #[serde(default, rename = "args")]
    pub arguments: Arguments,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<RegistryEffect>,
}

impl Command {
    pub fn new(target: impl Into<String>, method: MethodSignature) -> Self {
        Self {
            target: target.into(),
            value: 0,
            method,
            arguments: Arguments::default(),
            description: String::new(),
            effects: Vec::new(),
        }
    }

    /// Build a command from a textual signature.
    pub fn parse(target: impl Into<String>, method: &str) -> anyhow::Result<Self> {
        Ok(Self::new(target, MethodSignature::parse(method)?))
    }

    pub fn with_args(mut self, args: Vec<Arg>) -> Self {
        self.arguments = Arguments::Static(args);
        self
    }

    pub fn with_resolver<F>(mut self, f: F) -> Self
    where
        F: Fn(&AddressRegistry) -> Result<Vec<Value>, SandboxError> + Send + Sync + 'static,
    {
        self.arguments = Arguments::resolver(f);
        self
    }

    pub fn with_value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_effect(mut self, effect: RegistryEffect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Resolve target and arguments against the registry as it is right now.
    ///
    /// The target is resolved first so a mistyped symbol fails before any
    /// argument resolver runs.
    pub fn resolve(
        &self,
        index: usize,
        registry: &AddressRegistry,
    ) -> Result<ResolvedAction, SandboxError> {
        let address = registry.resolve(&self.target)?;
        let args = self.arguments.resolve(registry)?;
        Ok(ResolvedAction {
            index,
            target: self.target.clone(),
            address,
            value: self.value,
            method: self.method.clone(),
            args,
            description: self.description.clone(),
        })
    }

    pub fn label(&self, index: usize) -> String {
        if self.description.is_empty() {
            format!("#{} {}.{}", index, self.target, self.method)
        } else {
            format!("#{} {}", index, self.description)
        }
    }
}

/// A command with every symbol resolved, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAction {
    pub index: usize,
    pub target: String,
    pub address: Address,
    #[serde(with = "wide_uint")]
    pub value: u128,
    pub method: MethodSignature,
    pub args: Vec<Value>,
    pub description: String,
}

impl ResolvedAction {
    pub fn calldata(&self) -> Vec<u8> {
        encode_calldata(&self.args)
    }

    /// Type errors the chain would reject this action for, if any.
    pub fn check(&self) -> Result<(), String> {
        if self.address.is_zero() {
            return Err(format!("target '{}' resolves to the zero address", self.target));
        }
        self.method.check_args(&self.args).map_err(|e| e.to_string())
    }
}

// ============================================================================
// Proposal descriptor
// ============================================================================

/// Ordered command list plus metadata. Immutable once published.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalDescriptor {
    pub title: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub commands: Vec<Command>,
}

impl ProposalDescriptor {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Sum of native value sent by all commands.
    pub fn total_value(&self) -> u128 {
        self.commands
            .iter()
            .fold(0u128, |acc, cmd| acc.saturating_add(cmd.value))
    }

    /// Distinct command targets, in symbol order.
    pub fn target_symbols(&self) -> BTreeSet<String> {
        self.commands.iter().map(|cmd| cmd.target.clone()).collect()
    }

    /// Resolve every command in order against a scratch copy of the registry,
    /// applying each command's registry effects before resolving the next.
    ///
    /// Used for previews and for governance batches, where all calldata must
    /// be fixed before anything executes.
    pub fn resolve_all(
        &self,
        registry: &AddressRegistry,
    ) -> Result<(Vec<ResolvedAction>, AddressRegistry), SandboxError> {
        let mut working = registry.clone();
        let mut actions = Vec::with_capacity(self.commands.len());
        for (index, command) in self.commands.iter().enumerate() {
            actions.push(command.resolve(index, &working)?);
            for effect in &command.effects {
                effect.apply(&mut working)?;
            }
        }
        Ok((actions, working))
    }
}
