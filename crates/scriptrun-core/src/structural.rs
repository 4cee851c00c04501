//! Capability scan over a module's declared types.
//!
//! A compiled module is reflected into a [`ModuleDescriptor`]: named types,
//! each with methods and their parameter names. The scan picks the entry
//! point the host asked for by shape alone, so modules never link against a
//! host SDK.

/// Value types a reflected method may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
    I32,
    I64,
    F32,
    F64,
}

impl Scalar {
    /// Integer types can carry a host handle.
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::I32 | Self::I64)
    }
}

/// One exported function, grouped under its type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    /// Export name used to call it (`Type.method`).
    pub export: String,
    pub params: Vec<String>,
    /// Parallel to `params`.
    pub param_types: Vec<Scalar>,
    pub results: Vec<Scalar>,
}

impl MethodDescriptor {
    /// A method whose first parameter is `self` takes an instance handle.
    pub fn is_static(&self) -> bool {
        self.params.first().is_none_or(|first| first != "self")
    }

    /// Event-handler shape: exactly `(sender, e)` or `(sender, args)`, both
    /// able to carry a handle.
    pub fn is_event_handler(&self) -> bool {
        let named = match self.params.as_slice() {
            [sender, args] => sender == "sender" && (args == "e" || args == "args"),
            _ => false,
        };
        named && self.param_types.len() == 2 && self.param_types.iter().all(|ty| ty.is_integer())
    }

    fn has_signature(&self, params: &[Scalar], results: &[Scalar]) -> bool {
        self.param_types == params && self.results == results
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl TypeDescriptor {
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|method| method.name == name)
    }

    /// `execute(self: i32) -> i32`.
    pub fn entry(&self) -> Option<&MethodDescriptor> {
        self.method("execute")
            .filter(|method| method.has_signature(&[Scalar::I32], &[Scalar::I32]))
    }

    /// Optional `new() -> i32`.
    pub fn constructor(&self) -> Option<&MethodDescriptor> {
        self.method("new")
            .filter(|method| method.has_signature(&[], &[Scalar::I32]))
    }

    /// Whether the type fulfils the command contract.
    pub fn is_command(&self) -> bool {
        self.entry().is_some()
    }
}

/// A type that could be reflected, or the reason it could not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeSlot {
    Loaded(TypeDescriptor),
    Failed { name: String, reason: String },
}

impl TypeSlot {
    pub fn name(&self) -> &str {
        match self {
            Self::Loaded(ty) => &ty.name,
            Self::Failed { name, .. } => name,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub name: String,
    pub types: Vec<TypeSlot>,
}

impl ModuleDescriptor {
    /// Types that loaded, in declaration order. Failed slots are skipped.
    pub fn loaded_types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.iter().filter_map(|slot| match slot {
            TypeSlot::Loaded(ty) => Some(ty),
            TypeSlot::Failed { .. } => None,
        })
    }

    pub fn failed_types(&self) -> impl Iterator<Item = (&str, &str)> {
        self.types.iter().filter_map(|slot| match slot {
            TypeSlot::Failed { name, reason } => Some((name.as_str(), reason.as_str())),
            TypeSlot::Loaded(_) => None,
        })
    }
}

/// First command-capable type. With `required`, only that type qualifies.
pub fn find_command_type<'m>(
    module: &'m ModuleDescriptor,
    required: Option<&str>,
) -> Option<&'m TypeDescriptor> {
    module
        .loaded_types()
        .filter(|ty| required.is_none_or(|name| ty.name == name))
        .find(|ty| ty.is_command())
}

/// First method, across all loaded types, shaped like an event handler.
pub fn find_event_handler(
    module: &ModuleDescriptor,
) -> Option<(&TypeDescriptor, &MethodDescriptor)> {
    module.loaded_types().find_map(|ty| {
        ty.methods
            .iter()
            .find(|method| method.is_event_handler())
            .map(|method| (ty, method))
    })
}
