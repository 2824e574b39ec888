//! Compile-time environments: one scope per function body, stored in an
//! arena and linked to their parent by handle.

use std::collections::HashMap;
use std::rc::Rc;

use cranelift_codegen::ir::{types, StackSlot};
use cranelift_module::FuncId;
use slips_types::{FuncType, NameTypes, ReprType};

/// Handle to a scope in `Environments`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(usize);

/// What the compiler knows about a function value.
#[derive(Debug, Clone, PartialEq)]
pub struct Callee {
    pub ty: FuncType,
    /// Cranelift function behind the value, when known at compile time.
    pub id: Option<FuncId>,
    /// The closure record may live in the current function's stack frame.
    pub frame_local: bool,
}

/// Compile-time kind of a bound value.
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Int,
    Bool,
    Func(Rc<Callee>),
}

impl Kind {
    /// Kind of a value whose only known type is `ty`. `Void` has no kind.
    pub fn from_repr(ty: &ReprType) -> Option<Kind> {
        match ty {
            ReprType::Int => Some(Kind::Int),
            ReprType::Bool => Some(Kind::Bool),
            ReprType::Void => None,
            ReprType::Func(ft) => Some(Kind::Func(Rc::new(Callee {
                ty: ft.clone(),
                id: None,
                frame_local: true,
            }))),
        }
    }

    pub fn repr(&self) -> ReprType {
        match self {
            Kind::Int => ReprType::Int,
            Kind::Bool => ReprType::Bool,
            Kind::Func(callee) => ReprType::Func(callee.ty.clone()),
        }
    }

    pub fn clif_type(&self) -> types::Type {
        match self {
            Kind::Int | Kind::Func(_) => types::I64,
            Kind::Bool => types::I8,
        }
    }

    /// The kind as seen from a nested function that captured it. A closure
    /// record reached through a capture never lives in the capturing frame.
    pub fn captured(&self) -> Kind {
        match self {
            Kind::Func(callee) if callee.frame_local => Kind::Func(Rc::new(Callee {
                frame_local: false,
                ..callee.as_ref().clone()
            })),
            other => other.clone(),
        }
    }
}

/// How a name resolves within one scope.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Stack slot written by a `def`.
    Defined { slot: StackSlot, kind: Kind },
    /// The function's `index`-th formal parameter (always an int).
    Parameter { index: usize },
    /// Word `index` of the captured values in the function's closure record.
    Capture { index: usize, kind: Kind },
}

impl Binding {
    pub fn kind(&self) -> Kind {
        match self {
            Binding::Defined { kind, .. } | Binding::Capture { kind, .. } => kind.clone(),
            Binding::Parameter { .. } => Kind::Int,
        }
    }
}

#[derive(Debug)]
struct Scope {
    /// Frame name; also the symbol of the function compiled in this scope.
    name: String,
    parent: Option<EnvId>,
    bindings: HashMap<String, Binding>,
}

/// Arena of scopes plus the program-wide name counter.
#[derive(Debug, Default)]
pub struct Environments {
    scopes: Vec<Scope>,
    counter: u32,
}

impl Environments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scope with no parent.
    pub fn root(&mut self, name: &str) -> EnvId {
        self.push(name, None)
    }

    /// Create a scope whose lookups fall back to `parent`.
    pub fn child(&mut self, parent: EnvId, name: &str) -> EnvId {
        self.push(name, Some(parent))
    }

    fn push(&mut self, name: &str, parent: Option<EnvId>) -> EnvId {
        let id = EnvId(self.scopes.len());
        self.scopes.push(Scope {
            name: name.to_string(),
            parent,
            bindings: HashMap::new(),
        });
        id
    }

    /// Drop `env` and every scope created after it. Scopes are released in
    /// the reverse order of their creation, once their body is compiled.
    pub fn release(&mut self, env: EnvId) {
        self.scopes.truncate(env.0);
    }

    /// Bind `name` in `env`, replacing any previous binding in that scope.
    pub fn define(&mut self, env: EnvId, name: &str, binding: Binding) {
        self.scopes[env.0]
            .bindings
            .insert(name.to_string(), binding);
    }

    /// Walk from `env` outwards. Returns how many scopes out the binding was
    /// found (0 = `env` itself) together with the binding.
    pub fn lookup(&self, env: EnvId, name: &str) -> Option<(usize, &Binding)> {
        let mut current = Some(env);
        let mut depth = 0;
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if let Some(binding) = scope.bindings.get(name) {
                return Some((depth, binding));
            }
            current = scope.parent;
            depth += 1;
        }
        None
    }

    pub fn frame_name(&self, env: EnvId) -> &str {
        &self.scopes[env.0].name
    }

    /// Next value of the program-wide counter, starting at 1.
    pub fn next_count(&mut self) -> u32 {
        self.counter += 1;
        self.counter
    }

    /// Type-guessing view of `env`.
    pub fn view(&self, env: EnvId) -> EnvView<'_> {
        EnvView { envs: self, env }
    }
}

/// Recorded types of the names visible from one scope.
pub struct EnvView<'a> {
    envs: &'a Environments,
    env: EnvId,
}

impl NameTypes for EnvView<'_> {
    fn type_of(&self, name: &str) -> Option<ReprType> {
        self.envs
            .lookup(self.env, name)
            .map(|(_, binding)| binding.kind().repr())
    }
}
