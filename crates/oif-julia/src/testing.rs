//! In-process stand-in for the embedded runtime.
//!
//! Mimics the behaviour the adapter depends on: `include`/`import` source
//! text, a pending-exception flag that short-circuits calls until cleared,
//! and a pin stack that panics when released out of order.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

use crate::error::DispatchError;
use crate::runtime::EmbeddedRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleId(usize);

#[derive(Debug, Clone)]
pub enum Object {
    Nothing,
    Float(f64),
    Int(i64),
    Array { data: NonNull<f64>, len: usize },
    Exception(String),
    Function { module: usize, index: usize },
}

pub type Callee = Rc<dyn Fn(&ScriptedRuntime, &[ValueId]) -> Result<ValueId, String>>;

pub fn callee(f: impl Fn(&ScriptedRuntime, &[ValueId]) -> Result<ValueId, String> + 'static) -> Callee {
    Rc::new(f)
}

struct ModuleDef {
    name: String,
    functions: Vec<(String, Callee)>,
    constants: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedRuntime {
    heap: RefCell<Vec<Object>>,
    pins: RefCell<Vec<ValueId>>,
    pin_total: Cell<usize>,
    unpin_total: Cell<usize>,
    pending: Cell<Option<ValueId>>,
    described: Cell<usize>,
    cleared: Cell<usize>,
    initialized: Cell<usize>,
    finalized: Cell<usize>,
    sources: HashMap<String, usize>,
    modules: Vec<ModuleDef>,
    defined: RefCell<HashMap<String, usize>>,
    imported: RefCell<HashMap<String, ModuleId>>,
    evaluated: RefCell<Vec<String>>,
    looked_up: RefCell<Vec<String>>,
    fail_pin_at: Option<usize>,
    fail_reads: bool,
    reads: Cell<usize>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime where `include("<root>/qeq_solver.jl")` defines `QeqSolver`.
    pub fn with_qeq_solver(root: &str) -> Self {
        Self::new().with_source(
            &format!("{root}/qeq_solver.jl"),
            "QeqSolver",
            vec![
                ("solve!", callee(solve_in_place)),
                ("fail!", callee(|_, _| {
                    Err("DomainError with -1.0: sqrt was called with a negative real argument".into())
                })),
                ("status!", callee(|rt, _| Ok(rt.alloc(Object::Int(3))))),
                ("nothing!", callee(|rt, _| Ok(rt.alloc(Object::Nothing)))),
                ("version", callee(|rt, _| Ok(rt.alloc(Object::Int(0))))),
            ],
        )
        .with_constant("QeqSolver", "tolerance")
    }

    pub fn with_source(mut self, path: &str, module: &str, functions: Vec<(&str, Callee)>) -> Self {
        let functions = functions
            .into_iter()
            .map(|(name, f)| (name.to_string(), f))
            .collect();
        self.modules.push(ModuleDef {
            name: module.to_string(),
            functions,
            constants: Vec::new(),
        });
        self.sources.insert(path.to_string(), self.modules.len() - 1);
        self
    }

    /// Bind a non-callable constant in an already registered module.
    pub fn with_constant(mut self, module: &str, name: &str) -> Self {
        if let Some(def) = self.modules.iter_mut().find(|m| m.name == module) {
            def.constants.push(name.to_string());
        }
        self
    }

    /// Make every array read-back raise inside the runtime.
    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Make the `n`-th pin (0-based) fail as if the runtime ran out of memory.
    pub fn failing_pin_at(mut self, n: usize) -> Self {
        self.fail_pin_at = Some(n);
        self
    }

    pub fn alloc(&self, object: Object) -> ValueId {
        let mut heap = self.heap.borrow_mut();
        heap.push(object);
        ValueId(heap.len() - 1)
    }

    pub fn object(&self, value: ValueId) -> Object {
        self.heap.borrow()[value.0].clone()
    }

    pub fn float(&self, value: ValueId) -> Result<f64, String> {
        match self.object(value) {
            Object::Float(v) => Ok(v),
            other => Err(format!("MethodError: expected Float64, got {other:?}")),
        }
    }

    pub fn raise(&self, message: &str) {
        let exc = self.alloc(Object::Exception(message.to_string()));
        self.pending.set(Some(exc));
    }

    pub fn outstanding_pins(&self) -> usize {
        self.pins.borrow().len()
    }

    pub fn pin_total(&self) -> usize {
        self.pin_total.get()
    }

    pub fn unpin_total(&self) -> usize {
        self.unpin_total.get()
    }

    pub fn described(&self) -> usize {
        self.described.get()
    }

    pub fn cleared(&self) -> usize {
        self.cleared.get()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.get().is_some()
    }

    pub fn init_count(&self) -> usize {
        self.initialized.get()
    }

    pub fn finalize_count(&self) -> usize {
        self.finalized.get()
    }

    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.borrow().clone()
    }

    pub fn looked_up(&self) -> Vec<String> {
        self.looked_up.borrow().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

struct ErrorCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Run `f` with every level enabled on this thread and count the ERROR events
/// it emits.
pub fn count_errors<T>(f: impl FnOnce() -> T) -> (T, usize) {
    let errors = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(ErrorCounter(Arc::clone(&errors)));
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, errors.load(Ordering::SeqCst))
}

fn solve_in_place(rt: &ScriptedRuntime, args: &[ValueId]) -> Result<ValueId, String> {
    let [a, b, c, roots] = args else {
        return Err(format!("MethodError: solve! called with {} arguments", args.len()));
    };
    let (a, b, c) = (rt.float(*a)?, rt.float(*b)?, rt.float(*c)?);
    let Object::Array { data, len } = rt.object(*roots) else {
        return Err("MethodError: roots is not an array".into());
    };
    if len < 2 {
        return Err(format!("BoundsError: roots has length {len}"));
    }
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return Err("DomainError: complex roots".into());
    }
    let sqrt_d = discriminant.sqrt();
    // SAFETY: the array view covers `len >= 2` caller-owned elements.
    unsafe {
        *data.as_ptr() = (-b + sqrt_d) / (2.0 * a);
        *data.as_ptr().add(1) = (-b - sqrt_d) / (2.0 * a);
    }
    Ok(rt.alloc(Object::Int(0)))
}

impl EmbeddedRuntime for ScriptedRuntime {
    type Value = ValueId;
    type Module = ModuleId;

    fn initialize(&self) -> Result<(), DispatchError> {
        self.initialized.set(self.initialized.get() + 1);
        Ok(())
    }

    fn finalize(&self) {
        self.finalized.set(self.finalized.get() + 1);
    }

    fn eval(&self, source: &str) -> Option<ValueId> {
        self.evaluated.borrow_mut().push(source.to_string());
        if self.has_pending() {
            return None;
        }

        if let Some(literal) = source
            .strip_prefix("include(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let path = literal.trim_matches('"').replace("\\\"", "\"").replace("\\$", "$");
            return match self.sources.get(&path) {
                Some(&idx) => {
                    let name = self.modules[idx].name.clone();
                    self.defined.borrow_mut().insert(name, idx);
                    Some(self.alloc(Object::Nothing))
                }
                None => {
                    self.raise(&format!("SystemError: opening file \"{path}\": No such file or directory"));
                    None
                }
            };
        }

        if let Some(name) = source.strip_prefix("import .") {
            let defined = self.defined.borrow().get(name).copied();
            return match defined {
                Some(idx) => {
                    self.imported.borrow_mut().insert(name.to_string(), ModuleId(idx));
                    Some(self.alloc(Object::Nothing))
                }
                None => {
                    self.raise(&format!("UndefVarError: `{name}` not defined in `Main`"));
                    None
                }
            };
        }

        self.raise(&format!("ParseError: cannot evaluate {source:?}"));
        None
    }

    fn lookup_module(&self, name: &str) -> Option<ModuleId> {
        self.imported.borrow().get(name).copied()
    }

    fn lookup_function(&self, module: ModuleId, name: &str) -> Option<ValueId> {
        self.looked_up.borrow_mut().push(name.to_string());
        let def = &self.modules[module.0];
        if let Some(index) = def.functions.iter().position(|(n, _)| n == name) {
            return Some(self.alloc(Object::Function {
                module: module.0,
                index,
            }));
        }
        if def.constants.iter().any(|n| n == name) {
            tracing::debug!(name, "Binding is not callable");
        }
        None
    }

    fn box_f64(&self, value: f64) -> Option<ValueId> {
        Some(self.alloc(Object::Float(value)))
    }

    fn unbox_f64(&self, value: ValueId) -> Option<f64> {
        self.float(value).ok()
    }

    unsafe fn wrap_f64_array(&self, data: NonNull<f64>, len: usize) -> Option<ValueId> {
        Some(self.alloc(Object::Array { data, len }))
    }

    fn read_f64_array(&self, value: ValueId) -> Option<Vec<f64>> {
        self.reads.set(self.reads.get() + 1);
        if self.fail_reads {
            self.raise("BoundsError: attempt to access array");
            return None;
        }
        match self.object(value) {
            // SAFETY: wrap_f64_array's contract keeps the buffer alive.
            Object::Array { data, len } => {
                Some(unsafe { std::slice::from_raw_parts(data.as_ptr(), len) }.to_vec())
            }
            _ => None,
        }
    }

    fn pin(&self, value: ValueId) -> Result<(), DispatchError> {
        if self.fail_pin_at == Some(self.pin_total.get()) {
            return Err(DispatchError::AllocationFailed("pin stack exhausted".into()));
        }
        self.pin_total.set(self.pin_total.get() + 1);
        self.pins.borrow_mut().push(value);
        Ok(())
    }

    fn unpin(&self, value: ValueId) {
        let top = self.pins.borrow_mut().pop();
        assert_eq!(top, Some(value), "pins must be released in reverse order");
        self.unpin_total.set(self.unpin_total.get() + 1);
    }

    fn call(&self, function: ValueId, args: &[ValueId]) -> Option<ValueId> {
        if self.has_pending() {
            return None;
        }
        let Object::Function { module, index } = self.object(function) else {
            self.raise("MethodError: objects of this type are not callable");
            return None;
        };
        let f = self.modules[module].functions[index].1.clone();
        match f(self, args) {
            Ok(value) => Some(value),
            Err(message) => {
                self.raise(&message);
                None
            }
        }
    }

    fn unbox_i64(&self, value: ValueId) -> Option<i64> {
        match self.object(value) {
            Object::Int(v) => Some(v),
            _ => None,
        }
    }

    fn type_name(&self, value: ValueId) -> String {
        match self.object(value) {
            Object::Nothing => "Nothing",
            Object::Float(_) => "Float64",
            Object::Int(_) => "Int64",
            Object::Array { .. } => "Vector{Float64}",
            Object::Exception(_) => "ErrorException",
            Object::Function { .. } => "Function",
        }
        .to_string()
    }

    fn pending_exception(&self) -> Option<ValueId> {
        self.pending.get()
    }

    fn describe_exception(&self, exception: ValueId) -> String {
        self.described.set(self.described.get() + 1);
        match self.object(exception) {
            Object::Exception(message) => message,
            other => format!("{other:?}"),
        }
    }

    fn clear_exception(&self) {
        self.cleared.set(self.cleared.get() + 1);
        self.pending.set(None);
    }
}
