// Library registration: named modules of host functions installed into a
// VM's globals.

use crate::value::{HostContext, HostFunction, HostReturn, Table, Value};
use crate::vm::{ExecState, Vm, VmResult};

pub type LibFn = fn(&mut Vm, &mut ExecState, HostContext) -> VmResult<HostReturn>;

/// A named group of host functions. `"_G"` entries land directly in the
/// globals; any other name becomes a global table of that name.
pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibFn)>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> LibraryModule {
        LibraryModule {
            name,
            entries: Vec::new(),
        }
    }

    pub fn with_function(mut self, name: &'static str, func: LibFn) -> LibraryModule {
        self.entries.push((name, func));
        self
    }
}

/// Builder for library modules.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $item));
        )*
        module
    }};
}

/// Ordered collection of modules; installation preserves registration
/// order.
pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> LibraryRegistry {
        LibraryRegistry {
            modules: Vec::new(),
        }
    }

    /// The modules every stock VM starts with.
    pub fn standard() -> LibraryRegistry {
        let mut registry = LibraryRegistry::new();
        registry.register(crate::stdlib::base::create_base_lib());
        registry.register(crate::stdlib::coroutine::create_coroutine_lib());
        registry
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    pub fn install(&self, vm: &mut Vm) {
        for module in &self.modules {
            install_module(vm, module);
        }
    }

    pub fn get_module(&self, name: &str) -> Option<&LibraryModule> {
        self.modules.iter().find(|m| m.name == name)
    }
}

impl Default for LibraryRegistry {
    fn default() -> LibraryRegistry {
        LibraryRegistry::new()
    }
}

fn install_module(vm: &mut Vm, module: &LibraryModule) {
    if module.name == "_G" {
        for (name, func) in &module.entries {
            vm.set_global(name, Value::Host(HostFunction::new(*name, *func)));
        }
        return;
    }
    let table = Table::new();
    let table = std::rc::Rc::new(std::cell::RefCell::new(table));
    for (name, func) in &module.entries {
        let full = format!("{}.{}", module.name, name);
        // string keys are never nil or NaN
        let _ = table.borrow_mut().raw_set(
            Value::string(*name),
            Value::Host(HostFunction::new(full, *func)),
        );
    }
    vm.set_global(module.name, Value::Table(table.clone()));
    // modules double as preloaded entries for `require`
    vm.loaded
        .insert(module.name.into(), Value::Table(table));
}
