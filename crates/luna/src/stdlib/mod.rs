// Native library registry. Arity is checked by the VM call path, so the
// handlers can index `args` directly.

mod io;
mod math;
mod string;

use crate::luna_vm::LunaVM;

pub fn open_libs(vm: &mut LunaVM) {
    vm.define_native("clock", 0, io::clock);
    vm.define_native("input", 0, io::input);
    vm.define_native("write", 2, io::write);
    vm.define_native("open", 1, io::open);

    vm.define_native("sqrt", 1, math::sqrt);
    vm.define_native("pow", 2, math::pow);
    vm.define_native("sin", 1, math::sin);
    vm.define_native("cos", 1, math::cos);
    vm.define_native("tan", 1, math::tan);
    vm.define_native("random", 0, math::random);
    vm.define_native("to_number", 1, math::to_number);

    vm.define_native("str_length", 1, string::str_length);
    vm.define_native("char_at", 2, string::char_at);
    vm.define_native("substr", 3, string::substr);
}
