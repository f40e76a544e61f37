use crate::gc::GcPhase;
use crate::luna_value::LunaValue;
use crate::luna_vm::LunaVM;
use crate::luna_vm::luna_limits::GC_ROOT_CHUNK;

#[test]
fn test_string_interning_identity() {
    let mut vm = LunaVM::new();
    let a = vm.copy_string("interned content");
    let b = vm.copy_string("interned content");
    let c = vm.copy_string("other content");
    assert_eq!(a, b);
    assert_ne!(a, c);

    // The take path dedupes against the copy path too.
    let d = vm.take_string("interned content".to_string());
    assert_eq!(a, d);
}

#[test]
fn test_full_cycle_collects_unreachable_strings() {
    let mut vm = LunaVM::new();
    vm.collect_all_garbage();
    // Park the threshold so the loop below cannot wake the collector.
    vm.gc.set_next_gc(usize::MAX);
    let live_before = vm.pool().len();

    for i in 0..100 {
        vm.copy_string(&format!("garbage string number {}", i));
    }
    assert_eq!(vm.pool().len(), live_before + 100);

    // Nothing roots these strings; the interner alone does not keep
    // them alive.
    vm.collect_all_garbage();
    assert_eq!(vm.pool().len(), live_before);
    assert!(vm.gc.stats.objects_collected >= 100);
}

#[test]
fn test_reachable_objects_survive_with_clean_bits() {
    let mut vm = LunaVM::new();
    vm.interpret("test", "var keep = \"a rooted string value\"")
        .expect("program failed");

    vm.collect_all_garbage();

    let value = vm.get_global("keep").expect("global disappeared");
    let LunaValue::Object(id) = value else {
        panic!("global is not an object");
    };
    let header = &vm.pool().get(id).header;
    assert!(!header.marked);
    assert!(!header.on_current_cycle);
    assert_eq!(vm.value_as_str(value).as_deref(), Some("a rooted string value"));
}

#[test]
fn test_mid_cycle_allocation_survives_the_cycle() {
    let mut vm = LunaVM::new();
    vm.collect_all_garbage();

    // Kick off a cycle, then allocate while it is in flight.
    vm.collect_garbage();
    assert_eq!(vm.gc.phase, GcPhase::Mark);
    let id = vm.copy_string("born during the cycle");

    while vm.gc.phase != GcPhase::Idle {
        vm.collect_garbage();
    }
    assert!(vm.pool().try_get(id).is_some());

    // The next full cycle stamps it as a participant and reclaims it.
    vm.collect_all_garbage();
    assert!(vm.pool().try_get(id).is_none());
}

#[test]
fn test_root_walk_is_chunked() {
    let mut vm = LunaVM::new();
    let mut source = String::new();
    for i in 0..100 {
        source.push_str(&format!("var g{} = {}\n", i, i));
    }
    vm.interpret("test", &source).expect("program failed");
    vm.collect_all_garbage();

    // One step begins the cycle, the next does one bounded slice. With
    // an empty stack and no frames, that slice lands in the globals
    // table and must not mark more than its chunk of entries.
    vm.collect_garbage();
    assert_eq!(vm.gc.phase, GcPhase::Mark);
    vm.collect_garbage();
    let marked = vm
        .pool()
        .iter()
        .filter(|(_, object)| object.header.marked)
        .count();
    assert!(marked <= GC_ROOT_CHUNK, "marked {} in one slice", marked);

    vm.collect_all_garbage();
}

#[test]
fn test_globals_table_is_a_root() {
    let mut vm = LunaVM::new();
    vm.open_libs();
    vm.collect_all_garbage();
    let live = vm.pool().len();

    // Native objects and their names live only through globals.
    vm.collect_all_garbage();
    assert_eq!(vm.pool().len(), live);
    assert!(vm.get_global("clock").is_some());
}

#[test]
fn test_init_string_survives_collection() {
    let mut vm = LunaVM::new();
    vm.collect_all_garbage();
    let a = vm.copy_string("init");
    vm.collect_all_garbage();
    let b = vm.copy_string("init");
    assert_eq!(a, b);
}

#[test]
fn test_stress_collection_during_compilation() {
    let mut vm = LunaVM::new();
    // Every allocation drives the collector, so compiler-held functions
    // and constants must survive through the compiler roots.
    vm.gc.set_next_gc(0);
    let source = "
def mk(prefix) {
    var suffix = \"!\"
    def shout(word) { return prefix + word + suffix }
    return shout
}
var shout = mk(\"hey \")
var line = shout(\"you\")
";
    vm.interpret("test", source).expect("program failed");
    let line = vm.get_global("line").expect("global disappeared");
    assert_eq!(vm.value_as_str(line).as_deref(), Some("hey you!"));
}

#[test]
fn test_stress_collection_during_execution() {
    let mut vm = LunaVM::new();
    vm.gc.set_next_gc(0);
    vm.capture_output();
    vm.interpret(
        "test",
        "
var acc = \"\"
for (var i = 0; i < 50; i = i + 1) {
    acc = acc + \"x\"
}
print acc
",
    )
    .expect("program failed");
    assert_eq!(vm.take_output(), "x".repeat(50));
}

#[test]
fn test_sweep_updates_stats() {
    let mut vm = LunaVM::new();
    vm.collect_all_garbage();
    let collected_before = vm.gc.stats.objects_collected;
    for i in 0..10 {
        vm.copy_string(&format!("ephemeral {}", i));
    }
    vm.collect_all_garbage();
    assert!(vm.gc.stats.objects_collected >= collected_before + 10);
    assert!(vm.gc.stats.bytes_freed > 0);
}

#[test]
fn test_instances_keep_their_fields_alive() {
    let mut vm = LunaVM::new();
    vm.interpret(
        "test",
        "
struct Holder;
var h = Holder()
h.payload = \"field payload\"
",
    )
    .expect("program failed");

    vm.collect_all_garbage();
    vm.collect_all_garbage();

    vm.capture_output();
    vm.interpret("again", "print h.payload").expect("program failed");
    assert_eq!(vm.take_output(), "field payload");
}

#[test]
fn test_list_elements_are_traced() {
    let mut vm = LunaVM::new();
    vm.interpret("test", "var l = [\"kept in a list\"]")
        .expect("program failed");

    vm.collect_all_garbage();
    vm.collect_all_garbage();

    let LunaValue::Object(list) = vm.get_global("l").expect("global disappeared") else {
        panic!("global is not an object");
    };
    let elements = &vm.pool().list(list).elements;
    assert_eq!(elements.len(), 1);
    let LunaValue::Object(element) = elements[0] else {
        panic!("element is not an object");
    };
    // Without list tracing the sweep would have freed the element.
    assert!(vm.pool().try_get(element).is_some());
    assert_eq!(vm.pool().string(element).as_str(), "kept in a list");
}
