//! Principal-type tests: the inferred scheme of each declaration, as the
//! session prints it.

use morel::Session;
use pretty_assertions::assert_eq;

fn type_of(source: &str) -> String {
    let mut session = Session::new();
    let output = session
        .execute(source, "test")
        .unwrap_or_else(|e| panic!("{source:?} failed: {e}"));
    let last = output.lines().last().unwrap_or_default();
    last.split(" : ")
        .nth(1)
        .unwrap_or_else(|| panic!("no type in {last:?}"))
        .to_owned()
}

#[test]
fn polymorphic_schemes() {
    assert_eq!(type_of("fun id x = x;"), "'a -> 'a");
    assert_eq!(type_of("fun const x y = x;"), "'a -> 'b -> 'a");
    assert_eq!(type_of("fun twice f x = f (f x);"), "('a -> 'a) -> 'a -> 'a");
    assert_eq!(type_of("fn (x, y) => x;"), "'a * 'b -> 'a");
}

#[test]
fn list_functions() {
    assert_eq!(
        type_of("fun append ([], ys) = ys | append (x :: xs, ys) = x :: append (xs, ys);"),
        "'a list * 'a list -> 'a list"
    );
    assert_eq!(type_of("fun heads xs = map hd xs;"), "'a list list -> 'a list");
}

#[test]
fn generalization_is_per_let_binding() {
    // id generalizes inside the let and is used at two types
    assert_eq!(
        type_of("let val id = fn x => x in (id 1, id \"s\") end;"),
        "int * string"
    );
}

#[test]
fn monomorphic_inference_flows_through_operators() {
    assert_eq!(type_of("fun inc x = x + 1;"), "int -> int");
    assert_eq!(type_of("fun half x = x / 2.0;"), "real -> real");
    assert_eq!(type_of("fun shout s = s ^ \"!\";"), "string -> string");
}

#[test]
fn queries_have_list_types() {
    assert_eq!(type_of("from x in [1,2,3] yield x * 2;"), "int list");
    assert_eq!(
        type_of("from x in [1,2] yield {double = x * 2, x};"),
        "{double:int, x:int} list"
    );
    assert_eq!(type_of("from;"), "unit list");
}

#[test]
fn annotations_constrain() {
    assert_eq!(type_of("fn x => (x : int);"), "int -> int");
    assert_eq!(type_of("val xs : int list = [];"), "int list");
}

#[test]
fn type_aliases_expand() {
    assert_eq!(
        type_of("type point = int * int; fun origin () = (0, 0) : point;"),
        "unit -> int * int"
    );
}

#[test]
fn equality_constraints_propagate() {
    // polymorphic equality keeps its argument an equality type
    assert_eq!(type_of("fun same (x, y) = x = y;"), "''a * ''a -> bool");
}

#[test]
fn no_free_variables_escape_generalization() {
    // every variable in a top-level scheme is quantified, starting at 'a
    assert_eq!(type_of("val l = [];"), "'a list");
    assert_eq!(type_of("fun pair x y = (x, y);"), "'a -> 'b -> 'a * 'b");
    assert_eq!(type_of("fun flat xss = List.concat xss;"), "'a list list -> 'a list");
}
