//! End-to-end pipeline tests driving a `Session` the way the REPL does.

use morel::{MorelError, RuntimeError, Session, TypeErrorKind};
use pretty_assertions::assert_eq;

fn eval(session: &mut Session, source: &str) -> String {
    session
        .execute(source, "test")
        .unwrap_or_else(|e| panic!("{source:?} failed: {e}"))
}

fn eval_one(source: &str) -> String {
    let mut session = Session::new();
    // keep expected strings single-line regardless of their length
    session.config.line_width = 400;
    eval(&mut session, source)
}

fn eval_err(session: &mut Session, source: &str) -> MorelError {
    match session.execute(source, "test") {
        Ok(out) => panic!("{source:?} unexpectedly succeeded: {out}"),
        Err(e) => e,
    }
}

#[test]
fn arithmetic() {
    assert_eq!(eval_one("1 + 2 * 3;"), "val it = 7 : int");
    assert_eq!(eval_one("(1 + 2) * 3;"), "val it = 9 : int");
    assert_eq!(eval_one("7 div 2;"), "val it = 3 : int");
    assert_eq!(eval_one("~7 div 2;"), "val it = ~4 : int");
    assert_eq!(eval_one("7 mod ~2;"), "val it = ~1 : int");
    assert_eq!(eval_one("1.5 + 2.25;"), "val it = 3.75 : real");
    assert_eq!(eval_one("~3 + 7;"), "val it = 4 : int");
}

#[test]
fn recursion() {
    let mut session = Session::new();
    assert_eq!(
        eval(&mut session, "fun fact 0 = 1 | fact n = n * fact (n - 1);"),
        "val fact = fn : int -> int"
    );
    assert_eq!(eval(&mut session, "fact 5;"), "val it = 120 : int");
}

#[test]
fn mutual_recursion_in_let() {
    assert_eq!(
        eval_one(
            "let val rec even = fn 0 => true | n => odd (n - 1) \
             and odd = fn 0 => false | n => even (n - 1) \
             in even 10 end;"
        ),
        "val it = true : bool"
    );
}

#[test]
fn datatypes() {
    let mut session = Session::new();
    assert_eq!(
        eval(&mut session, "datatype 'a option = NONE | SOME of 'a;"),
        "datatype 'a option = NONE | SOME of 'a"
    );
    assert_eq!(
        eval(&mut session, "fun nvl NONE = 0 | nvl (SOME x) = x;"),
        "val nvl = fn : int option -> int"
    );
    assert_eq!(eval(&mut session, "nvl (SOME 7);"), "val it = 7 : int");
    assert_eq!(eval(&mut session, "nvl NONE;"), "val it = 0 : int");
    assert_eq!(
        eval(&mut session, "SOME (SOME 1);"),
        "val it = SOME (SOME 1) : int option option"
    );
}

#[test]
fn recursive_datatype() {
    let mut session = Session::new();
    eval(&mut session, "datatype tree = LEAF of int | NODE of tree * tree;");
    assert_eq!(
        eval(
            &mut session,
            "fun total (LEAF n) = n | total (NODE (l, r)) = total l + total r;"
        ),
        "val total = fn : tree -> int"
    );
    assert_eq!(
        eval(&mut session, "total (NODE (LEAF 1, NODE (LEAF 2, LEAF 3)));"),
        "val it = 6 : int"
    );
}

#[test]
fn let_polymorphism() {
    let mut session = Session::new();
    assert_eq!(
        eval(&mut session, "val id = fn x => x;"),
        "val id = fn : 'a -> 'a"
    );
    assert_eq!(eval(&mut session, "id 3;"), "val it = 3 : int");
    assert_eq!(eval(&mut session, "id \"s\";"), "val it = \"s\" : string");
}

#[test]
fn tuples_and_records() {
    assert_eq!(eval_one("#2 (7, \"abc\");"), "val it = \"abc\" : string");
    assert_eq!(
        eval_one("{b = true, a = 1};"),
        "val it = {a=1,b=true} : {a:int, b:bool}"
    );
    assert_eq!(
        eval_one("val r = {name = \"Fred\", age = 30}; #name r;"),
        "val r = {age=30,name=\"Fred\"} : {age:int, name:string}\nval it = \"Fred\" : string"
    );
    assert_eq!(
        eval_one("val (p, q) = (1, true);"),
        "val p = 1 : int\nval q = true : bool"
    );
    // a `...` pattern materializes the omitted fields once the record
    // type is known from the annotation
    assert_eq!(
        eval_one("fun get ({a, ...} : {a:string, b:int}) = a; get {b = 1, a = \"x\"};"),
        "val get = fn : {a:string, b:int} -> string\nval it = \"x\" : string"
    );
}

#[test]
fn record_pattern_with_ellipsis_needs_context() {
    let err = eval_err(&mut Session::new(), "fn {a, ...} => a;");
    assert!(matches!(err, MorelError::Type(_)), "got {err}");
}

#[test]
fn queries() {
    let mut session = Session::new();
    session.config.line_width = 400;
    eval(&mut session, "val xs = [3,1,2];");
    assert_eq!(eval(&mut session, "from x in xs order x;"), "val it = [1,2,3] : int list");
    assert_eq!(
        eval(&mut session, "from x in xs order x desc;"),
        "val it = [3,2,1] : int list"
    );
    assert_eq!(
        eval(&mut session, "from x in xs where x > 1 yield x * 10;"),
        "val it = [30,20] : int list"
    );
    assert_eq!(
        eval(&mut session, "from x in xs, y in [10, 20] yield {x, y};"),
        "val it = [{x=3,y=10},{x=3,y=20},{x=1,y=10},{x=1,y=20},{x=2,y=10},{x=2,y=20}] : {x:int, y:int} list"
    );
    assert_eq!(
        eval(&mut session, "from x in [1,2,3,4,5] skip 1 take 2;"),
        "val it = [2,3] : int list"
    );
    assert_eq!(eval(&mut session, "from;"), "val it = [()] : unit list");
}

#[test]
fn query_binding_with_eq() {
    assert_eq!(
        eval_one("from x = 1, y in [10, 20] yield x + y;"),
        "val it = [11,21] : int list"
    );
}

#[test]
fn grouping() {
    assert_eq!(
        eval_one(
            "from e in [{id=1,dept=\"A\"},{id=2,dept=\"B\"},{id=3,dept=\"A\"}] \
             group d = #dept e compute {c = count of e};"
        ),
        "val it = [{c=2,d=\"A\"},{c=1,d=\"B\"}] : {c:int, d:string} list"
    );
    assert_eq!(
        eval_one("from x in [1,2,2,3,3,3] group v = x compute {n = count of x} order n desc, v;"),
        "val it = [{n=3,v=3},{n=2,v=2},{n=1,v=1}] : {n:int, v:int} list"
    );
    assert_eq!(
        eval_one("from x in [1,2,3,4] group parity = x mod 2 compute {total = sum of x};"),
        "val it = [{parity=1,total=4},{parity=0,total=6}] : {parity:int, total:int} list"
    );
}

#[test]
fn set_operations() {
    assert_eq!(
        eval_one("from x in [1,2,2,3] union [3,4];"),
        "val it = [1,2,2,3,3,4] : int list"
    );
    assert_eq!(
        eval_one("from x in [1,2,2,3] union distinct [3,4];"),
        "val it = [1,2,3,4] : int list"
    );
    assert_eq!(
        eval_one("from x in [1,2,2,3] intersect [2,2,3,4];"),
        "val it = [2,2,3] : int list"
    );
    assert_eq!(
        eval_one("from x in [1,2,2,3] except [2];"),
        "val it = [1,2,3] : int list"
    );
    assert_eq!(eval_one("from x in [1,2,2,3] distinct;"), "val it = [1,2,3] : int list");
    // distinct is idempotent
    assert_eq!(
        eval_one("from x in [1,2,2,3] distinct distinct;"),
        "val it = [1,2,3] : int list"
    );
}

#[test]
fn foreign_source_joins_through_the_planner() {
    let mut session = Session::new();
    assert!(session.load_foreign("scott"));
    session.config.line_width = 400;
    assert_eq!(
        eval(
            &mut session,
            "from e in emps where #deptno e = 30 yield #ename e;"
        ),
        "val it = [\"Shaggy\",\"Scooby\"] : string list"
    );
    assert_eq!(
        eval(
            &mut session,
            "from e in emps, d in depts where #deptno e = #deptno d \
             yield {name = #ename e, dept = #dname d} order name;"
        ),
        "val it = [{dept=\"Sales\",name=\"Fred\"},{dept=\"Engineering\",name=\"Scooby\"},\
{dept=\"Engineering\",name=\"Shaggy\"},{dept=\"Marketing\",name=\"Velma\"}] \
: {dept:string, name:string} list"
    );
    assert_eq!(
        eval(
            &mut session,
            "from e in emps group dept = #deptno e compute {c = count of e} order dept;"
        ),
        "val it = [{c=1,dept=10},{c=1,dept=20},{c=2,dept=30}] : {c:int, dept:int} list"
    );
}

#[test]
fn overload_declarations() {
    let mut session = Session::new();
    assert_eq!(eval(&mut session, "over plus;"), "over plus");
    assert_eq!(
        eval(&mut session, "val inst plus = fn ((a, b) : int * int) => a + b;"),
        "val plus = fn : int * int -> int"
    );
    assert_eq!(
        eval(&mut session, "val inst plus = fn ((a, b) : string * string) => a ^ b;"),
        "val plus = fn : string * string -> string"
    );
    assert_eq!(eval(&mut session, "plus (1, 2);"), "val it = 3 : int");
    assert_eq!(eval(&mut session, "plus (\"a\", \"b\");"), "val it = \"ab\" : string");

    let err = eval_err(&mut session, "plus (1.0, 2.0);");
    assert!(
        matches!(
            &err,
            MorelError::Type(t) if matches!(t.kind, TypeErrorKind::OverloadNoMatch { .. })
        ),
        "got {err}"
    );
}

#[test]
fn builtin_arithmetic_defaults_to_int() {
    // several instances match an unconstrained operand; ML convention
    // picks the int one
    assert_eq!(eval_one("fn (x, y) => x + y;"), "val it = fn : int * int -> int");
}

#[test]
fn ambiguous_user_overload_is_an_error() {
    let mut session = Session::new();
    eval(&mut session, "over p;");
    eval(&mut session, "val inst p = fn (x : int) => x;");
    eval(&mut session, "val inst p = fn (x : string) => x;");
    let err = eval_err(&mut session, "fn x => p x;");
    assert!(
        matches!(
            &err,
            MorelError::Type(t) if matches!(t.kind, TypeErrorKind::OverloadAmbiguous { .. })
        ),
        "got {err}"
    );
}

#[test]
fn runtime_errors_do_not_lose_the_session() {
    let mut session = Session::new();
    eval(&mut session, "val x = 10;");
    let err = eval_err(&mut session, "1 div 0;");
    assert!(matches!(err, MorelError::Runtime(RuntimeError::Div)), "got {err}");
    let err = eval_err(&mut session, "hd (tl [1]);");
    assert!(matches!(err, MorelError::Runtime(RuntimeError::Empty)), "got {err}");
    // the environment survives
    assert_eq!(eval(&mut session, "x + 1;"), "val it = 11 : int");
}

#[test]
fn failed_declarations_commit_nothing() {
    let mut session = Session::new();
    eval(&mut session, "val x = 1;");
    let _ = eval_err(&mut session, "val x = 2 and y = unbound_name;");
    assert_eq!(eval(&mut session, "x;"), "val it = 1 : int");
    let err = eval_err(&mut session, "y;");
    assert!(matches!(err, MorelError::Type(_)), "got {err}");
}

#[test]
fn type_errors() {
    let mut session = Session::new();
    let err = eval_err(&mut session, "1 + \"a\";");
    assert!(matches!(err, MorelError::Type(_)), "got {err}");
    let err = eval_err(&mut session, "fn f => f f;");
    assert!(
        matches!(
            &err,
            MorelError::Type(t) if matches!(t.kind, TypeErrorKind::Occurs { .. })
        ),
        "got {err}"
    );
    let err = eval_err(&mut session, "#nope {a = 1};");
    assert!(
        matches!(
            &err,
            MorelError::Type(t) if matches!(t.kind, TypeErrorKind::FieldMismatch { .. })
        ),
        "got {err}"
    );
}

#[test]
fn warnings_are_reported_with_witnesses() {
    let mut session = Session::new();
    let out = eval(&mut session, "fun head (x :: _) = x;");
    assert!(out.contains("nonexhaustive"), "got {out}");
    assert!(out.contains("[]"), "got {out}");
    assert!(out.contains("val head = fn : 'a list -> 'a"), "got {out}");

    let out = eval(&mut session, "case 1 of _ => 0 | _ => 1;");
    assert!(out.contains("redundant"), "got {out}");
}

#[test]
fn strict_match_policy_upgrades_warnings() {
    let mut session = Session::new();
    session.set_strict_matches(true);
    let err = eval_err(&mut session, "fun head (x :: _) = x;");
    assert!(matches!(err, MorelError::Type(_)), "got {err}");
}

#[test]
fn it_binding() {
    let mut session = Session::new();
    eval(&mut session, "21;");
    assert_eq!(eval(&mut session, "it + it;"), "val it = 42 : int");
    assert_eq!(eval(&mut session, "val it = 5;"), "val it = 5 : int");
}

#[test]
fn use_loads_files() {
    let dir = std::env::temp_dir().join("morel-use-test");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("lib.sml"), "val seven = 7;\n").unwrap();

    let mut session = Session::new();
    session.set_directory(dir.clone());
    let out = eval(&mut session, "use \"lib.sml\";");
    assert_eq!(out, "[opening lib.sml]\nval seven = 7 : int");
    assert_eq!(eval(&mut session, "seven + 1;"), "val it = 8 : int");

    let err = eval_err(&mut session, "use \"missing.sml\";");
    assert!(matches!(err, MorelError::Io { .. }), "got {err}");
}

#[test]
fn library_functions() {
    assert_eq!(eval_one("map (fn x => x * 2) [1,2,3];"), "val it = [2,4,6] : int list");
    assert_eq!(eval_one("rev [1,2,3];"), "val it = [3,2,1] : int list");
    assert_eq!(eval_one("List.nth ([1,2,3], 1);"), "val it = 2 : int");
    assert_eq!(
        eval_one("List.foldl (fn (s, acc) => acc ^ s) \"\" [\"a\",\"b\"];"),
        "val it = \"ba\" : string"
    );
    assert_eq!(eval_one("String.substring (\"hello\", 1, 3);"), "val it = \"ell\" : string");
    assert_eq!(eval_one("explode \"ab\";"), "val it = [#\"a\",#\"b\"] : char list");
    assert_eq!(eval_one("Math.sqrt (real 4);"), "val it = 2.0 : real");
    assert_eq!(eval_one("Char.ord #\"a\";"), "val it = 97 : int");
    assert_eq!(eval_one("ignore 42;"), "val it = () : unit");
    assert_eq!(eval_one("[1,2] = [1,2];"), "val it = true : bool");
    assert_eq!(eval_one("\"a\" < \"b\";"), "val it = true : bool");
    assert_eq!(eval_one("1 :: 2 :: nil;"), "val it = [1,2] : int list");
    assert_eq!(eval_one("[1] @ [2,3];"), "val it = [1,2,3] : int list");
}

#[test]
fn composition() {
    assert_eq!(
        eval_one("val add1 = fn x => x + 1; val double = fn x => x * 2; (add1 o double) 5;"),
        "val add1 = fn : int -> int\nval double = fn : int -> int\nval it = 11 : int"
    );
}

#[test]
fn equality_rejects_functions() {
    let err = eval_err(&mut Session::new(), "(fn x => x) = (fn y => y);");
    assert!(matches!(err, MorelError::Type(_)), "got {err}");
}

#[test]
fn nested_from_flattens() {
    // from x in (from y in ys) yield {a = x} behaves as a query over ys
    assert_eq!(
        eval_one("from x in (from y in [1,2,3] where y > 1) yield {a = x};"),
        "val it = [{a=2},{a=3}] : {a:int} list"
    );
}

#[test]
fn overflow_is_checked() {
    let mut session = Session::new();
    eval(&mut session, "val big = 9223372036854775807;");
    let err = eval_err(&mut session, "big + 1;");
    assert!(matches!(err, MorelError::Runtime(RuntimeError::Overflow)), "got {err}");
}
