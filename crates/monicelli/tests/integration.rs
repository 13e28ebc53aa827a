use std::io::Cursor;
use std::process::{Command, Stdio};

use monicelli::ast::{BranchPath, CompareOp, Expr, Function, Location, Module, Param, ShiftDirection, Stmt, Type};
use monicelli::compiler::{compile_module, CompileError};
use monicelli::vm::Vm;

struct Outcome {
    status: i32,
    stdout: String,
    stderr: String,
}

/// Helper to compile a module and run it with the given standard input
fn run_with_input(module: &Module, input: &str) -> Result<Outcome, String> {
    let bytes = compile_module(module).map_err(|e| format!("Compile error: {}", e))?;
    let vm = Vm::load(&bytes).map_err(|e| format!("Load error: {}", e))?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let status = vm
        .run_with_io(Cursor::new(input.as_bytes()), &mut stdout, &mut stderr)
        .map_err(|e| format!("Runtime error: {}", e))?;

    Ok(Outcome {
        status,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

fn run(body: Vec<Stmt>) -> Result<Outcome, String> {
    run_with_input(&Module::new("Main").with_entry(body), "")
}

fn stdout_of(body: Vec<Stmt>) -> String {
    let outcome = run(body).unwrap();
    assert_eq!(outcome.status, 0, "stderr: {}", outcome.stderr);
    outcome.stdout
}

fn factorial_module() -> Module {
    Module::new("Fact")
        .with_function(Function::new(
            "fact",
            Type::Int,
            vec![Param::new("n", Type::Int)],
            vec![
                Stmt::branch(
                    "n",
                    vec![BranchPath::compare(
                        CompareOp::Le,
                        Expr::int(1),
                        vec![Stmt::ret(Some(Expr::int(1)))],
                    )],
                    None,
                ),
                Stmt::ret(Some(Expr::mult(
                    Expr::ident("n"),
                    Expr::call("fact", vec![Expr::minus(Expr::ident("n"), Expr::int(1))]),
                ))),
            ],
        ))
        .with_entry(vec![Stmt::print(Expr::call("fact", vec![Expr::int(10)]))])
}

// ---
// Programs
// ---

#[test]
fn test_function_call() {
    let module = Module::new("Main")
        .with_function(Function::new(
            "add",
            Type::Int,
            vec![Param::new("a", Type::Int), Param::new("b", Type::Int)],
            vec![Stmt::ret(Some(Expr::plus(Expr::ident("a"), Expr::ident("b"))))],
        ))
        .with_entry(vec![Stmt::print(Expr::call("add", vec![Expr::int(2), Expr::int(3)]))]);

    let outcome = run_with_input(&module, "").unwrap();
    assert_eq!(outcome.status, 0);
    assert_eq!(outcome.stdout, "5\n");
}

#[test]
fn test_int_initializer_widens_to_double() {
    let out = stdout_of(vec![
        Stmt::declare("x", Type::Double, Some(Expr::int(1))),
        Stmt::print(Expr::ident("x")),
    ]);
    assert_eq!(out, "1.0\n");
}

#[test]
fn test_failed_assertion_exits() {
    let outcome = run(vec![
        Stmt::print(Expr::int(1)),
        Stmt::assert(Expr::compare(CompareOp::Lt, Expr::int(1), Expr::int(0))).at(Location::new("prog.mc", 4, 5)),
        Stmt::print(Expr::int(2)),
    ])
    .unwrap();

    assert_eq!(outcome.status, -1);
    assert_eq!(outcome.stdout, "1\n");
    assert_eq!(outcome.stderr, "Assertion failed at prog.mc:4:5\n");
}

#[test]
fn test_passing_assertion_continues() {
    let out = stdout_of(vec![
        Stmt::assert(Expr::int(3)),
        Stmt::print(Expr::int(7)),
    ]);
    assert_eq!(out, "7\n");
}

#[test]
fn test_abort() {
    let outcome = run(vec![Stmt::abort().at(Location::new("prog.mc", 9, 1)), Stmt::print(Expr::int(1))]).unwrap();
    assert_eq!(outcome.status, -1);
    assert!(outcome.stdout.is_empty());
    assert_eq!(outcome.stderr, "Program aborted at prog.mc:9:1\n");
}

#[test]
fn test_read_from_input() {
    let module = Module::new("Main").with_entry(vec![
        Stmt::declare("n", Type::Int, None),
        Stmt::read("n"),
        Stmt::print(Expr::ident("n")),
    ]);
    let outcome = run_with_input(&module, "42\n").unwrap();
    assert_eq!(outcome.status, 0);
    assert_eq!(outcome.stdout, "42\n");
}

#[test]
fn test_read_several_types() {
    let module = Module::new("Main").with_entry(vec![
        Stmt::declare("d", Type::Double, None),
        Stmt::declare("b", Type::Bool, None),
        Stmt::declare("c", Type::Char, None),
        Stmt::read("d"),
        Stmt::read("b"),
        Stmt::read("c"),
        Stmt::print(Expr::ident("d")),
        Stmt::print(Expr::ident("b")),
        Stmt::print(Expr::ident("c")),
    ]);
    let outcome = run_with_input(&module, "2.25 False\nzeta\n").unwrap();
    assert_eq!(outcome.stdout, "2.25\nfalse\nz\n");
}

#[test]
fn test_bad_input_is_runtime_error() {
    let module = Module::new("Main").with_entry(vec![Stmt::declare("n", Type::Int, None), Stmt::read("n")]);
    let err = run_with_input(&module, "quarantadue").err().unwrap();
    assert!(err.starts_with("Runtime error"), "{}", err);
}

#[test]
fn test_do_while_runs_body_first() {
    let out = stdout_of(vec![
        Stmt::declare("i", Type::Int, Some(Expr::int(0))),
        Stmt::do_while(
            vec![
                Stmt::print(Expr::ident("i")),
                Stmt::assign("i", Expr::plus(Expr::ident("i"), Expr::int(1))),
            ],
            Expr::compare(CompareOp::Lt, Expr::ident("i"), Expr::int(3)),
        ),
        Stmt::do_while(vec![Stmt::print(Expr::int(99))], Expr::int(0)),
    ]);
    assert_eq!(out, "0\n1\n2\n99\n");
}

fn branch_program(n: i64) -> Vec<Stmt> {
    vec![
        Stmt::declare("n", Type::Int, Some(Expr::int(n))),
        Stmt::branch(
            "n",
            vec![
                BranchPath::compare(CompareOp::Lt, Expr::int(10), vec![Stmt::print(Expr::int(1))]),
                BranchPath::equals(Expr::int(5), vec![Stmt::print(Expr::int(2))]),
                BranchPath::compare(CompareOp::Ge, Expr::float(15.5), vec![Stmt::print(Expr::int(3))]),
            ],
            Some(vec![Stmt::print(Expr::int(4))]),
        ),
        Stmt::print(Expr::int(0)),
    ]
}

#[test]
fn test_branch_first_match_wins() {
    assert_eq!(stdout_of(branch_program(5)), "1\n0\n");
    assert_eq!(stdout_of(branch_program(20)), "3\n0\n");
    assert_eq!(stdout_of(branch_program(12)), "4\n0\n");
}

#[test]
fn test_variables_are_function_scoped() {
    let out = stdout_of(vec![
        Stmt::do_while(vec![Stmt::declare("y", Type::Int, Some(Expr::int(7)))], Expr::int(0)),
        Stmt::print(Expr::ident("y")),
    ]);
    assert_eq!(out, "7\n");
}

#[test]
fn test_redeclaration_after_loop() {
    let module = Module::new("Main").with_entry(vec![
        Stmt::do_while(vec![Stmt::declare("y", Type::Int, Some(Expr::int(7)))], Expr::int(0)),
        Stmt::declare("y", Type::Int, Some(Expr::int(8))).at(Location::new("loop.mc", 3, 1)),
    ]);
    assert!(matches!(
        compile_module(&module),
        Err(CompileError::Redeclaration { ref name, ref loc }) if name == "y" && loc.line == 3
    ));
}

#[test]
fn test_branch_default_sees_arm_declarations() {
    let body = vec![
        Stmt::declare("n", Type::Int, Some(Expr::int(2))),
        Stmt::branch(
            "n",
            vec![BranchPath::equals(
                Expr::int(1),
                vec![Stmt::declare("y", Type::Int, Some(Expr::int(5)))],
            )],
            Some(vec![Stmt::print(Expr::ident("y"))]),
        ),
    ];
    assert_eq!(stdout_of(body), "0\n");
}

#[test]
fn test_entry_return_is_exit_status() {
    let outcome = run(vec![Stmt::ret(Some(Expr::int(42)))]).unwrap();
    assert_eq!(outcome.status, 42);

    let outcome = run(vec![Stmt::ret(Some(Expr::int(4294967303)))]).unwrap();
    assert_eq!(outcome.status, 7);
}

#[test]
fn test_uninitialized_variables_are_zero() {
    let out = stdout_of(vec![
        Stmt::declare("i", Type::Int, None),
        Stmt::declare("d", Type::Double, None),
        Stmt::declare("b", Type::Bool, None),
        Stmt::print(Expr::ident("i")),
        Stmt::print(Expr::ident("d")),
        Stmt::print(Expr::ident("b")),
    ]);
    assert_eq!(out, "0\n0.0\nfalse\n");
}

#[test]
fn test_arithmetic_promotion() {
    let out = stdout_of(vec![
        Stmt::print(Expr::div(Expr::int(7), Expr::int(2))),
        Stmt::print(Expr::div(Expr::float(7.0), Expr::int(2))),
        Stmt::print(Expr::plus(Expr::int(1), Expr::float(2.5))),
        Stmt::print(Expr::minus(Expr::int(2), Expr::mult(Expr::int(3), Expr::int(4)))),
    ]);
    assert_eq!(out, "3\n3.5\n3.5\n-10\n");
}

#[test]
fn test_assignment_narrows_to_variable_type() {
    let out = stdout_of(vec![
        Stmt::declare("n", Type::Int, None),
        Stmt::assign("n", Expr::float(9.99)),
        Stmt::print(Expr::ident("n")),
    ]);
    assert_eq!(out, "9\n");
}

#[test]
fn test_shifts() {
    let out = stdout_of(vec![
        Stmt::print(Expr::shift(ShiftDirection::Left, Expr::int(1), Expr::int(4))),
        Stmt::print(Expr::shift(ShiftDirection::Right, Expr::int(256), Expr::int(4))),
        Stmt::print(Expr::shift(ShiftDirection::Right, Expr::int(-16), Expr::int(60))),
    ]);
    assert_eq!(out, "16\n16\n15\n");
}

#[test]
fn test_comparisons() {
    let out = stdout_of(vec![
        Stmt::print(Expr::compare(CompareOp::Lt, Expr::int(3), Expr::int(4))),
        Stmt::print(Expr::compare(CompareOp::Ge, Expr::float(2.5), Expr::int(3))),
        Stmt::print(Expr::compare(CompareOp::Eq, Expr::int(2), Expr::float(2.0))),
        Stmt::print(Expr::compare(CompareOp::Le, Expr::int(5), Expr::int(5))),
        Stmt::print(Expr::compare(CompareOp::Gt, Expr::int(5), Expr::int(5))),
    ]);
    assert_eq!(out, "true\nfalse\ntrue\ntrue\nfalse\n");
}

#[test]
fn test_char_and_float_printing() {
    let out = stdout_of(vec![
        Stmt::declare("c", Type::Char, Some(Expr::int(65))),
        Stmt::declare("f", Type::Float, Some(Expr::float(0.1))),
        Stmt::declare("big", Type::Double, Some(Expr::float(1.5e10))),
        Stmt::print(Expr::ident("c")),
        Stmt::print(Expr::ident("f")),
        Stmt::print(Expr::ident("big")),
        Stmt::print(Expr::plus(Expr::ident("c"), Expr::int(1))),
    ]);
    assert_eq!(out, "A\n0.1\n1.5E10\n66\n");
}

#[test]
fn test_recursion() {
    let outcome = run_with_input(&factorial_module(), "").unwrap();
    assert_eq!(outcome.stdout, "3628800\n");
}

#[test]
fn test_void_function_and_call_statement() {
    let module = Module::new("Main")
        .with_function(Function::new(
            "greet",
            Type::Void,
            vec![Param::new("times", Type::Int)],
            vec![Stmt::print(Expr::ident("times")), Stmt::ret(None), Stmt::print(Expr::int(0))],
        ))
        .with_function(Function::new(
            "answer",
            Type::Int,
            vec![],
            vec![Stmt::ret(Some(Expr::int(42)))],
        ))
        .with_entry(vec![
            Stmt::call("greet", vec![Expr::int(3)]),
            Stmt::call("answer", vec![]),
            Stmt::print(Expr::call("answer", vec![])),
        ]);
    let outcome = run_with_input(&module, "").unwrap();
    assert_eq!(outcome.stdout, "3\n42\n");
}

#[test]
fn test_division_by_zero_is_runtime_error() {
    let err = run(vec![Stmt::print(Expr::div(Expr::int(1), Expr::int(0)))]).err().unwrap();
    assert_eq!(err, "Runtime error: division by zero");
}

// ---
// Compile errors
// ---

#[test]
fn test_compile_errors() {
    let module = Module::new("Main").with_entry(vec![Stmt::print(Expr::call("nope", vec![]))]);
    assert!(matches!(
        compile_module(&module),
        Err(CompileError::UndefinedFunction { ref name, .. }) if name == "nope"
    ));

    let module = factorial_module().with_entry(vec![Stmt::print(Expr::call("fact", vec![]))]);
    assert!(matches!(
        compile_module(&module),
        Err(CompileError::ArityMismatch { expected: 1, got: 0, .. })
    ));

    let module = Module::new("Main")
        .with_function(Function::new("nothing", Type::Void, vec![], vec![]))
        .with_entry(vec![Stmt::print(Expr::call("nothing", vec![]))]);
    assert!(matches!(compile_module(&module), Err(CompileError::VoidValueUsed { .. })));

    let module = Module::new("Main").with_entry(vec![
        Stmt::declare("b", Type::Bool, None),
        Stmt::print(Expr::plus(Expr::ident("b"), Expr::ident("b"))),
    ]);
    assert!(matches!(compile_module(&module), Err(CompileError::TypeMismatch { .. })));
}

#[test]
fn test_parameter_limit() {
    let wide = |n: usize| {
        let params = (0..n).map(|i| Param::new(format!("p{}", i), Type::Int)).collect();
        Module::new("Main")
            .with_function(Function::new("wide", Type::Void, params, vec![]))
            .with_entry(vec![])
    };

    let bytes = compile_module(&wide(255)).unwrap();
    assert!(Vm::load(&bytes).is_ok());

    let err = compile_module(&wide(256)).unwrap_err();
    assert!(err.is_internal());
    assert!(err.to_string().contains("more than 255 parameters"), "{}", err);
}

#[test]
fn test_compilation_is_deterministic() {
    let module = factorial_module();
    assert_eq!(compile_module(&module).unwrap(), compile_module(&module).unwrap());
}

#[test]
fn test_json_module_runs() {
    let module = Module::from_json(
        r#"{
            "entry": {
                "body": [
                    { "kind": "variable_decl", "name": "x", "type": "double",
                      "init": { "kind": "int_immediate", "value": 1 } },
                    { "kind": "print", "value": { "kind": "identifier", "name": "x" } }
                ]
            }
        }"#,
    )
    .unwrap();
    assert_eq!(module.name, "Main");
    assert_eq!(run_with_input(&module, "").unwrap().stdout, "1.0\n");
}

// ---
// Command line
// ---

fn monicelli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_monicelli"))
}

fn read_program() -> Module {
    Module::new("Echo").with_entry(vec![
        Stmt::declare("n", Type::Int, None),
        Stmt::read("n"),
        Stmt::print(Expr::ident("n")),
        Stmt::assert(Expr::compare(CompareOp::Ge, Expr::ident("n"), Expr::int(0))).at(Location::new("echo.mc", 4, 1)),
    ])
}

fn run_artifact(path: &std::path::Path, input: &str) -> std::process::Output {
    use std::io::Write;

    let mut child = monicelli()
        .arg("run")
        .arg(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(input.as_bytes()).unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn test_cli_compile_and_run() {
    let dir = tempfile::tempdir().unwrap();
    let ast = dir.path().join("echo.json");
    let artifact = dir.path().join("Echo.mcbc");
    std::fs::write(&ast, read_program().to_json().unwrap()).unwrap();

    let output = monicelli().arg("compile").arg(&ast).arg("-o").arg(&artifact).output().unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "Programma come se fosse compilato.\n"
    );
    assert_eq!(&std::fs::read(&artifact).unwrap()[..4], b"MCBC");

    let output = run_artifact(&artifact, "42\n");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "42\n");

    let output = run_artifact(&artifact, "-3\n");
    assert_eq!(output.status.code(), Some(255));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "-3\n");
    assert!(String::from_utf8_lossy(&output.stderr).contains("Assertion failed at echo.mc:4:1"));
}

#[test]
fn test_cli_compile_error_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ast = dir.path().join("bad.json");
    let artifact = dir.path().join("bad.mcbc");
    let module = Module::new("Bad").with_entry(vec![Stmt::print(Expr::ident("ghost")).at(Location::new("bad.mc", 2, 3))]);
    std::fs::write(&ast, module.to_json().unwrap()).unwrap();

    let output = monicelli().arg("compile").arg(&ast).output().unwrap();
    assert!(!output.status.success());
    assert!(!artifact.exists());

    let output = monicelli().arg("check").arg(&ast).output().unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_cli_disasm() {
    let dir = tempfile::tempdir().unwrap();
    let ast = dir.path().join("fact.json");
    std::fs::write(&ast, factorial_module().to_json().unwrap()).unwrap();

    let output = monicelli().arg("compile").arg(&ast).output().unwrap();
    assert!(output.status.success());

    let output = monicelli().arg("disasm").arg(dir.path().join("fact.mcbc")).output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("artifact Fact"));
    assert!(text.contains("== fact =="));
    assert!(text.contains("== <start> =="));
}
