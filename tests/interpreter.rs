#[cfg(test)]
mod interpreter_tests {
    use std::cell::RefCell;
    use std::rc::{Rc, Weak};

    use rox::callable::LoxFunction;
    use rox::error::{ErrorKind, LoxError};
    use rox::expr::Expr;
    use rox::interpreter::{Interpreter, MAX_CALL_DEPTH};
    use rox::parser::{parse, Parser};
    use rox::scanner::scan_tokens;
    use rox::stmt::Stmt;
    use rox::value::Value;

    /// An interpreter whose `print` output lands in the returned buffer.
    fn capturing() -> (Interpreter, Rc<RefCell<Vec<String>>>) {
        let printed: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&printed);

        let interpreter =
            Interpreter::with_output(Box::new(move |text: &str| sink.borrow_mut().push(text.to_owned())));

        (interpreter, printed)
    }

    fn exec(interpreter: &mut Interpreter, source: &str) -> Result<(), LoxError> {
        let (tokens, scan_errors) = scan_tokens(source);
        assert!(scan_errors.is_empty(), "scan errors: {:?}", scan_errors);

        let (statements, parse_errors) = parse(&tokens);
        assert!(parse_errors.is_empty(), "parse errors: {:?}", parse_errors);

        let resolve_errors = interpreter.resolve(&statements);
        assert!(resolve_errors.is_empty(), "resolve errors: {:?}", resolve_errors);

        interpreter.interpret(&statements)
    }

    /// Run `source` on a fresh interpreter, returning printed lines and the
    /// runtime error text, if any.
    fn run(source: &str) -> (Vec<String>, Option<String>) {
        let (mut interpreter, printed) = capturing();
        let outcome = exec(&mut interpreter, source);

        let lines = printed.borrow().clone();
        (lines, outcome.err().map(|e| e.to_string()))
    }

    fn output(source: &str) -> Vec<String> {
        let (lines, error) = run(source);
        assert_eq!(error, None);
        lines
    }

    fn eval(source: &str) -> Result<Value, LoxError> {
        let (mut interpreter, _) = capturing();
        let (tokens, _) = scan_tokens(source);
        let expr = Parser::new(&tokens)
            .parse_expression()
            .expect("expression should parse");

        assert!(interpreter.resolve_expression(&expr).is_empty());
        interpreter.evaluate_expression(&expr)
    }

    #[test]
    fn test_evaluate_expressions() {
        assert_eq!(eval("1 - 1").unwrap(), Value::Number(0.0));
        assert_eq!(eval("1 - 1").unwrap().to_string(), "0");
        assert_eq!(eval("\"foo\" + \"bar\"").unwrap().to_string(), "foobar");
        assert_eq!(eval("(1 + 2) * 3 / 2").unwrap(), Value::Number(4.5));
        assert_eq!(eval("!nil").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 == 1 and \"a\" != \"b\"").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 / 0").unwrap(), Value::Number(f64::INFINITY));
        assert_eq!(eval("0 / 0 == 0 / 0").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_type_errors() {
        let err = eval("1 + \"foo\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(
            err.to_string(),
            "Operands must be two numbers or two strings.\n[line 1]"
        );

        assert_eq!(
            eval("-\"a\"").unwrap_err().message(),
            "Operand must be a number."
        );
        assert_eq!(
            eval("\"a\" < 1").unwrap_err().message(),
            "Operands must be numbers."
        );
    }

    #[test]
    fn test_truthiness_and_logical_operands() {
        assert_eq!(
            output("print !0;\nprint !\"\";\nprint nil or \"yes\";\nprint 1 and 2;\nprint false and boom;"),
            ["false", "false", "yes", "2", "false"]
        );
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(
            output("print 3;\nprint 1.5;\nprint 10 / 4;\nprint -0.25;"),
            ["3", "1.5", "2.5", "-0.25"]
        );
    }

    #[test]
    fn test_variables_and_blocks() {
        let source = "var a = \"global\";\n{ var a = \"inner\"; print a; a = \"changed\"; print a; }\nprint a;\na = 1;\nprint a;";

        assert_eq!(output(source), ["inner", "changed", "global", "1"]);
    }

    #[test]
    fn test_undefined_variable() {
        let (lines, error) = run("print 1;\nprint x;\nprint 2;");

        assert_eq!(lines, ["1"]);
        assert_eq!(error.as_deref(), Some("Undefined variable 'x'.\n[line 2]"));

        let (_, error) = run("y = 1;");
        assert_eq!(error.as_deref(), Some("Undefined variable 'y'.\n[line 1]"));
    }

    #[test]
    fn test_control_flow() {
        assert_eq!(
            output("for (var i = 0; i < 3; i = i + 1) print i;"),
            ["0", "1", "2"]
        );
        assert_eq!(
            output("var n = 3;\nwhile (n > 0) { print n; n = n - 1; }"),
            ["3", "2", "1"]
        );
        assert_eq!(
            output("if (nil) print \"then\"; else print \"else\";\nif (0) print \"zero is true\";"),
            ["else", "zero is true"]
        );
    }

    #[test]
    fn test_functions_and_return() {
        let source = "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }\nprint fib(15);\nfun none() {}\nprint none();\nprint fib;";

        assert_eq!(output(source), ["610", "nil", "<function fib>"]);
    }

    #[test]
    fn test_closures_capture_their_frame() {
        let source = "fun makeCounter() {\n  var i = 0;\n  fun count() { i = i + 1; print i; }\n  return count;\n}\nvar c = makeCounter();\nc();\nc();\nvar d = makeCounter();\nd();";

        assert_eq!(output(source), ["1", "2", "1"]);
    }

    #[test]
    fn test_resolution_is_static() {
        let source = "var a = \"global\";\n{\n  fun showA() { print a; }\n  showA();\n  var a = \"block\";\n  showA();\n}";

        assert_eq!(output(source), ["global", "global"]);
    }

    #[test]
    fn test_classes_fields_and_methods() {
        let source = "class Point {\n  init(x, y) { this.x = x; this.y = y; }\n  sum() { return this.x + this.y; }\n}\nvar p = Point(1, 2);\nprint p.sum();\np.x = 10;\nprint p.sum();\nprint Point;\nprint p;";

        assert_eq!(output(source), ["3", "12", "Point", "Point instance"]);
    }

    #[test]
    fn test_inherited_initializer() {
        let source = "class A { init() { this.x = 1; } }\nclass B < A {}\nprint B().x;";

        assert_eq!(output(source), ["1"]);
    }

    #[test]
    fn test_super_calls() {
        let source = "class A { greet() { return \"A\"; } }\nclass B < A { greet() { return \"B\" + super.greet(); } }\nclass C < B {}\nprint C().greet();";

        assert_eq!(output(source), ["BA"]);
    }

    #[test]
    fn test_super_method_sees_subclass_fields() {
        let source = "class A { describe() { return this.name; } }\nclass B < A {\n  init() { this.name = \"b\"; }\n  describe() { return \"sub \" + super.describe(); }\n}\nprint B().describe();";

        assert_eq!(output(source), ["sub b"]);
    }

    #[test]
    fn test_initializer_returns_this() {
        let source = "class Foo { init() { this.n = 0; return; } }\nvar o = Foo();\nprint o.init() == o;\nprint o.n;";

        assert_eq!(output(source), ["true", "0"]);
    }

    #[test]
    fn test_bound_methods_remember_receiver() {
        let source = "class Box { init(v) { this.v = v; } get() { return this.v; } }\nvar m = Box(7).get;\nprint m();\nvar b = Box(1);\nb.self = b.get;\nprint b.self();";

        assert_eq!(output(source), ["7", "1"]);
    }

    #[test]
    fn test_call_errors() {
        let (_, error) = run("fun f(a) {}\nf();");
        assert_eq!(
            error.as_deref(),
            Some("Expected 1 arguments but got 0.\n[line 2]")
        );

        let (_, error) = run("\"x\"();");
        assert_eq!(
            error.as_deref(),
            Some("Can only call functions and classes.\n[line 1]")
        );

        let (_, error) = run("class A { init(a, b) {} }\nA(1);");
        assert_eq!(
            error.as_deref(),
            Some("Expected 2 arguments but got 1.\n[line 2]")
        );
    }

    #[test]
    fn test_property_errors() {
        let (_, error) = run("var x = 1;\nprint x.y;");
        assert_eq!(error.as_deref(), Some("Only instances have properties.\n[line 2]"));

        let (_, error) = run("var x = 1;\nx.y = 2;");
        assert_eq!(error.as_deref(), Some("Only instances have fields.\n[line 2]"));

        let (_, error) = run("class A {}\nprint A().missing;");
        assert_eq!(error.as_deref(), Some("Undefined property 'missing'.\n[line 2]"));

        let (_, error) = run("var A = 1;\nclass B < A {}");
        assert_eq!(error.as_deref(), Some("Superclass must be a class.\n[line 2]"));
    }

    #[test]
    fn test_builtins() {
        assert_eq!(
            output("print clock;\nprint clock() > 0;\nprint reset;"),
            ["<function native>", "true", "<function native>"]
        );
    }

    #[test]
    fn test_reset_clears_globals() {
        let (mut interpreter, printed) = capturing();

        exec(&mut interpreter, "var a = 1;").unwrap();
        interpreter.reset();

        let err = exec(&mut interpreter, "print a;").unwrap_err();
        assert_eq!(err.message(), "Undefined variable 'a'.");

        exec(&mut interpreter, "print clock() > 0;").unwrap();
        assert_eq!(*printed.borrow(), ["true"]);
    }

    #[test]
    fn test_reset_native_keeps_running_block() {
        let source = "var g = 1;\n{ var local = \"still here\"; reset(); print local; }\nprint g;";
        let (lines, error) = run(source);

        assert_eq!(lines, ["still here"]);
        assert_eq!(error.as_deref(), Some("Undefined variable 'g'.\n[line 3]"));
    }

    #[test]
    fn test_environment_restored_after_error() {
        let (mut interpreter, printed) = capturing();

        assert!(exec(&mut interpreter, "var a = \"outer\";\n{ var a = \"inner\"; nope(); }").is_err());
        exec(&mut interpreter, "var b = 2;\nprint a;").unwrap();

        assert_eq!(*printed.borrow(), ["outer"]);
    }

    #[test]
    fn test_recursion_depth() {
        let (_, countdown) = run("fun down(n) { if (n == 0) return 0; return down(n - 1); }\nprint down(1000);");
        assert_eq!(countdown, None);

        let (_, deepest) = run(&format!(
            "fun depth(n) {{ if (n > 0) return depth(n - 1); return 0; }}\nprint depth({});",
            MAX_CALL_DEPTH - 1
        ));
        assert_eq!(deepest, None);

        let (_, overflow) = run("fun f() { f(); }\nf();");
        assert_eq!(overflow.as_deref(), Some("Stack overflow.\n[line 1]"));
    }

    /// Run `source`, then hand back a weak handle to the function stored in
    /// the global `w` and the interpreter that owns it.
    fn weak_global_function(source: &str) -> (Weak<LoxFunction>, Interpreter) {
        let (mut interpreter, _) = capturing();
        exec(&mut interpreter, source).unwrap();

        let (tokens, _) = scan_tokens("w");
        let expr = Parser::new(&tokens).parse_expression().unwrap();
        assert!(interpreter.resolve_expression(&expr).is_empty());

        let weak = match interpreter.evaluate_expression(&expr).unwrap() {
            Value::Function(function) => Rc::downgrade(&function),
            other => panic!("expected a function, got {}", other),
        };

        (weak, interpreter)
    }

    #[test]
    fn test_closure_stored_in_outer_block_is_released() {
        let (weak, interpreter) =
            weak_global_function("var w;\n{ var h; { fun g() {} h = g; } w = h; }");
        assert!(weak.upgrade().is_some());

        drop(interpreter);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_closure_stored_in_call_frame_is_released() {
        let (weak, interpreter) = weak_global_function(
            "fun mk() { var h; { fun g() { return h; } h = g; } return h; }\nvar w = mk();",
        );
        assert!(weak.upgrade().is_some());

        drop(interpreter);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_method_stored_on_its_instance_is_released() {
        let (weak, interpreter) = weak_global_function(
            "class A { m() { return this; } }\nvar w;\n{ var a = A(); a.f = a.m; w = a.f; }",
        );

        drop(interpreter);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_super_without_receiver_frame_is_an_error() {
        let source = "class A { m() { return 1; } }\nclass B < A { m() { return super.m(); } }\nprint B().m();";
        let (tokens, _) = scan_tokens(source);
        let (statements, _) = parse(&tokens);

        let (mut interpreter, printed) = capturing();
        assert!(interpreter.resolve(&statements).is_empty());

        let super_id = match &statements[1] {
            Stmt::Class { methods, .. } => match &methods[0].body[0] {
                Stmt::Return {
                    value: Some(Expr::Call { callee, .. }),
                    ..
                } => match callee.as_ref() {
                    Expr::Super { id, .. } => *id,
                    other => panic!("expected super, got {:?}", other),
                },
                other => panic!("expected return, got {:?}", other),
            },
            other => panic!("expected class, got {:?}", other),
        };
        assert_eq!(interpreter.local_depth(super_id), Some(2));

        // Point `super` at the frame that would have to hold `this`.
        interpreter.note_local(super_id, 0);

        let err = interpreter.interpret(&statements).unwrap_err();
        assert_eq!(err.to_string(), "No receiver bound for 'super'.\n[line 2]");
        assert!(printed.borrow().is_empty());
    }
}
