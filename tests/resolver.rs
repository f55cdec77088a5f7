#[cfg(test)]
mod resolver_tests {
    use rox::error::ErrorKind;
    use rox::expr::Expr;
    use rox::interpreter::Interpreter;
    use rox::parser::parse;
    use rox::scanner::scan_tokens;
    use rox::stmt::Stmt;

    fn parsed(source: &str) -> Vec<Stmt> {
        let (tokens, scan_errors) = scan_tokens(source);
        assert!(scan_errors.is_empty());

        let (statements, errors) = parse(&tokens);
        assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors);

        statements
    }

    fn resolve_errors(source: &str) -> Vec<String> {
        let statements = parsed(source);
        let mut interpreter = Interpreter::with_output(Box::new(|_: &str| {}));

        interpreter
            .resolve(&statements)
            .iter()
            .map(|e| {
                assert_eq!(e.kind(), ErrorKind::Resolve);
                e.to_string()
            })
            .collect()
    }

    #[test]
    fn test_clean_program_has_no_errors() {
        let source = "var a = 1;\nvar a = 2;\nfun f(x) { { var y = x; return y; } }\nclass A { init() { this.v = 1; } }\nclass B < A { m() { return super.init(); } }";

        assert!(resolve_errors(source).is_empty());
    }

    #[test]
    fn test_read_in_own_initializer() {
        assert_eq!(
            resolve_errors("{ var a = a; }"),
            ["[line 1] Error at 'a': Can't read local variable in its own initializer."]
        );
    }

    #[test]
    fn test_redeclaration_in_local_scope() {
        assert_eq!(
            resolve_errors("fun f() { var x = 1; var x = 2; }"),
            ["[line 1] Error at 'x': There is already a variable with this name in this scope."]
        );
    }

    #[test]
    fn test_invalid_return() {
        assert_eq!(
            resolve_errors("return 1;"),
            ["[line 1] Error at 'return': Can't return from top-level code."]
        );
        assert_eq!(
            resolve_errors("class A { init() { return 1; } }"),
            ["[line 1] Error at 'return': Can't return a value from an initializer."]
        );
        assert!(resolve_errors("class A { init() { return; } }").is_empty());
    }

    #[test]
    fn test_invalid_this_and_super() {
        assert_eq!(
            resolve_errors("print this;"),
            ["[line 1] Error at 'this': Can't use 'this' outside of a class."]
        );
        assert_eq!(
            resolve_errors("fun f() { super.m(); }"),
            ["[line 1] Error at 'super': Can't use 'super' outside of a class."]
        );
        assert_eq!(
            resolve_errors("class A { m() { super.m(); } }"),
            ["[line 1] Error at 'super': Can't use 'super' in a class with no superclass."]
        );
    }

    #[test]
    fn test_class_inheriting_from_itself() {
        assert_eq!(
            resolve_errors("class A < A {}"),
            ["[line 1] Error at 'A': A class can't inherit from itself."]
        );
    }

    #[test]
    fn test_all_errors_are_reported() {
        let errors = resolve_errors("return;\nprint this;\n{ var b = b; }");

        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("[line 1]"));
        assert!(errors[1].starts_with("[line 2]"));
        assert!(errors[2].starts_with("[line 3]"));
    }

    #[test]
    fn test_records_lexical_distance() {
        let statements = parsed("{ var a = 1; { print a; } }\nprint b;");
        let mut interpreter = Interpreter::with_output(Box::new(|_: &str| {}));
        assert!(interpreter.resolve(&statements).is_empty());

        let inner_read = match &statements[0] {
            Stmt::Block(outer) => match &outer[1] {
                Stmt::Block(inner) => match &inner[0] {
                    Stmt::Print(Expr::Variable { id, .. }) => *id,
                    other => panic!("expected print of a variable, got {:?}", other),
                },
                other => panic!("expected inner block, got {:?}", other),
            },
            other => panic!("expected outer block, got {:?}", other),
        };
        assert_eq!(interpreter.local_depth(inner_read), Some(1));

        let global_read = match &statements[1] {
            Stmt::Print(Expr::Variable { id, .. }) => *id,
            other => panic!("expected print of a variable, got {:?}", other),
        };
        assert_eq!(interpreter.local_depth(global_read), None);
    }

    #[test]
    fn test_resolving_twice_is_deterministic() {
        let statements = parsed("fun f(a) { { var a = 2; } return a; }");
        let mut interpreter = Interpreter::with_output(Box::new(|_: &str| {}));

        let return_read = match &statements[0] {
            Stmt::Function(declaration) => match &declaration.body[1] {
                Stmt::Return {
                    value: Some(Expr::Variable { id, .. }),
                    ..
                } => *id,
                other => panic!("expected return of a variable, got {:?}", other),
            },
            other => panic!("expected function, got {:?}", other),
        };

        assert!(interpreter.resolve(&statements).is_empty());
        let first = interpreter.local_depth(return_read);

        assert!(interpreter.resolve(&statements).is_empty());
        assert_eq!(interpreter.local_depth(return_read), first);

        // The inner `var a` must not capture the outer read.
        assert_eq!(first, Some(0));
    }
}
