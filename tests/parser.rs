#[cfg(test)]
mod parser_tests {
    use pretty_assertions::assert_eq;

    use rox::ast_printer::AstPrinter;
    use rox::error::ErrorKind;
    use rox::parser::Parser;
    use rox::scanner::scan_tokens;
    use rox::stmt::Stmt;

    /// Parse `source` as a program, returning the printed AST and the
    /// rendered diagnostics.
    fn parse_program(source: &str) -> (String, Vec<String>) {
        let (tokens, scan_errors) = scan_tokens(source);
        assert!(scan_errors.is_empty(), "unexpected scan errors: {:?}", scan_errors);

        let (statements, errors) = Parser::new(&tokens).parse();
        let printed: String = AstPrinter::print_program(&statements);

        (printed, errors.iter().map(|e| e.to_string()).collect())
    }

    fn parse_expr(source: &str) -> Result<String, Vec<String>> {
        let (tokens, _) = scan_tokens(source);

        Parser::new(&tokens)
            .parse_expression()
            .map(|expr| AstPrinter::print(&expr))
            .map_err(|errors| errors.iter().map(|e| e.to_string()).collect())
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(parse_expr("1 + 2 * 3").unwrap(), "(+ 1.0 (* 2.0 3.0))");
        assert_eq!(parse_expr("1 - 2 - 3").unwrap(), "(- (- 1.0 2.0) 3.0)");
        assert_eq!(
            parse_expr("-(1 - 2) == !true").unwrap(),
            "(== (- (group (- 1.0 2.0))) (! true))"
        );
        assert_eq!(
            parse_expr("a or b and c").unwrap(),
            "(or a (and b c))"
        );
        assert_eq!(parse_expr("1 < 2 != false").unwrap(), "(!= (< 1.0 2.0) false)");
    }

    #[test]
    fn test_calls_and_properties() {
        assert_eq!(
            parse_expr("a.b(1, \"two\").c").unwrap(),
            "(. (call (. a b) 1.0 two) c)"
        );
        assert_eq!(parse_expr("f()()").unwrap(), "(call (call f))");
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let (printed, errors) = parse_program("a = b = 1;\nobj.field = 2;");

        assert!(errors.is_empty());
        assert_eq!(printed, "(; (= a (= b 1.0)))\n(; (= (. obj field) 2.0))");
    }

    #[test]
    fn test_declarations() {
        let source = "var a;\nvar b = \"x\";\nfun add(x, y) { return x + y; }\nfun noop() { return; }";
        let (printed, errors) = parse_program(source);

        assert!(errors.is_empty());
        assert_eq!(
            printed,
            "(var a)\n(var b = x)\n(fun add(x y) (return (+ x y)))\n(fun noop() (return))"
        );
    }

    #[test]
    fn test_class_with_superclass() {
        let source = "class B < A {\n  init(x) { this.x = x; }\n  get() { return super.get(); }\n}";
        let (printed, errors) = parse_program(source);

        assert!(errors.is_empty());
        assert_eq!(
            printed,
            "(class B < A (fun init(x) (; (= (. this x) x))) (fun get() (return (call (super get)))))"
        );
    }

    #[test]
    fn test_control_flow() {
        let source = "if (a) print 1; else { print 2; }\nwhile (x) x = x - 1;";
        let (printed, errors) = parse_program(source);

        assert!(errors.is_empty());
        assert_eq!(
            printed,
            "(if a (print 1.0) (block (print 2.0)))\n(while x (; (= x (- x 1.0))))"
        );
    }

    #[test]
    fn test_for_desugars_into_while() {
        let (printed, errors) = parse_program("for (var i = 0; i < 3; i = i + 1) print i;");

        assert!(errors.is_empty());
        assert_eq!(
            printed,
            "(block (var i = 0.0) (while (< i 3.0) (block (print i) (; (= i (+ i 1.0))))))"
        );
    }

    #[test]
    fn test_for_without_clauses_loops_on_true() {
        let (tokens, _) = scan_tokens("for (;;) print 1;");
        let (statements, errors) = Parser::new(&tokens).parse();

        assert!(errors.is_empty());
        assert_eq!(statements.len(), 1);
        assert!(matches!(statements[0], Stmt::While { .. }));
        assert_eq!(AstPrinter::print_program(&statements), "(while true (print 1.0))");
    }

    #[test]
    fn test_error_format() {
        let (_, errors) = parse_program("print ;");
        assert_eq!(errors, ["[line 1] Error at ';': Expect expression."]);

        let (_, errors) = parse_program("print 1");
        assert_eq!(errors, ["[line 1] Error at end: Expect ';' after value."]);
    }

    #[test]
    fn test_synchronize_reports_every_error() {
        let source = "var = 1;\nprint 2;\nvar x = ;\nprint 3;";
        let (printed, errors) = parse_program(source);

        assert_eq!(
            errors,
            [
                "[line 1] Error at '=': Expect variable name.",
                "[line 3] Error at ';': Expect expression.",
            ]
        );
        assert_eq!(printed, "(print 2.0)\n(print 3.0)");
    }

    #[test]
    fn test_invalid_assignment_target_does_not_unwind() {
        let (printed, errors) = parse_program("a + b = c;\nprint 1;");

        assert_eq!(errors, ["[line 1] Error at '=': Invalid assignment target."]);
        assert_eq!(printed, "(; (+ a b))\n(print 1.0)");
    }

    #[test]
    fn test_argument_limit() {
        let arguments: Vec<&str> = vec!["0"; 256];
        let source: String = format!("f({});", arguments.join(", "));

        let (tokens, _) = scan_tokens(&source);
        let (statements, errors) = Parser::new(&tokens).parse();

        assert_eq!(statements.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::Parse);
        assert_eq!(errors[0].message(), "Can't have more than 255 arguments.");
    }

    #[test]
    fn test_parameter_limit() {
        let params: Vec<String> = (0..256).map(|i| format!("p{}", i)).collect();
        let source: String = format!("fun f({}) {{}}", params.join(", "));

        let (tokens, _) = scan_tokens(&source);
        let (statements, errors) = Parser::new(&tokens).parse();

        assert_eq!(statements.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message(), "Can't have more than 255 parameters.");
    }

    #[test]
    fn test_super_requires_method_name() {
        let (_, errors) = parse_program("class A < B { m() { super; } }");

        assert_eq!(errors[0], "[line 1] Error at ';': Expect '.' after 'super'.");
    }

    #[test]
    fn test_single_expression_rejects_trailing_input() {
        assert_eq!(
            parse_expr("1 + 2 3"),
            Err(vec![
                "[line 1] Error at '3': Expect end of expression.".to_string()
            ])
        );
    }

    #[test]
    fn test_token_slice_without_eof() {
        let (mut tokens, _) = scan_tokens("print 1;");
        tokens.pop();

        let (statements, errors) = Parser::new(&tokens).parse();

        assert!(errors.is_empty());
        assert_eq!(statements.len(), 1);
    }
}
