//! Syntax tree for Monicelli programs.
//!
//! The tree is produced by a front end and consumed read-only by the code
//! generator. It round-trips through JSON so front ends written elsewhere can
//! hand programs to the compiler.

pub mod ast;
mod build;
mod location;

pub use ast::*;
pub use location::Location;

/// Errors loading a syntax tree.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AstError {
    #[error("malformed syntax tree: {0}")]
    Malformed(String),
}

impl Module {
    /// Parse a module from its JSON interchange form.
    pub fn from_json(text: &str) -> Result<Module, AstError> {
        serde_json::from_str(text).map_err(|e| AstError::Malformed(e.to_string()))
    }

    /// Serialize the module to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, AstError> {
        serde_json::to_string_pretty(self).map_err(|e| AstError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_module() {
        let module = Module::from_json(r#"{ "name": "Main" }"#).unwrap();
        assert_eq!(module.name, "Main");
        assert!(module.functions.is_empty());
        assert!(module.entry.is_none());
    }

    #[test]
    fn test_parse_statements() {
        let module = Module::from_json(
            r#"{
                "name": "Main",
                "entry": {
                    "body": [
                        { "kind": "variable_decl", "name": "x", "type": "double",
                          "init": { "kind": "int_immediate", "value": 1 },
                          "loc": { "source": "prova.mc", "line": 1, "column": 1 } },
                        { "kind": "print", "value": { "kind": "identifier", "name": "x" } },
                        { "kind": "abort" }
                    ]
                }
            }"#,
        )
        .unwrap();

        let body = &module.entry.unwrap().body;
        assert_eq!(body.len(), 3);
        match &body[0].kind {
            StmtKind::VariableDecl { name, ty, init } => {
                assert_eq!(name, "x");
                assert_eq!(*ty, Type::Double);
                assert_eq!(init.as_ref().unwrap().kind, ExprKind::IntImmediate { value: 1 });
            }
            other => panic!("unexpected statement {:?}", other),
        }
        assert_eq!(body[0].loc, Location::new("prova.mc", 1, 1));
        assert_eq!(body[1].loc, Location::unknown());
        assert_eq!(body[2].kind, StmtKind::Abort);
    }

    #[test]
    fn test_parse_call_and_branch() {
        let module = Module::from_json(
            r#"{
                "name": "Main",
                "functions": [{
                    "name": "f", "return_type": "void",
                    "params": [{ "name": "n", "type": "int" }],
                    "body": [
                        { "kind": "branch", "target": "n", "paths": [
                            { "condition": { "kind": "value", "value": { "kind": "int_immediate", "value": 0 } },
                              "body": [{ "kind": "call", "name": "f", "args": [] }] },
                            { "condition": { "kind": "compare", "op": "lt", "value": { "kind": "float_immediate", "value": 2.5 } },
                              "body": [] }
                        ] }
                    ]
                }]
            }"#,
        )
        .unwrap();

        let f = module.function("f").unwrap();
        assert_eq!(f.params, vec![Param::new("n", Type::Int)]);
        match &f.body[0].kind {
            StmtKind::Branch { target, paths, default } => {
                assert_eq!(target, "n");
                assert_eq!(paths.len(), 2);
                assert!(default.is_none());
                assert_eq!(paths[0].body[0].kind, StmtKind::Call(Call { name: "f".into(), args: vec![] }));
                assert_eq!(
                    paths[1].condition,
                    BranchCondition::Compare { op: CompareOp::Lt, value: Expr::float(2.5) }
                );
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json() {
        let err = Module::from_json(r#"{ "functions": 3 }"#).unwrap_err();
        assert!(err.to_string().starts_with("malformed syntax tree"));
    }

    #[test]
    fn test_json_round_trip_preserves_tree() {
        let module = Module::new("Main")
            .with_function(Function::new(
                "add",
                Type::Int,
                vec![Param::new("a", Type::Int), Param::new("b", Type::Int)],
                vec![Stmt::ret(Some(Expr::plus(Expr::ident("a"), Expr::ident("b"))))],
            ))
            .with_entry(vec![Stmt::print(Expr::call("add", vec![Expr::int(2), Expr::int(3)]))
                .at(Location::new("prova.mc", 2, 5))]);

        let json = module.to_json().unwrap();
        assert_eq!(Module::from_json(&json).unwrap(), module);
    }
}
