//! Syntax-tree providers used by the dependency analyzer.
//!
//! A provider turns a component source file into a [`ParsedSource`]: the
//! callee names it invokes (in source order) and the modules it imports.
//! [`OxcSyntaxProvider`] covers JavaScript, TypeScript, JSX and TSX.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_ast::ast::{CallExpression, Expression, ImportDeclaration, JSXElement, JSXElementName};
use oxc_ast_visit::{Visit, walk};
use oxc_parser::Parser;
use oxc_span::SourceType;

use crate::error::AnalyzerError;

/// What the analyzer needs to know about a parsed component source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSource {
    /// Invoked names in source order: call-expression callees and JSX element names.
    pub callees: Vec<String>,
    /// Module specifiers of import declarations.
    pub imports: Vec<String>,
}

/// Parses component sources. Implementations must be safe to share across scan workers.
pub trait SyntaxTreeProvider: Send + Sync {
    /// Parse already-loaded source text. `path` selects the dialect and is used in errors.
    fn parse_source(&self, path: &Path, source: &str) -> Result<ParsedSource, AnalyzerError>;

    /// Read and parse the file at `path`.
    fn parse(&self, path: &Path) -> Result<ParsedSource, AnalyzerError> {
        let source = std::fs::read_to_string(path).map_err(|source| AnalyzerError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_source(path, &source)
    }
}

/// Syntax-tree provider backed by the Oxc parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct OxcSyntaxProvider;

impl OxcSyntaxProvider {
    pub fn new() -> Self {
        Self
    }

    /// Whether `path` has an extension this provider can parse.
    pub fn supports(path: &Path) -> bool {
        SourceType::from_path(path).is_ok()
    }
}

impl SyntaxTreeProvider for OxcSyntaxProvider {
    fn parse_source(&self, path: &Path, source: &str) -> Result<ParsedSource, AnalyzerError> {
        let source_type = SourceType::from_path(path)
            .map_err(|_| AnalyzerError::UnsupportedSource(path.to_path_buf()))?;

        let allocator = Allocator::default();
        let parser_return = Parser::new(&allocator, source, source_type).parse();

        if parser_return.panicked || !parser_return.errors.is_empty() {
            let message = parser_return
                .errors
                .first()
                .map(|error| error.to_string())
                .unwrap_or_else(|| "parser aborted".to_string());
            return Err(AnalyzerError::Parse {
                path: path.to_path_buf(),
                message,
            });
        }

        let mut collector = CalleeCollector::default();
        collector.visit_program(&parser_return.program);

        Ok(ParsedSource {
            callees: collector.callees,
            imports: collector.imports,
        })
    }
}

#[derive(Default)]
struct CalleeCollector {
    callees: Vec<String>,
    imports: Vec<String>,
}

impl<'ast> Visit<'ast> for CalleeCollector {
    fn visit_call_expression(&mut self, call: &CallExpression<'ast>) {
        if let Expression::Identifier(ident) = &call.callee {
            self.callees.push(ident.name.as_str().to_string());
        }
        walk::walk_call_expression(self, call);
    }

    fn visit_jsx_element(&mut self, element: &JSXElement<'ast>) {
        match &element.opening_element.name {
            JSXElementName::Identifier(ident) => {
                self.callees.push(ident.name.as_str().to_string());
            }
            JSXElementName::IdentifierReference(ident) => {
                self.callees.push(ident.name.as_str().to_string());
            }
            _ => {}
        }
        walk::walk_jsx_element(self, element);
    }

    fn visit_import_declaration(&mut self, decl: &ImportDeclaration<'ast>) {
        self.imports.push(decl.source.value.as_str().to_string());
        walk::walk_import_declaration(self, decl);
    }
}
