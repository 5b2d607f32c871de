//! Source inspection shared by the atomic checkers
//!
//! Languages with a tree-sitter grammar are parsed for real; anything else
//! falls back to a delimiter balance scan.

use aee_atom::{Artifact, Language};

/// Grammar for a language, if one is bundled
#[must_use]
pub fn tree_sitter_language(language: Language) -> Option<tree_sitter::Language> {
    match language {
        Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
        Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
        Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
        Language::Other => None,
    }
}

/// Node kinds counted as a top-level definition
fn definition_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::Rust => &[
            "function_item",
            "struct_item",
            "enum_item",
            "trait_item",
            "impl_item",
            "mod_item",
        ],
        Language::Python => &["function_definition", "class_definition", "decorated_definition"],
        Language::TypeScript => &[
            "function_declaration",
            "class_declaration",
            "interface_declaration",
            "type_alias_declaration",
            "enum_declaration",
        ],
        Language::Go => &["function_declaration", "method_declaration", "type_declaration"],
        Language::Other => &[],
    }
}

/// Structural facts about one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    /// First syntax problem, 1-based line and description
    pub syntax_error: Option<(usize, String)>,
    /// Top-level definitions (exports stand in when no grammar exists)
    pub definitions: usize,
    pub lines: usize,
}

impl SourceReport {
    #[inline]
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.syntax_error.is_none()
    }
}

/// Inspect an artifact
#[must_use]
pub fn inspect(artifact: &Artifact) -> SourceReport {
    let source = artifact.source();
    let lines = artifact.line_count();
    if source.trim().is_empty() {
        return SourceReport {
            syntax_error: Some((1, "empty artifact".to_string())),
            definitions: 0,
            lines,
        };
    }

    let Some(language) = tree_sitter_language(artifact.language()) else {
        return SourceReport {
            syntax_error: delimiter_balance(source),
            definitions: artifact.exports().len(),
            lines,
        };
    };

    let mut parser = tree_sitter::Parser::new();
    if let Err(e) = parser.set_language(&language) {
        tracing::warn!(error = %e, "grammar rejected, falling back to delimiter scan");
        return SourceReport {
            syntax_error: delimiter_balance(source),
            definitions: artifact.exports().len(),
            lines,
        };
    }
    let Some(tree) = parser.parse(source, None) else {
        return SourceReport {
            syntax_error: Some((1, "parser produced no tree".to_string())),
            definitions: 0,
            lines,
        };
    };

    let root = tree.root_node();
    let syntax_error = if root.has_error() {
        Some(first_error(root).unwrap_or_else(|| (1, "syntax error".to_string())))
    } else {
        None
    };

    let kinds = definition_kinds(artifact.language());
    let mut cursor = root.walk();
    let definitions = root
        .named_children(&mut cursor)
        .filter(|node| kinds.contains(&node.kind()))
        .count();

    SourceReport {
        syntax_error,
        definitions,
        lines,
    }
}

/// Depth-first search for the first ERROR or MISSING node
fn first_error(root: tree_sitter::Node<'_>) -> Option<(usize, String)> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() {
            return Some((node.start_position().row + 1, "unexpected tokens".to_string()));
        }
        if node.is_missing() {
            return Some((node.start_position().row + 1, format!("missing `{}`", node.kind())));
        }
        if node.has_error() {
            // push in reverse so the leftmost child is visited first
            for i in (0..node.child_count()).rev() {
                if let Some(child) = node.child(i) {
                    stack.push(child);
                }
            }
        }
    }
    None
}

/// Bracket balance ignoring string and char literals
fn delimiter_balance(source: &str) -> Option<(usize, String)> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in source.chars() {
        if ch == '\n' {
            line += 1;
        }
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => quote = Some(ch),
            '(' | '[' | '{' => stack.push((ch, line)),
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, opened_at)) => {
                        return Some((line, format!("`{ch}` closes `{open}` opened on line {opened_at}")));
                    }
                    None => return Some((line, format!("unmatched `{ch}`"))),
                }
            }
            _ => {}
        }
    }

    if let Some(q) = quote {
        return Some((line, format!("unterminated {q} literal")));
    }
    stack
        .pop()
        .map(|(open, opened_at)| (opened_at, format!("unclosed `{open}`")))
}
