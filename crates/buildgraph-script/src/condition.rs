//! Condition expressions used in `If="..."` attributes.
//!
//! ```text
//! or-expr  := and-expr  ("Or"  and-expr)*
//! and-expr := cmp-expr  ("And" cmp-expr)*
//! cmp-expr := scalar (("==" | "!=" | "<" | "<=" | ">" | ">=") scalar)?
//! scalar   := "(" or-expr ")" | "!" scalar
//!           | "Exists" "(" scalar ")" | "HasTrailingSlash" "(" scalar ")"
//!           | "Contains" "(" scalar "," scalar ")"
//!           | "ContainsItem" "(" scalar "," scalar "," scalar ")"
//!           | quoted-string | bare-token
//! ```
//!
//! Every value is a string. Booleans are the strings `true` and `false` in
//! any case. `And` and `Or` evaluate both operands so that an error on either
//! side is always reported.

use std::path::Path;

use buildgraph_core::error::{BuildGraphError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    /// Bare identifier or number.
    Word,
    /// Quoted string; `text` holds the contents without quotes.
    Quoted,
    Symbol,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    kind: TokenKind,
    text: String,
    position: usize,
}

impl Token {
    fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    fn display(&self) -> String {
        match self.kind {
            TokenKind::End => "<end of condition>".to_string(),
            TokenKind::Quoted => format!("'{}'", self.text),
            _ => self.text.clone(),
        }
    }
}

/// A tokenized condition. Parsing is separate from evaluation so the same
/// condition can be evaluated repeatedly.
#[derive(Debug, Clone)]
pub struct Condition {
    text: String,
    tokens: Vec<Token>,
}

impl Condition {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self {
            text: text.to_string(),
            tokens: tokenize(text)?,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Evaluate the condition. `Exists()` resolves paths against `root`.
    pub fn evaluate(&self, root: &Path) -> Result<bool> {
        let mut evaluator = Evaluator {
            tokens: &self.tokens,
            index: 0,
            root,
        };
        let value = evaluator.or_expr()?;
        let next = evaluator.peek();
        if next.kind != TokenKind::End {
            return Err(evaluator.error("Unexpected token", next));
        }
        evaluator.coerce_bool(&value, next)
    }
}

/// Parse and evaluate `text` in one step.
pub fn evaluate(text: &str, root: &Path) -> Result<bool> {
    Condition::parse(text)?.evaluate(root)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (position, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '\'' || c == '"' {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && chars[end].1 != c {
                end += 1;
            }
            if end == chars.len() {
                return Err(BuildGraphError::Condition {
                    message: format!("Unterminated string in condition '{}'", text),
                    token: text[position..].to_string(),
                    position,
                });
            }
            tokens.push(Token {
                kind: TokenKind::Quoted,
                text: chars[start..end].iter().map(|(_, c)| c).collect(),
                position,
            });
            i = end + 1;
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        if matches!(c, '=' | '!' | '<' | '>') && next == Some('=') {
            tokens.push(Token {
                kind: TokenKind::Symbol,
                text: text[position..position + 2].to_string(),
                position,
            });
            i += 2;
            continue;
        }

        if matches!(c, '(' | ')' | ',' | '!' | '<' | '>') {
            tokens.push(Token {
                kind: TokenKind::Symbol,
                text: c.to_string(),
                position,
            });
            i += 1;
            continue;
        }

        if is_word_char(c) {
            let start = i;
            while i < chars.len() && is_word_char(chars[i].1) {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Word,
                text: chars[start..i].iter().map(|(_, c)| c).collect(),
                position,
            });
            continue;
        }

        return Err(BuildGraphError::Condition {
            message: format!("Unexpected character in condition '{}'", text),
            token: c.to_string(),
            position,
        });
    }

    tokens.push(Token {
        kind: TokenKind::End,
        text: String::new(),
        position: text.len(),
    });
    Ok(tokens)
}

struct Evaluator<'a> {
    tokens: &'a [Token],
    index: usize,
    root: &'a Path,
}

impl<'a> Evaluator<'a> {
    fn peek(&self) -> &'a Token {
        // The token list always ends with an End sentinel, which is never consumed.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &'a Token {
        let token = self.peek();
        if token.kind != TokenKind::End {
            self.index += 1;
        }
        token
    }

    fn error(&self, message: &str, token: &Token) -> BuildGraphError {
        BuildGraphError::Condition {
            message: message.to_string(),
            token: token.display(),
            position: token.position,
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<()> {
        let token = self.advance();
        if token.is_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error(&format!("Expected '{}'", symbol), token))
        }
    }

    fn coerce_bool(&self, value: &str, token: &Token) -> Result<bool> {
        if value.eq_ignore_ascii_case("true") {
            Ok(true)
        } else if value.eq_ignore_ascii_case("false") {
            Ok(false)
        } else {
            Err(self.error(
                &format!("'{}' is not a valid boolean; expected 'true' or 'false'", value),
                token,
            ))
        }
    }

    fn coerce_int(&self, value: &str, token: &Token) -> Result<i32> {
        value
            .trim()
            .parse::<i32>()
            .map_err(|_| self.error(&format!("'{}' is not a valid integer", value), token))
    }

    fn or_expr(&mut self) -> Result<String> {
        let token = self.peek();
        let mut result = self.and_expr()?;
        while self.peek().is_keyword("Or") {
            let op = self.advance();
            let rhs = self.and_expr()?;
            let lhs = self.coerce_bool(&result, token)?;
            let rhs = self.coerce_bool(&rhs, op)?;
            result = bool_str(lhs | rhs);
        }
        Ok(result)
    }

    fn and_expr(&mut self) -> Result<String> {
        let token = self.peek();
        let mut result = self.cmp_expr()?;
        while self.peek().is_keyword("And") {
            let op = self.advance();
            let rhs = self.cmp_expr()?;
            let lhs = self.coerce_bool(&result, token)?;
            let rhs = self.coerce_bool(&rhs, op)?;
            result = bool_str(lhs & rhs);
        }
        Ok(result)
    }

    fn cmp_expr(&mut self) -> Result<String> {
        let lhs = self.scalar()?;
        let op = self.peek();
        if op.kind != TokenKind::Symbol {
            return Ok(lhs);
        }
        let result = match op.text.as_str() {
            "==" | "!=" => {
                self.advance();
                let rhs = self.scalar()?;
                let equal = lhs.eq_ignore_ascii_case(&rhs);
                if op.text == "==" {
                    equal
                } else {
                    !equal
                }
            }
            "<" | "<=" | ">" | ">=" => {
                self.advance();
                let rhs = self.scalar()?;
                let a = self.coerce_int(&lhs, op)?;
                let b = self.coerce_int(&rhs, op)?;
                match op.text.as_str() {
                    "<" => a < b,
                    "<=" => a <= b,
                    ">" => a > b,
                    _ => a >= b,
                }
            }
            _ => return Ok(lhs),
        };
        Ok(bool_str(result))
    }

    fn scalar(&mut self) -> Result<String> {
        let token = self.advance();
        match token.kind {
            TokenKind::Quoted => Ok(token.text.clone()),
            TokenKind::End => Err(self.error("Unexpected end of condition", token)),
            TokenKind::Symbol if token.text == "(" => {
                let value = self.or_expr()?;
                self.expect_symbol(")")?;
                Ok(value)
            }
            TokenKind::Symbol if token.text == "!" => {
                let operand = self.peek();
                let value = self.scalar()?;
                Ok(bool_str(!self.coerce_bool(&value, operand)?))
            }
            TokenKind::Symbol => Err(self.error("Unexpected token", token)),
            TokenKind::Word => {
                if self.peek().is_symbol("(") {
                    self.function(token)
                } else {
                    Ok(token.text.clone())
                }
            }
        }
    }

    fn arguments(&mut self, count: usize) -> Result<Vec<String>> {
        self.expect_symbol("(")?;
        let mut args = Vec::with_capacity(count);
        for i in 0..count {
            if i > 0 {
                self.expect_symbol(",")?;
            }
            args.push(self.scalar()?);
        }
        self.expect_symbol(")")?;
        Ok(args)
    }

    fn function(&mut self, name: &'a Token) -> Result<String> {
        let result = if name.is_keyword("Exists") {
            let args = self.arguments(1)?;
            path_exists(self.root, &args[0])
        } else if name.is_keyword("HasTrailingSlash") {
            let args = self.arguments(1)?;
            args[0].ends_with('/') || args[0].ends_with('\\')
        } else if name.is_keyword("Contains") {
            let args = self.arguments(2)?;
            args[0]
                .to_lowercase()
                .contains(&args[1].to_lowercase())
        } else if name.is_keyword("ContainsItem") {
            let args = self.arguments(3)?;
            let (list, item, separator) = (&args[0], &args[1], &args[2]);
            if separator.is_empty() {
                return Err(self.error("ContainsItem separator may not be empty", name));
            }
            list.split(separator.as_str())
                .any(|entry| entry.trim().eq_ignore_ascii_case(item.trim()))
        } else {
            return Err(self.error("Unknown function", name));
        };
        Ok(bool_str(result))
    }
}

fn bool_str(value: bool) -> String {
    String::from(if value { "true" } else { "false" })
}

fn path_exists(root: &Path, relative: &str) -> bool {
    if relative.is_empty() {
        return false;
    }
    std::fs::metadata(root.join(relative)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str) -> Result<bool> {
        evaluate(text, Path::new("."))
    }

    #[test]
    fn test_mixed_case_booleans() {
        assert!(eval("true == 'true' and 'false' == 'False'").unwrap());
        assert!(!eval("1 == 2").unwrap());
        assert!(eval("'Win64' == 'win64'").unwrap());
    }

    #[test]
    fn test_equality_complements() {
        for (a, b) in [("a", "A"), ("x", "y"), ("1", "01"), ("", "")] {
            let eq = eval(&format!("'{}' == '{}'", a, b)).unwrap();
            let ne = eval(&format!("'{}' != '{}'", a, b)).unwrap();
            assert_ne!(eq, ne, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(eval("3 < 10").unwrap());
        assert!(eval("'10' >= 10").unwrap());
        assert!(eval("-1 <= 0").unwrap());
        assert!(!eval("5 > 5").unwrap());

        let err = eval("'abc' < 3").unwrap_err();
        assert!(matches!(err, BuildGraphError::Condition { .. }));
    }

    #[test]
    fn test_or_evaluates_both_sides() {
        // The right-hand side is not a boolean; short-circuiting would hide it.
        assert!(eval("true Or 'maybe'").is_err());
        assert!(eval("false And 'abc' < 1").is_err());
        assert!(eval("true Or false").unwrap());
    }

    #[test]
    fn test_precedence_and_grouping() {
        assert!(eval("true Or false And false").unwrap());
        assert!(!eval("(true Or false) And false").unwrap());
        assert!(eval("!(1 == 2)").unwrap());
        assert!(eval("!false").unwrap());
    }

    #[test]
    fn test_functions() {
        assert!(!eval("Exists('missing/path')").unwrap());
        assert!(eval("HasTrailingSlash('Engine/')").unwrap());
        assert!(!eval("HasTrailingSlash('Engine')").unwrap());
        assert!(eval("Contains('Win64;Mac', 'MAC')").unwrap());
        assert!(eval("ContainsItem('Win64;Mac;Linux', 'linux', ';')").unwrap());
        assert!(!eval("ContainsItem('Win64;Mac', 'Win', ';')").unwrap());
    }

    #[test]
    fn test_exists_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.txt"), "x").unwrap();
        assert!(evaluate("Exists('present.txt')", dir.path()).unwrap());
        assert!(!evaluate("Exists('absent.txt')", dir.path()).unwrap());
    }

    #[test]
    fn test_syntax_errors_carry_token() {
        match eval("(true").unwrap_err() {
            BuildGraphError::Condition { token, .. } => assert_eq!(token, "<end of condition>"),
            other => panic!("unexpected error: {other}"),
        }
        match eval("true == 'a' 'b'").unwrap_err() {
            BuildGraphError::Condition { token, position, .. } => {
                assert_eq!(token, "'b'");
                assert_eq!(position, 12);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(eval("'unterminated").is_err());
        assert!(eval("a & b").is_err());
        assert!(eval("Frobnicate('x')").is_err());
        assert!(eval("").is_err());
    }

    #[test]
    fn test_non_boolean_result_is_error() {
        assert!(eval("'hello'").is_err());
        assert!(eval("TRUE").unwrap());
    }

    #[test]
    fn test_reevaluate_parsed_condition() {
        let condition = Condition::parse("Contains('abc', 'B')").unwrap();
        assert!(condition.evaluate(Path::new(".")).unwrap());
        assert!(condition.evaluate(Path::new(".")).unwrap());
        assert_eq!(condition.text(), "Contains('abc', 'B')");
    }
}
