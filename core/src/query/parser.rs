//! Query text → [`Query`].
//!
//! ```text
//! query   := or_expr
//! or_expr := and_expr ("OR" and_expr)*
//! and_expr:= unary+                      (implicit AND; explicit "AND" is skipped)
//! unary   := ("NOT" | "-")* atom
//! atom    := word | "site:" host | "\"" phrase "\"" | "(" or_expr ")"
//! ```
//!
//! Operators match in any case. A word that tokenizes to several terms
//! (`e-mail`) becomes a phrase; one that yields none vanishes.

use crate::query::ast::{PhraseTerm, Query};
use crate::tokenizer::Tokenizer;

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lexeme {
    Word(String),
    Quoted(String),
    Site(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn lex(input: &str) -> Vec<Lexeme> {
    let mut out = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '"' => {
                chars.next();
                let mut end = input.len();
                for (j, ch) in chars.by_ref() {
                    if ch == '"' {
                        end = j;
                        break;
                    }
                }
                out.push(Lexeme::Quoted(input[i + 1..end].to_string()));
            }
            '(' => {
                chars.next();
                out.push(Lexeme::LParen);
            }
            ')' => {
                chars.next();
                out.push(Lexeme::RParen);
            }
            '-' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, n)) if !n.is_whitespace()) {
                    out.push(Lexeme::Not);
                }
            }
            _ => {
                let mut end = input.len();
                while let Some(&(j, ch)) = chars.peek() {
                    if ch.is_whitespace() || ch == '"' || ch == '(' || ch == ')' {
                        end = j;
                        break;
                    }
                    chars.next();
                }
                out.push(word_lexeme(&input[i..end]));
            }
        }
    }
    out
}

fn word_lexeme(word: &str) -> Lexeme {
    if word.eq_ignore_ascii_case("AND") {
        Lexeme::And
    } else if word.eq_ignore_ascii_case("OR") {
        Lexeme::Or
    } else if word.eq_ignore_ascii_case("NOT") {
        Lexeme::Not
    } else {
        match word.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("site:") => {
                Lexeme::Site(word[5..].trim_end_matches('/').to_lowercase())
            }
            _ => Lexeme::Word(word.to_string()),
        }
    }
}

struct Parser<'a> {
    lexemes: Vec<Lexeme>,
    pos: usize,
    depth: usize,
    tokenizer: &'a Tokenizer,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn advance(&mut self) -> Option<Lexeme> {
        let lx = self.lexemes.get(self.pos).cloned();
        self.pos += 1;
        lx
    }

    fn parse_or(&mut self) -> Option<Query> {
        let mut branches = Vec::new();
        branches.extend(self.parse_and());
        while self.peek() == Some(&Lexeme::Or) {
            self.advance();
            branches.extend(self.parse_and());
        }
        combine(branches, Query::Or)
    }

    fn parse_and(&mut self) -> Option<Query> {
        let mut parts = Vec::new();
        while let Some(lx) = self.peek() {
            match lx {
                Lexeme::Or | Lexeme::RParen => break,
                Lexeme::And => {
                    self.advance();
                }
                _ => parts.extend(self.parse_unary()),
            }
        }
        combine(parts, Query::And)
    }

    fn parse_unary(&mut self) -> Option<Query> {
        let mut negations = 0usize;
        while self.peek() == Some(&Lexeme::Not) {
            self.advance();
            negations += 1;
        }
        let atom = self.parse_atom()?;
        if negations % 2 == 1 {
            Some(Query::Not(Box::new(atom)))
        } else {
            Some(atom)
        }
    }

    fn parse_atom(&mut self) -> Option<Query> {
        match self.advance()? {
            Lexeme::Word(text) | Lexeme::Quoted(text) => self.analyze(&text),
            Lexeme::Site(host) if !host.is_empty() => Some(Query::Site(host)),
            Lexeme::LParen if self.depth < MAX_DEPTH => {
                self.depth += 1;
                let inner = self.parse_or();
                self.depth -= 1;
                if self.peek() == Some(&Lexeme::RParen) {
                    self.advance();
                }
                inner
            }
            _ => None,
        }
    }

    fn analyze(&self, text: &str) -> Option<Query> {
        let tokens = self.tokenizer.tokenize(text);
        match tokens.len() {
            0 => None,
            1 => tokens.into_iter().next().map(|(term, _)| Query::Term(term)),
            _ => {
                let base = tokens[0].1;
                Some(Query::Phrase(
                    tokens
                        .into_iter()
                        .map(|(term, pos)| PhraseTerm { term, offset: pos - base })
                        .collect(),
                ))
            }
        }
    }
}

fn combine(mut parts: Vec<Query>, wrap: fn(Vec<Query>) -> Query) -> Option<Query> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(wrap(parts)),
    }
}

/// Parses `input`; `None` means the query has no searchable content.
pub fn parse(input: &str, tokenizer: &Tokenizer) -> Option<Query> {
    let mut parser = Parser { lexemes: lex(input), pos: 0, depth: 0, tokenizer };
    let mut parts = Vec::new();
    loop {
        parts.extend(parser.parse_or());
        if parser.pos >= parser.lexemes.len() {
            break;
        }
        // stray ')' at top level
        parser.advance();
    }
    combine(parts, Query::And)
}
