//! Path and branch glob patterns.
//!
//! `*` matches any run of characters, including `/`, so `cpp/*` selects
//! everything below `cpp/`. `?` matches exactly one character. Character
//! classes and brace alternatives are rejected at compile time.

use beacon_core::ConfigError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyOne,
    AnyRun,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Glob {
    pattern: String,
    tokens: Vec<Token>,
}

impl Glob {
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.trim().is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let mut tokens = Vec::with_capacity(pattern.len());
        for c in pattern.chars() {
            let token = match c {
                '*' => {
                    // consecutive stars collapse into one
                    if tokens.last() == Some(&Token::AnyRun) {
                        continue;
                    }
                    Token::AnyRun
                }
                '?' => Token::AnyOne,
                '[' | ']' | '{' | '}' => {
                    return Err(invalid("character classes and alternatives are not supported"));
                }
                '\0' => return Err(invalid("pattern contains a NUL byte")),
                other => Token::Literal(other),
            };
            tokens.push(token);
        }

        Ok(Self {
            pattern: pattern.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, text: &str) -> bool {
        let chars: Vec<char> = text.chars().collect();
        let (mut t, mut c) = (0usize, 0usize);
        // position of the last `*` and the text index it is currently absorbing up to
        let mut backtrack: Option<(usize, usize)> = None;

        while c < chars.len() {
            match self.tokens.get(t) {
                Some(Token::Literal(l)) if *l == chars[c] => {
                    t += 1;
                    c += 1;
                }
                Some(Token::AnyOne) => {
                    t += 1;
                    c += 1;
                }
                Some(Token::AnyRun) => {
                    backtrack = Some((t, c));
                    t += 1;
                }
                _ => match backtrack {
                    Some((star, absorbed)) => {
                        t = star + 1;
                        c = absorbed + 1;
                        backtrack = Some((star, absorbed + 1));
                    }
                    None => return false,
                },
            }
        }

        self.tokens[t..].iter().all(|tok| *tok == Token::AnyRun)
    }
}

impl fmt::Debug for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Glob({:?})", self.pattern)
    }
}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}
